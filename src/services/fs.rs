//! Filesystem helpers shared by the services.

use anyhow::{Context, Result};
use log::debug;
use std::{
    ffi::OsString,
    fs::{self, File},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

/// Replace `path` with `contents` atomically.
///
/// The data goes to a sibling temp file which is synced and renamed over
/// the target, so readers see either the old or the new file. Permissions of
/// a replaced file are carried over to the new one.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    debug!("write_atomic({path:?})");

    let temp_path = temp_path_for(path);

    let result = (|| -> Result<()> {
        let mut file = File::create(&temp_path)
            .context(format!("failed to create temp file {temp_path:?}"))?;

        file.write_all(contents)
            .context(format!("failed to write temp file {temp_path:?}"))?;

        match fs::metadata(path) {
            Ok(metadata) => file
                .set_permissions(metadata.permissions())
                .context(format!("failed to copy permissions of {path:?}"))?,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e).context(format!("failed to read metadata of {path:?}")),
        }

        file.sync_all()
            .context(format!("failed to sync temp file {temp_path:?}"))?;

        fs::rename(&temp_path, path).context(format!("failed to replace {path:?}"))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }

    result
}

/// Read `path` to a string, mapping a missing file to `None`.
pub fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).context(format!("failed to read {path:?}")),
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("file"));
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn write_atomic_creates_and_replaces() {
        let dir = TempDir::new().expect("should create temp dir");
        let path = dir.path().join("dhcpcd.conf");

        write_atomic(&path, b"first").expect("should write");
        assert_eq!(fs::read_to_string(&path).unwrap(), "first");

        write_atomic(&path, b"second").expect("should overwrite");
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");

        assert!(!dir.path().join("dhcpcd.conf.tmp").exists());
    }

    #[test]
    fn write_atomic_keeps_permissions() {
        let dir = TempDir::new().expect("should create temp dir");
        let path = dir.path().join("wpa_supplicant.conf");

        fs::write(&path, "old").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();

        write_atomic(&path, b"new").expect("should overwrite");

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn write_atomic_fails_for_missing_directory() {
        let dir = TempDir::new().expect("should create temp dir");
        let path = dir.path().join("missing").join("file.json");

        assert!(write_atomic(&path, b"{}").is_err());
    }

    #[test]
    fn read_optional_maps_missing_file_to_none() {
        let dir = TempDir::new().expect("should create temp dir");
        let path = dir.path().join("resolv.conf");

        assert!(read_optional(&path).unwrap().is_none());

        fs::write(&path, "nameserver 1.1.1.1\n").unwrap();
        assert_eq!(
            read_optional(&path).unwrap().as_deref(),
            Some("nameserver 1.1.1.1\n")
        );
    }
}
