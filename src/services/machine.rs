//! Machine registry
//!
//! One pretty-printed JSON file per machine, named after the sanitized
//! machine name. The device identity token caps how many machines may be
//! registered.

use crate::services::{
    error::ServiceError,
    fs::{read_optional, write_atomic},
};
use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, ser::PrettyFormatter};
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::LazyLock,
};

const RECORD_EXTENSION: &str = "json";

static DEVICE_LIMIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"M(\d+)").expect("invalid device limit regex"));

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SaveMachineRequest {
    #[serde(default)]
    pub machine_name: Option<String>,
    #[serde(default)]
    pub machine_ip: Option<String>,
    #[serde(default)]
    pub reason_id: Option<Value>,
    #[serde(default)]
    pub operator_id: Option<Value>,
    #[serde(default)]
    pub routecard_id: Option<Value>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MachineRecord {
    pub machine_name: String,
    pub machine_ip: Option<String>,
    pub reason_id: Option<Value>,
    pub operator_id: Option<Value>,
    pub routecard_id: Option<Value>,
}

/// Outcome of comparing a machine count against the device limit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LimitCheck {
    pub max_allowed: u32,
    pub allowed: bool,
}

pub struct MachineService;

impl MachineService {
    /// Store `request` as its own record file, overwriting a record with the
    /// same sanitized name. Returns the path of the record.
    pub fn save(machines_dir: &Path, request: SaveMachineRequest) -> Result<PathBuf> {
        let machine_name = request
            .machine_name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| ServiceError::invalid_input("Machine name is required!"))?;

        let record = MachineRecord {
            machine_name,
            machine_ip: request.machine_ip,
            reason_id: request.reason_id,
            operator_id: request.operator_id,
            routecard_id: request.routecard_id,
        };

        fs::create_dir_all(machines_dir)
            .context(format!("failed to create machines directory {machines_dir:?}"))?;

        let path = machines_dir
            .join(sanitize_name(&record.machine_name))
            .with_extension(RECORD_EXTENSION);

        write_atomic(&path, &to_pretty_json(&record)?)?;

        info!("machine saved: {} -> {path:?}", record.machine_name);

        Ok(path)
    }

    /// Delete every record file. A missing directory counts as empty.
    pub fn reset(machines_dir: &Path) -> Result<usize> {
        let entries = match fs::read_dir(machines_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("machines directory {machines_dir:?} does not exist");
                return Ok(0);
            }
            Err(e) => {
                return Err(e)
                    .context(format!("failed to read machines directory {machines_dir:?}"));
            }
        };

        let mut removed = 0;

        for entry in entries {
            let path = entry.context("failed to read machines directory entry")?.path();

            if path.is_file()
                && path.extension().is_some_and(|ext| ext == RECORD_EXTENSION)
            {
                fs::remove_file(&path).context(format!("failed to remove {path:?}"))?;
                removed += 1;
            }
        }

        info!("removed {removed} machine records");

        Ok(removed)
    }

    /// Compare `count` against the limit encoded in the device identity.
    pub fn check_limit(device_id_file: &Path, count: u32) -> Result<LimitCheck> {
        let device_id = read_optional(device_id_file)?
            .ok_or_else(|| anyhow!("Device ID file not found!"))?;

        let Some(max_allowed) = parse_device_limit(device_id.trim()) else {
            bail!("Machine limit not found in device ID.");
        };

        debug!("device {:?} allows {max_allowed} machines", device_id.trim());

        Ok(LimitCheck {
            max_allowed,
            allowed: count <= max_allowed,
        })
    }

    /// Persist an arbitrary JSON object verbatim.
    pub fn save_backend(path: &Path, data: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context(format!("failed to create directory {parent:?}"))?;
        }

        write_atomic(path, &to_pretty_json(data)?)?;

        info!("backend data saved to {path:?}");

        Ok(())
    }
}

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Machine limit from a device token like `YC-D-M4-LWC-IO-0020`.
pub fn parse_device_limit(device_id: &str) -> Option<u32> {
    DEVICE_LIMIT_RE
        .captures(device_id)
        .and_then(|caps| caps[1].parse().ok())
}

fn to_pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));

    value
        .serialize(&mut serializer)
        .context("failed to serialize record")?;

    Ok(buf)
}
