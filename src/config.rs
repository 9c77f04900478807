use anyhow::{Context, Result, ensure};
use std::{
    env,
    net::IpAddr,
    path::{Path, PathBuf},
    time::Duration,
};

/// Application configuration loaded and validated at startup
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Interfaces and OS command settings
    pub network: NetworkConfig,

    /// Files and directories the services read and write
    pub paths: PathConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    /// Serve HTTPS when set
    pub certificate: Option<CertificateConfig>,
}

#[derive(Clone, Debug)]
pub struct CertificateConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct NetworkConfig {
    pub wifi_interface: String,
    pub default_ethernet_interface: String,
    /// ISO 3166-1 alpha-2 code written to the supplicant config
    pub wifi_country: String,
    pub command_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct PathConfig {
    pub dhcpcd_conf: PathBuf,
    pub resolv_conf: PathBuf,
    pub wpa_supplicant_conf: PathBuf,
    pub device_id_file: PathBuf,
    pub backend_data_file: PathBuf,
    pub machines_dir: PathBuf,
    pub static_dir: PathBuf,
}

impl AppConfig {
    /// Load the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::load(|key| env::var(key).ok())
    }

    /// Load the configuration from `lookup`, falling back to defaults for
    /// unset variables
    pub fn load<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            server: ServerConfig::load(&lookup)?,
            network: NetworkConfig::load(&lookup)?,
            paths: PathConfig::load(&lookup),
        })
    }
}

impl ServerConfig {
    fn load(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bind_address = lookup("BIND_ADDRESS")
            .unwrap_or_else(|| "0.0.0.0".to_string())
            .parse::<IpAddr>()
            .context("failed to parse BIND_ADDRESS: invalid format")?;

        let port = lookup("UI_PORT")
            .unwrap_or_else(|| "80".to_string())
            .parse::<u16>()
            .context("failed to parse UI_PORT: invalid format")?;

        let certificate = match (lookup("CERT_PATH"), lookup("KEY_PATH")) {
            (Some(cert_path), Some(key_path)) => Some(CertificateConfig {
                cert_path: cert_path.into(),
                key_path: key_path.into(),
            }),
            (None, None) => None,
            _ => anyhow::bail!(
                "failed to load certificate config: CERT_PATH and KEY_PATH must be set together"
            ),
        };

        Ok(Self {
            bind_address,
            port,
            certificate,
        })
    }
}

impl NetworkConfig {
    fn load(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let wifi_interface = lookup("WIFI_INTERFACE").unwrap_or_else(|| "wlan0".to_string());
        let default_ethernet_interface =
            lookup("DEFAULT_ETHERNET_INTERFACE").unwrap_or_else(|| "eth0".to_string());

        let wifi_country = lookup("WIFI_COUNTRY").unwrap_or_else(|| "IN".to_string());
        ensure!(
            wifi_country.len() == 2 && wifi_country.bytes().all(|b| b.is_ascii_uppercase()),
            "failed to parse WIFI_COUNTRY: expected two uppercase letters, got {wifi_country:?}"
        );

        let command_timeout = lookup("COMMAND_TIMEOUT_SECS")
            .unwrap_or_else(|| "30".to_string())
            .parse::<u64>()
            .context("failed to parse COMMAND_TIMEOUT_SECS: invalid format")?;
        ensure!(
            command_timeout > 0,
            "failed to parse COMMAND_TIMEOUT_SECS: must be positive"
        );

        Ok(Self {
            wifi_interface,
            default_ethernet_interface,
            wifi_country,
            command_timeout: Duration::from_secs(command_timeout),
        })
    }
}

impl PathConfig {
    fn load(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let path = |key: &str, default: &str| -> PathBuf {
            lookup(key).unwrap_or_else(|| default.to_string()).into()
        };

        Self {
            dhcpcd_conf: path("DHCPCD_CONF", "/etc/dhcpcd.conf"),
            resolv_conf: path("RESOLV_CONF", "/etc/resolv.conf"),
            wpa_supplicant_conf: path(
                "WPA_SUPPLICANT_CONF",
                "/etc/wpa_supplicant/wpa_supplicant.conf",
            ),
            device_id_file: path("DEVICE_ID_FILE", "/opt/device_id.txt"),
            backend_data_file: path("BACKEND_DATA_FILE", "/opt/.init/python/backend_data.json"),
            machines_dir: path("MACHINES_DIR", "/opt/python/machines"),
            static_dir: path("STATIC_DIR", "static"),
        }
    }

    /// All files below `root`, using the system file names
    ///
    /// Handy for running against a scratch directory instead of the host.
    pub fn under(root: &Path) -> Self {
        Self {
            dhcpcd_conf: root.join("dhcpcd.conf"),
            resolv_conf: root.join("resolv.conf"),
            wpa_supplicant_conf: root.join("wpa_supplicant.conf"),
            device_id_file: root.join("device_id.txt"),
            backend_data_file: root.join("backend_data.json"),
            machines_dir: root.join("machines"),
            static_dir: root.join("static"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        AppConfig::load(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).expect("defaults should load");

        assert_eq!(config.server.port, 80);
        assert!(config.server.certificate.is_none());
        assert_eq!(config.network.wifi_interface, "wlan0");
        assert_eq!(config.network.default_ethernet_interface, "eth0");
        assert_eq!(config.network.wifi_country, "IN");
        assert_eq!(config.network.command_timeout, Duration::from_secs(30));
        assert_eq!(config.paths.dhcpcd_conf, PathBuf::from("/etc/dhcpcd.conf"));
        assert_eq!(
            config.paths.machines_dir,
            PathBuf::from("/opt/python/machines")
        );
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("UI_PORT", "8080"),
            ("WIFI_INTERFACE", "wlp2s0"),
            ("MACHINES_DIR", "/tmp/machines"),
            ("CERT_PATH", "/cert/cert.pem"),
            ("KEY_PATH", "/cert/key.pem"),
        ])
        .expect("config should load");

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.network.wifi_interface, "wlp2s0");
        assert_eq!(config.paths.machines_dir, PathBuf::from("/tmp/machines"));
        assert!(config.server.certificate.is_some());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(load(&[("UI_PORT", "eighty")]).is_err());
        assert!(load(&[("COMMAND_TIMEOUT_SECS", "0")]).is_err());
        assert!(load(&[("WIFI_COUNTRY", "india")]).is_err());
        assert!(load(&[("CERT_PATH", "/cert/cert.pem")]).is_err());
    }
}
