//! Wi-Fi scanning and association.

use crate::{
    network_probe::NetworkProbe,
    services::{error::ServiceError, fs::write_atomic},
};
use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fmt::Write as _, path::Path, sync::LazyLock};

/// Reported for networks whose scan entry lacks a signal level.
pub const SIGNAL_UNAVAILABLE: &str = "N/A";

const NOT_CONNECTED: &str = "Not Connected";
const MAX_SSID_BYTES: usize = 32;
const MIN_PASSPHRASE_LEN: usize = 8;
const MAX_PASSPHRASE_LEN: usize = 63;
const RAW_PSK_LEN: usize = 64;

static ESSID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"ESSID:"(.*?)""#).expect("invalid essid regex"));

static QUALITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Quality=(\d+)/(\d+)").expect("invalid quality regex"));

static SIGNAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Signal level=(-?\d+) dBm").expect("invalid signal regex"));

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct WifiNetwork {
    pub ssid: String,
    /// Link quality in percent.
    pub quality: Option<u8>,
    /// Signal level in dBm, or [`SIGNAL_UNAVAILABLE`].
    pub signal: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConnectWifiRequest {
    #[serde(default)]
    pub ssid: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

pub struct WifiService;

impl WifiService {
    /// Scan for networks. Failures are logged and yield an empty list.
    pub async fn scan<P>(probe: &P) -> Vec<WifiNetwork>
    where
        P: NetworkProbe,
    {
        match probe.wifi_scan().await {
            Ok(output) => {
                let networks = parse_scan(&output);
                debug!("wifi scan found {} networks", networks.len());
                networks
            }
            Err(e) => {
                warn!("wifi scan failed: {e:#}");
                vec![]
            }
        }
    }

    /// SSID of the associated network, `"Not Connected"` if there is none.
    pub async fn current_ssid<P>(probe: &P) -> Result<String>
    where
        P: NetworkProbe,
    {
        let ssid = probe
            .current_ssid()
            .await
            .context("failed to query current ssid")?;

        if ssid.is_empty() {
            Ok(NOT_CONNECTED.to_string())
        } else {
            Ok(ssid)
        }
    }

    /// Replace the supplicant configuration with a single network and ask
    /// the supplicant to reload it.
    ///
    /// Succeeds once the file is written and the reload was dispatched;
    /// whether the association works out is not observed.
    pub async fn connect<P>(
        probe: &P,
        supplicant_conf: &Path,
        country: &str,
        request: &ConnectWifiRequest,
    ) -> Result<()>
    where
        P: NetworkProbe,
    {
        let (Some(ssid), Some(password)) = (
            request.ssid.as_deref().filter(|s| !s.is_empty()),
            request.password.as_deref().filter(|p| !p.is_empty()),
        ) else {
            bail!(ServiceError::invalid_input("Missing SSID or password"));
        };

        let config = supplicant_config(country, ssid, password)?;

        info!("write supplicant config for ssid {ssid:?} to {supplicant_conf:?}");
        write_atomic(supplicant_conf, config.as_bytes())?;

        probe
            .reconfigure_wifi()
            .await
            .context("failed to trigger wifi reconfiguration")
    }
}

/// Parse `iwlist scan` output into networks, in order of appearance.
///
/// Cells without an ESSID are skipped.
pub fn parse_scan(output: &str) -> Vec<WifiNetwork> {
    output
        .split("Cell ")
        .filter_map(|cell| {
            let ssid = ESSID_RE.captures(cell)?[1].to_string();

            let quality = QUALITY_RE.captures(cell).and_then(|caps| {
                let value = caps[1].parse::<u32>().ok()?;
                let scale = caps[2].parse::<u32>().ok()?;
                quality_percent(value, scale)
            });

            let signal = SIGNAL_RE
                .captures(cell)
                .map(|caps| caps[1].to_string())
                .unwrap_or_else(|| SIGNAL_UNAVAILABLE.to_string());

            Some(WifiNetwork {
                ssid,
                quality,
                signal,
            })
        })
        .collect()
}

/// `value/scale` in percent, rounded half to even and capped at 100.
fn quality_percent(value: u32, scale: u32) -> Option<u8> {
    if scale == 0 {
        return None;
    }

    let percent = (f64::from(value) / f64::from(scale) * 100.0).round_ties_even();
    Some(percent.min(100.0) as u8)
}

/// Render a supplicant configuration with one network.
fn supplicant_config(country: &str, ssid: &str, password: &str) -> Result<String> {
    let ssid = encode_ssid(ssid)?;
    let psk = encode_psk(password)?;

    Ok(format!(
        "ctrl_interface=DIR=/var/run/wpa_supplicant GROUP=netdev\n\
         update_config=1\n\
         country={country}\n\
         \n\
         network={{\n\
         \x20   ssid={ssid}\n\
         \x20   psk={psk}\n\
         }}\n"
    ))
}

/// Quoted SSID if it is plain printable ASCII, hex otherwise.
fn encode_ssid(ssid: &str) -> Result<String> {
    if ssid.len() > MAX_SSID_BYTES {
        bail!(ServiceError::invalid_input(format!(
            "SSID must not exceed {MAX_SSID_BYTES} bytes"
        )));
    }

    if ssid.bytes().all(|b| is_printable_ascii(b) && b != b'"') {
        return Ok(format!("\"{ssid}\""));
    }

    let mut hex = String::with_capacity(ssid.len() * 2);
    for b in ssid.bytes() {
        let _ = write!(hex, "{b:02x}");
    }
    Ok(hex)
}

/// Quoted passphrase, or a raw 256 bit key given as 64 hex digits.
fn encode_psk(password: &str) -> Result<String> {
    if password.len() == RAW_PSK_LEN && password.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Ok(password.to_ascii_lowercase());
    }

    if (MIN_PASSPHRASE_LEN..=MAX_PASSPHRASE_LEN).contains(&password.len())
        && password.bytes().all(is_printable_ascii)
    {
        return Ok(format!("\"{password}\""));
    }

    bail!(ServiceError::invalid_input(format!(
        "password must be {MIN_PASSPHRASE_LEN} to {MAX_PASSPHRASE_LEN} printable ASCII characters or {RAW_PSK_LEN} hex digits"
    )))
}

fn is_printable_ascii(b: u8) -> bool {
    (0x20..=0x7e).contains(&b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall_double::double;
    use std::fs;
    use tempfile::TempDir;

    #[double]
    use crate::network_probe::NetworkProbe;

    const SCAN: &str = r#"wlan0     Scan completed :
          Cell 01 - Address: 11:22:33:44:55:66
                    Channel:6
                    Frequency:2.437 GHz (Channel 6)
                    Quality=70/70  Signal level=-38 dBm
                    Encryption key:on
                    ESSID:"Factory Floor"
          Cell 02 - Address: 22:33:44:55:66:77
                    Channel:11
                    Quality=35/70  Signal level=-75 dBm
                    Encryption key:on
                    ESSID:"Office"
          Cell 03 - Address: 33:44:55:66:77:88
                    Channel:1
                    Encryption key:off
                    ESSID:"Guest"
"#;

    #[test]
    fn parse_scan_returns_cells_in_order() {
        let networks = parse_scan(SCAN);

        assert_eq!(
            networks,
            vec![
                WifiNetwork {
                    ssid: "Factory Floor".to_string(),
                    quality: Some(100),
                    signal: "-38".to_string(),
                },
                WifiNetwork {
                    ssid: "Office".to_string(),
                    quality: Some(50),
                    signal: "-75".to_string(),
                },
                WifiNetwork {
                    ssid: "Guest".to_string(),
                    quality: None,
                    signal: SIGNAL_UNAVAILABLE.to_string(),
                },
            ]
        );
    }

    #[test]
    fn parse_scan_skips_cells_without_essid() {
        let output = "wlan0  Scan completed :\n Cell 01 - Address: aa\n Quality=10/70\n Cell 02 - Address: bb\n ESSID:\"\"\n";
        let networks = parse_scan(output);

        assert_eq!(networks.len(), 1);
        assert_eq!(networks[0].ssid, "");
    }

    #[test]
    fn parse_scan_of_no_results_is_empty() {
        assert!(parse_scan("wlan0     No scan results").is_empty());
        assert!(parse_scan("").is_empty());
    }

    #[test]
    fn quality_rounds_half_to_even_and_caps() {
        assert_eq!(quality_percent(70, 70), Some(100));
        assert_eq!(quality_percent(35, 70), Some(50));
        assert_eq!(quality_percent(1, 8), Some(12));
        assert_eq!(quality_percent(3, 8), Some(38));
        assert_eq!(quality_percent(90, 70), Some(100));
        assert_eq!(quality_percent(1, 0), None);
    }

    #[test]
    fn ssid_encoding() {
        assert_eq!(encode_ssid("Office").unwrap(), "\"Office\"");
        assert_eq!(encode_ssid("a\"b").unwrap(), "612262");
        assert_eq!(encode_ssid("ü").unwrap(), "c3bc");
        assert!(encode_ssid(&"x".repeat(33)).is_err());
    }

    #[test]
    fn psk_encoding() {
        assert_eq!(encode_psk("secret12").unwrap(), "\"secret12\"");
        let raw = "A".repeat(64);
        assert_eq!(encode_psk(&raw).unwrap(), "a".repeat(64));
        assert!(encode_psk("short").is_err());
        assert!(encode_psk("secret12\n}\nnetwork={").is_err());
    }

    #[test]
    fn supplicant_config_layout() {
        let config = supplicant_config("IN", "Office", "secret12").unwrap();

        assert_eq!(
            config,
            "ctrl_interface=DIR=/var/run/wpa_supplicant GROUP=netdev\n\
             update_config=1\n\
             country=IN\n\
             \n\
             network={\n    ssid=\"Office\"\n    psk=\"secret12\"\n}\n"
        );
    }

    #[tokio::test]
    async fn scan_failure_yields_empty_list() {
        let mut probe = NetworkProbe::default();
        probe
            .expect_wifi_scan()
            .returning(|| Box::pin(async { Err(anyhow::anyhow!("iwlist: not found")) }));

        assert!(WifiService::scan(&probe).await.is_empty());
    }

    #[tokio::test]
    async fn current_ssid_reports_not_connected() {
        let mut probe = NetworkProbe::default();
        probe
            .expect_current_ssid()
            .returning(|| Box::pin(async { Ok(String::new()) }));

        assert_eq!(
            WifiService::current_ssid(&probe).await.unwrap(),
            "Not Connected"
        );
    }

    #[tokio::test]
    async fn connect_writes_config_and_reconfigures() {
        let dir = TempDir::new().unwrap();
        let conf = dir.path().join("wpa_supplicant.conf");

        let mut probe = NetworkProbe::default();
        probe
            .expect_reconfigure_wifi()
            .times(1)
            .returning(|| Box::pin(async { Ok(()) }));

        let request = ConnectWifiRequest {
            ssid: Some("Office".to_string()),
            password: Some("secret12".to_string()),
        };

        WifiService::connect(&probe, &conf, "DE", &request)
            .await
            .expect("connect should succeed");

        let written = fs::read_to_string(&conf).unwrap();
        assert!(written.contains("country=DE\n"));
        assert!(written.contains("ssid=\"Office\""));
    }

    #[tokio::test]
    async fn connect_without_password_has_no_side_effect() {
        let dir = TempDir::new().unwrap();
        let conf = dir.path().join("wpa_supplicant.conf");

        // no expectations: reconfiguring would panic
        let probe = NetworkProbe::default();

        let request = ConnectWifiRequest {
            ssid: Some("Office".to_string()),
            password: None,
        };

        let err = WifiService::connect(&probe, &conf, "IN", &request)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ServiceError>(),
            Some(ServiceError::InvalidInput(_))
        ));
        assert!(!conf.exists());
    }
}
