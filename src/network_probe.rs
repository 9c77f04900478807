use anyhow::{Context, Result, ensure};
use log::{debug, info};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use std::{process::Stdio, time::Duration};
use tokio::{process::Command, time::timeout};
use trait_variant::make;

/// Capability interface over the OS networking tools.
///
/// Implementations return the raw command output; all parsing happens in
/// the services so it can be tested against canned text.
#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait NetworkProbe {
    /// Live state of `interface` (`ifconfig <interface>`).
    async fn interface_info(&self, interface: &str) -> Result<String>;
    /// System routing table (`ip route`).
    async fn routes(&self) -> Result<String>;
    /// Raw wireless scan output (`iwlist <wifi> scan`).
    async fn wifi_scan(&self) -> Result<String>;
    /// SSID of the currently associated network, empty if none.
    async fn current_ssid(&self) -> Result<String>;
    /// Ask the supplicant to reload its configuration. The command's exit
    /// status is not checked.
    async fn reconfigure_wifi(&self) -> Result<()>;
    /// Restart the host.
    async fn reboot(&self) -> Result<()>;
}

/// [`NetworkProbe`] backed by the real system commands.
#[derive(Clone, Debug)]
pub struct SystemProbe {
    wifi_interface: String,
    command_timeout: Duration,
}

impl SystemProbe {
    const IFCONFIG: &'static str = "ifconfig";
    const IP: &'static str = "ip";
    const IWLIST: &'static str = "iwlist";
    const IWGETID: &'static str = "iwgetid";
    const WPA_CLI: &'static str = "wpa_cli";
    const REBOOT: &'static str = "reboot";

    pub fn new(wifi_interface: impl Into<String>, command_timeout: Duration) -> Self {
        SystemProbe {
            wifi_interface: wifi_interface.into(),
            command_timeout,
        }
    }

    /// Run a command to completion and return its stdout.
    ///
    /// Fails on spawn errors, timeouts and non-zero exit codes.
    async fn output(&self, program: &str, args: &[&str]) -> Result<String> {
        let cmdline = format!("{program} {}", args.join(" "));
        debug!("run {cmdline}");

        let output = timeout(
            self.command_timeout,
            Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .context(format!(
            "failed to run {cmdline}: timed out after {}s",
            self.command_timeout.as_secs()
        ))?
        .context(format!("failed to run {cmdline}"))?;

        ensure!(
            output.status.success(),
            "{cmdline} failed with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run a command to completion ignoring its exit status.
    async fn status_unchecked(&self, program: &str, args: &[&str]) -> Result<()> {
        let cmdline = format!("{program} {}", args.join(" "));
        debug!("run {cmdline}");

        let status = timeout(
            self.command_timeout,
            Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status(),
        )
        .await
        .context(format!(
            "failed to run {cmdline}: timed out after {}s",
            self.command_timeout.as_secs()
        ))?
        .context(format!("failed to run {cmdline}"))?;

        debug!("{cmdline} exited with {status}");

        Ok(())
    }
}

impl NetworkProbe for SystemProbe {
    async fn interface_info(&self, interface: &str) -> Result<String> {
        self.output(Self::IFCONFIG, &[interface]).await
    }

    async fn routes(&self) -> Result<String> {
        self.output(Self::IP, &["route"]).await
    }

    async fn wifi_scan(&self) -> Result<String> {
        self.output(Self::IWLIST, &[self.wifi_interface.as_str(), "scan"])
            .await
    }

    async fn current_ssid(&self) -> Result<String> {
        self.output(Self::IWGETID, &["-r"])
            .await
            .map(|ssid| ssid.trim().to_string())
    }

    async fn reconfigure_wifi(&self) -> Result<()> {
        self.status_unchecked(Self::WPA_CLI, &["-i", self.wifi_interface.as_str(), "reconfigure"])
            .await
    }

    async fn reboot(&self) -> Result<()> {
        info!("reboot requested");

        // the host goes down while we wait, so only the spawn is awaited
        Command::new(Self::REBOOT)
            .stdin(Stdio::null())
            .spawn()
            .context("failed to spawn reboot")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe() -> SystemProbe {
        SystemProbe::new("wlan0", Duration::from_secs(5))
    }

    #[tokio::test]
    async fn output_returns_stdout() {
        let out = probe()
            .output("echo", &["inet 10.0.0.2"])
            .await
            .expect("echo should run");
        assert_eq!(out.trim(), "inet 10.0.0.2");
    }

    #[tokio::test]
    async fn output_fails_on_nonzero_exit() {
        let result = probe().output("false", &[]).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("failed with"));
    }

    #[tokio::test]
    async fn output_fails_on_missing_program() {
        let result = probe()
            .output("this-command-does-not-exist-4711", &[])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn output_times_out() {
        let probe = SystemProbe::new("wlan0", Duration::from_millis(100));
        let result = probe.output("sleep", &["5"]).await;
        assert!(result.unwrap_err().to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn status_unchecked_ignores_exit_code() {
        assert!(probe().status_unchecked("false", &[]).await.is_ok());
    }
}
