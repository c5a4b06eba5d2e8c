//! BlueZ adapter control
//!
//! Drives the host Bluetooth stack through the standard BlueZ tools
//! (`hciconfig`, `btmgmt`, `bluetoothctl`, `sdptool`, `rfcomm`,
//! `systemctl`). Only powering the adapter on is mandatory; naming,
//! advertising and discoverability steps are best effort because their
//! availability varies between BlueZ releases.

use super::command::{argv, CommandError, CommandOutput, CommandRunner};
use crate::adapter::{AdapterControl, AdapterError, AdapterInfo, PairedDevice, ServiceRecord};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default HCI device
pub const DEFAULT_HCI: &str = "hci0";

/// Time the daemon needs after a restart
const DAEMON_SETTLE: Duration = Duration::from_secs(3);

/// BlueZ-backed [`AdapterControl`]
pub struct BluezAdapter {
    runner: Arc<dyn CommandRunner>,
    hci: String,
    settle: Duration,
    record_dir: PathBuf,
}

impl BluezAdapter {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            hci: DEFAULT_HCI.to_string(),
            settle: DAEMON_SETTLE,
            record_dir: std::env::temp_dir(),
        }
    }

    /// Use a different HCI device
    pub fn with_hci(mut self, hci: impl Into<String>) -> Self {
        self.hci = hci.into();
        self
    }

    /// Override the post-restart settle time
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Directory for the SDP record file used by the fallback registration
    pub fn with_record_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.record_dir = dir.into();
        self
    }

    async fn run(&self, program: &str, args: Vec<String>) -> Result<CommandOutput, AdapterError> {
        self.runner.run(program, &args).await.map_err(|e| match e {
            CommandError::Spawn { .. } => AdapterError::Unavailable(e.to_string()),
            CommandError::Timeout { .. } => AdapterError::CommandFailed(e.to_string()),
        })
    }

    /// Run a command that must succeed
    async fn required(&self, program: &str, args: Vec<String>) -> Result<CommandOutput, AdapterError> {
        let line = format!("{} {}", program, args.join(" "));
        let output = self.run(program, args).await?;
        if output.success {
            Ok(output)
        } else {
            Err(AdapterError::CommandFailed(format!(
                "{}: {}",
                line.trim(),
                output.failure_summary()
            )))
        }
    }

    /// Run a command whose failure is only logged
    async fn best_effort(&self, program: &str, args: Vec<String>) -> bool {
        let line = format!("{} {}", program, args.join(" "));
        match self.run(program, args).await {
            Ok(output) if output.success => true,
            Ok(output) => {
                debug!("'{}' failed: {}", line.trim(), output.failure_summary());
                false
            }
            Err(e) => {
                debug!("'{}' failed: {}", line.trim(), e);
                false
            }
        }
    }

    async fn read_address(&self) -> Result<String, AdapterError> {
        let output = self.required("hciconfig", argv([self.hci.as_str()])).await?;
        parse_bd_address(&output.stdout).ok_or_else(|| {
            AdapterError::InitFailed(format!("no BD Address reported for {}", self.hci))
        })
    }

    async fn set_name(&self, name: &str) {
        self.best_effort("bluetoothctl", argv(["system-alias", name])).await;
        self.best_effort("hciconfig", argv([self.hci.as_str(), "name", name])).await;
        self.best_effort("btmgmt", argv(["-i", self.hci.as_str(), "name", name])).await;
    }

    async fn start_advertising(&self) {
        self.best_effort("btmgmt", argv(["-i", self.hci.as_str(), "advertising", "off"])).await;
        self.best_effort(
            "btmgmt",
            argv(["-i", self.hci.as_str(), "add-adv", "-i0x0050", "-g0x0050", "-t0", "-c0x07"]),
        )
        .await;
        self.best_effort("btmgmt", argv(["-i", self.hci.as_str(), "advertising", "on"])).await;
    }

    async fn make_discoverable(&self) {
        for args in [
            argv(["discoverable-timeout", "0"]),
            argv(["discoverable", "on"]),
            argv(["pairable", "on"]),
        ] {
            self.best_effort("bluetoothctl", args).await;
        }
    }

    async fn register_from_file(&self, record: &ServiceRecord) -> Result<(), AdapterError> {
        let path = self
            .record_dir
            .join(format!("edgelink_sdp_record_{}.xml", record.channel));
        tokio::fs::write(&path, record.to_xml())
            .await
            .map_err(|e| AdapterError::CommandFailed(format!("writing {}: {}", path.display(), e)))?;
        let file_arg = format!("--file={}", path.display());
        self.required("sdptool", argv(["add", file_arg.as_str()])).await?;
        Ok(())
    }
}

#[async_trait]
impl AdapterControl for BluezAdapter {
    async fn power_on(&self, name: &str) -> Result<AdapterInfo, AdapterError> {
        self.required("hciconfig", argv([self.hci.as_str(), "up"])).await?;
        self.best_effort("hciconfig", argv([self.hci.as_str(), "piscan"])).await;

        let address = self.read_address().await?;
        self.set_name(name).await;
        self.start_advertising().await;
        self.make_discoverable().await;

        Ok(AdapterInfo {
            address,
            name: name.to_string(),
        })
    }

    async fn register_service(&self, record: &ServiceRecord) -> Result<(), AdapterError> {
        let channel_arg = format!("--channel={}", record.channel);
        match self.required("sdptool", argv(["add", channel_arg.as_str(), "SP"])).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("Serial port profile registration failed, trying record file: {}", e);
                self.register_from_file(record).await
            }
        }
    }

    async fn unregister_service(&self, record: &ServiceRecord) -> Result<(), AdapterError> {
        let output = self.required("sdptool", argv(["browse", "local"])).await?;
        let handles = parse_record_handles(&output.stdout, record.channel);
        if handles.is_empty() {
            debug!("No SDP record registered on channel {}", record.channel);
            return Ok(());
        }
        for handle in handles {
            self.required("sdptool", argv(["del", handle.as_str()])).await?;
            debug!(handle = %handle, "SDP record removed");
        }
        Ok(())
    }

    async fn release_channel(&self, channel: u8) -> Result<(), AdapterError> {
        let channel = channel.to_string();
        self.required("rfcomm", argv(["release", channel.as_str()])).await.map(|_| ())
    }

    async fn restart_daemon(&self) -> Result<(), AdapterError> {
        info!("🔁 Restarting bluetooth service");
        self.required("systemctl", argv(["restart", "bluetooth"])).await?;
        tokio::time::sleep(self.settle).await;
        Ok(())
    }

    async fn list_devices(&self) -> Result<Vec<PairedDevice>, AdapterError> {
        let output = self.required("bluetoothctl", argv(["devices"])).await?;
        let mut devices = Vec::new();
        for (address, name) in parse_devices(&output.stdout) {
            let connected = match self.run("bluetoothctl", argv(["info", address.as_str()])).await {
                Ok(info) => parse_connected(&info.stdout),
                Err(_) => false,
            };
            devices.push(PairedDevice {
                address,
                name,
                connected,
            });
        }
        Ok(devices)
    }

    async fn remove_device(&self, address: &str) -> Result<(), AdapterError> {
        self.required("bluetoothctl", argv(["remove", address])).await.map(|_| ())
    }
}

/// Extract `AA:BB:CC:DD:EE:FF` from `hciconfig <dev>` output
pub fn parse_bd_address(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let rest = line.split("BD Address:").nth(1)?;
        let address = rest.split_whitespace().next()?;
        is_bd_address(address).then(|| address.to_uppercase())
    })
}

/// Parse `bluetoothctl devices` lines: `Device <addr> <name>`
pub fn parse_devices(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("Device ")?;
            let (address, name) = match rest.split_once(' ') {
                Some((address, name)) => (address, name.trim()),
                None => (rest, ""),
            };
            is_bd_address(address).then(|| (address.to_uppercase(), name.to_string()))
        })
        .collect()
}

/// Handles of local SDP records whose RFCOMM channel is `channel`, from
/// `sdptool browse local` output
pub fn parse_record_handles(output: &str, channel: u8) -> Vec<String> {
    let mut handles = Vec::new();
    let mut current: Option<&str> = None;
    for line in output.lines().map(str::trim) {
        if let Some(handle) = line.strip_prefix("Service RecHandle:") {
            current = Some(handle.trim());
        } else if let Some(value) = line.strip_prefix("Channel:") {
            let on_channel = value.trim().parse::<u8>().ok() == Some(channel);
            if let Some(handle) = current.filter(|_| on_channel) {
                if !handles.iter().any(|h| h == handle) {
                    handles.push(handle.to_string());
                }
            }
        }
    }
    handles
}

/// Whether `bluetoothctl info` reports the device as connected
pub fn parse_connected(output: &str) -> bool {
    output
        .lines()
        .any(|line| line.trim().eq_ignore_ascii_case("connected: yes"))
}

fn is_bd_address(s: &str) -> bool {
    let parts: Vec<&str> = s.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}
