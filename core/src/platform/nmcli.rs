// NetworkManager-backed WiFi configuration via `nmcli`

use super::command::{argv, CommandError, CommandOutput, CommandRunner};
use crate::provisioning::{NetworkConfig, NetworkError, NetworkInfo};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default wireless interface
pub const DEFAULT_INTERFACE: &str = "wlan0";

/// Wait after bringing a connection up before checking association
const ACTIVATION_SETTLE: Duration = Duration::from_secs(5);

pub struct NmcliNetwork {
    runner: Arc<dyn CommandRunner>,
    interface: String,
    settle: Duration,
}

impl NmcliNetwork {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            interface: DEFAULT_INTERFACE.to_string(),
            settle: ACTIVATION_SETTLE,
        }
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = interface.into();
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    async fn run(&self, program: &str, args: Vec<String>) -> Result<CommandOutput, NetworkError> {
        self.runner.run(program, &args).await.map_err(|e| match e {
            CommandError::Spawn { .. } => NetworkError::Unavailable(e.to_string()),
            CommandError::Timeout { .. } => NetworkError::CommandFailed(e.to_string()),
        })
    }

    async fn nmcli(&self, args: Vec<String>) -> Result<CommandOutput, NetworkError> {
        // Only the verb is reported; later arguments may hold the passphrase
        let verb = args.iter().take(2).cloned().collect::<Vec<_>>().join(" ");
        let output = self.run("nmcli", args).await?;
        if output.success {
            Ok(output)
        } else {
            Err(NetworkError::CommandFailed(format!(
                "nmcli {}: {}",
                verb,
                output.failure_summary()
            )))
        }
    }

    async fn add_profile(&self, ssid: &str, password: &str) -> Result<(), NetworkError> {
        let mut args = argv([
            "connection",
            "add",
            "type",
            "wifi",
            "con-name",
            ssid,
            "ifname",
            self.interface.as_str(),
            "ssid",
            ssid,
        ]);
        if !password.is_empty() {
            args.extend(argv(["wifi-sec.key-mgmt", "wpa-psk", "wifi-sec.psk", password]));
        }
        args.extend(argv(["connection.autoconnect", "yes"]));
        self.nmcli(args).await?;
        self.nmcli(argv(["connection", "up", ssid])).await?;
        Ok(())
    }

    async fn connect_directly(&self, ssid: &str, password: &str) -> Result<(), NetworkError> {
        let mut args = argv(["device", "wifi", "connect", ssid]);
        if !password.is_empty() {
            args.extend(argv(["password", password]));
        }
        args.extend(argv(["ifname", self.interface.as_str()]));
        self.nmcli(args).await.map(|_| ())
    }
}

#[async_trait]
impl NetworkConfig for NmcliNetwork {
    async fn is_enabled(&self) -> Result<bool, NetworkError> {
        let output = self.nmcli(argv(["-t", "-f", "WIFI", "general"])).await?;
        Ok(output
            .stdout
            .lines()
            .any(|line| line.trim().eq_ignore_ascii_case("enabled")))
    }

    async fn network_available(&self, ssid: &str) -> Result<bool, NetworkError> {
        Ok(self.network_info(ssid).await?.is_some())
    }

    async fn network_info(&self, ssid: &str) -> Result<Option<NetworkInfo>, NetworkError> {
        Ok(self
            .visible_networks()
            .await?
            .into_iter()
            .filter(|n| n.ssid == ssid)
            .max_by_key(|n| n.signal))
    }

    async fn visible_networks(&self) -> Result<Vec<NetworkInfo>, NetworkError> {
        let output = self
            .nmcli(argv(["-t", "-f", "SSID,SIGNAL,SECURITY", "device", "wifi", "list"]))
            .await?;
        Ok(parse_wifi_list(&output.stdout))
    }

    async fn remove_profile(&self, ssid: &str) -> Result<(), NetworkError> {
        self.nmcli(argv(["connection", "delete", ssid])).await.map(|_| ())
    }

    async fn activate(&self, ssid: &str, password: &str) -> Result<(), NetworkError> {
        if let Err(e) = self.add_profile(ssid, password).await {
            warn!("Profile activation failed, connecting directly: {}", e);
            self.connect_directly(ssid, password).await?;
        }
        info!("📶 Connection for '{}' is up", ssid);
        tokio::time::sleep(self.settle).await;
        Ok(())
    }

    async fn active_ssid(&self) -> Result<Option<String>, NetworkError> {
        match self.nmcli(argv(["-t", "-f", "active,ssid", "device", "wifi"])).await {
            Ok(output) => {
                if let Some(ssid) = parse_active_ssid(&output.stdout) {
                    return Ok(Some(ssid));
                }
            }
            Err(e) => debug!("nmcli active ssid lookup failed: {}", e),
        }

        let output = self.run("iwgetid", argv(["-r"])).await?;
        let ssid = output.stdout.trim();
        Ok((output.success && !ssid.is_empty()).then(|| ssid.to_string()))
    }
}

/// Split one terse `nmcli -t` line on unescaped colons
pub fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Parse `nmcli -t -f SSID,SIGNAL,SECURITY device wifi list`
pub fn parse_wifi_list(output: &str) -> Vec<NetworkInfo> {
    output
        .lines()
        .filter_map(|line| {
            let fields = split_terse(line);
            let ssid = fields.first()?.trim().to_string();
            if ssid.is_empty() {
                return None;
            }
            Some(NetworkInfo {
                ssid,
                signal: fields.get(1).and_then(|s| s.trim().parse().ok()).unwrap_or(0),
                security: fields.get(2).map(|s| s.trim().to_string()).unwrap_or_default(),
            })
        })
        .collect()
}

/// First `yes:<ssid>` line of `nmcli -t -f active,ssid device wifi`
pub fn parse_active_ssid(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let fields = split_terse(line);
        match fields.as_slice() {
            [active, ssid, ..] if active == "yes" && !ssid.is_empty() => Some(ssid.clone()),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::command::fake::ScriptedRunner;

    fn network(runner: Arc<ScriptedRunner>) -> NmcliNetwork {
        NmcliNetwork::new(runner).with_settle(Duration::ZERO)
    }

    #[test]
    fn test_split_terse_handles_escapes() {
        assert_eq!(split_terse(r"Cafe\:Guest:72:WPA2"), vec!["Cafe:Guest", "72", "WPA2"]);
        assert_eq!(split_terse("yes:"), vec!["yes", ""]);
    }

    #[test]
    fn test_parse_wifi_list() {
        let output = "Lab:81:WPA2\n:40:WPA2\nOpenNet:35:\n";
        let networks = parse_wifi_list(output);
        assert_eq!(networks.len(), 2);
        assert_eq!(networks[0].ssid, "Lab");
        assert_eq!(networks[0].signal, 81);
        assert_eq!(networks[1].security, "");
    }

    #[test]
    fn test_parse_active_ssid() {
        assert_eq!(parse_active_ssid("no:Other\nyes:Lab\n").as_deref(), Some("Lab"));
        assert_eq!(parse_active_ssid("no:Other\n"), None);
    }

    #[tokio::test]
    async fn test_is_enabled() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.reply("nmcli -t -f WIFI", Ok(CommandOutput::ok("disabled\n")));
        assert!(!network(runner.clone()).is_enabled().await.unwrap());

        runner.reply("nmcli -t -f WIFI", Ok(CommandOutput::ok("enabled\n")));
        assert!(network(runner).is_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn test_network_info_picks_strongest() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.reply(
            "nmcli -t -f SSID,SIGNAL,SECURITY",
            Ok(CommandOutput::ok("Lab:40:WPA2\nLab:77:WPA2\nOther:90:WPA2\n")),
        );
        let info = network(runner).network_info("Lab").await.unwrap().unwrap();
        assert_eq!(info.signal, 77);
    }

    #[tokio::test]
    async fn test_activate_open_network_omits_security() {
        let runner = Arc::new(ScriptedRunner::new());
        network(runner.clone()).activate("Guest", "").await.unwrap();

        let calls = runner.calls();
        assert_eq!(
            calls[0],
            "nmcli connection add type wifi con-name Guest ifname wlan0 ssid Guest connection.autoconnect yes"
        );
        assert_eq!(calls[1], "nmcli connection up Guest");
    }

    #[tokio::test]
    async fn test_activate_falls_back_to_direct_connect() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.reply("nmcli connection add", Ok(CommandOutput::failed(4, "profile error")));

        network(runner.clone()).activate("Lab", "secret1").await.unwrap();
        assert!(runner
            .calls()
            .contains(&"nmcli device wifi connect Lab password secret1 ifname wlan0".to_string()));
    }

    #[tokio::test]
    async fn test_activate_failure_hides_password() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.reply("nmcli connection add", Ok(CommandOutput::failed(4, "profile error")));
        runner.reply("nmcli device wifi connect", Ok(CommandOutput::failed(10, "No network")));

        let err = network(runner).activate("Lab", "secret1").await.unwrap_err();
        assert!(!err.to_string().contains("secret1"));
    }

    #[tokio::test]
    async fn test_active_ssid_falls_back_to_iwgetid() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.reply("nmcli -t -f active,ssid", Ok(CommandOutput::ok("no:Lab\n")));
        runner.reply("iwgetid -r", Ok(CommandOutput::ok("Lab\n")));

        assert_eq!(network(runner).active_ssid().await.unwrap().as_deref(), Some("Lab"));
    }
}
