// Command dispatcher: routes decoded messages and builds signed replies

use super::wifi::WifiActivation;
use super::ProvisioningError;
use crate::identity::DeviceIdentity;
use crate::message::{
    encode_response, Inbound, MessageType, ProvisioningMessage, ProvisioningResponse,
    WifiCredential,
};
use crate::transport::MessageHandler;
use async_trait::async_trait;
use chrono::Local;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Reply to `HELP`
const HELP_TEXT: &str = "Commands: PING, STATUS, TIME, INFO, HELP";

/// Payload of a successful `ConfigureWifi`
const WIFI_SUCCESS: &str = "SUCCESS";

/// Facts reported by `STATUS` and `INFO`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Advertised adapter name
    pub name: String,
    /// Adapter address
    pub address: String,
    pub channel: u8,
}

/// Routes requests by type and answers plaintext aliases
pub struct CommandDispatcher {
    identity: Arc<DeviceIdentity>,
    wifi: WifiActivation,
    device: DeviceInfo,
}

impl CommandDispatcher {
    pub fn new(identity: Arc<DeviceIdentity>, wifi: WifiActivation, device: DeviceInfo) -> Self {
        Self {
            identity,
            wifi,
            device,
        }
    }

    /// Reply line for one decoded message
    pub async fn dispatch(&self, inbound: Inbound) -> String {
        match inbound {
            Inbound::Command(text) => self.alias(&text),
            Inbound::Request(request) => {
                let response = self.handle_request(&request).await;
                self.encode(&response)
            }
            Inbound::Malformed(reason) => {
                let request = ProvisioningMessage::default();
                let response =
                    self.failure(&request, ProvisioningError::Protocol(reason));
                self.encode(&response)
            }
        }
    }

    /// Execute a request envelope. Never fails: errors become failure
    /// responses.
    pub async fn handle_request(&self, request: &ProvisioningMessage) -> ProvisioningResponse {
        debug!(msg_id = %request.msg_id, kind = request.kind.code(), "Dispatching request");

        let result = match request.kind {
            MessageType::GetDeviceId => self.device_id(),
            MessageType::ConfigureWifi => self.configure_wifi(request).await,
            MessageType::Unknown(code) => Err(ProvisioningError::UnsupportedType(code)),
        };

        let data = match result {
            Ok(data) => data,
            Err(e) => return self.failure(request, e),
        };

        match self.identity.sign(data.as_bytes()) {
            Ok(sign) => {
                info!(msg_id = %request.msg_id, kind = request.kind.code(), "✅ Request handled");
                ProvisioningResponse::success(request, data, sign)
            }
            Err(e) => self.failure(request, e.into()),
        }
    }

    fn device_id(&self) -> Result<String, ProvisioningError> {
        self.identity
            .device_id()
            .map(str::to_string)
            .ok_or_else(|| ProvisioningError::Protocol("Device id is not configured".into()))
    }

    async fn configure_wifi(&self, request: &ProvisioningMessage) -> Result<String, ProvisioningError> {
        let plaintext = self.identity.decrypt(&request.data)?;
        let credential: WifiCredential = serde_json::from_slice(&plaintext)
            .map_err(|e| ProvisioningError::Protocol(format!("Invalid WiFi payload: {}", e)))?;

        info!(
            msg_id = %request.msg_id,
            ssid = credential.ssid().unwrap_or("<none>"),
            ncbip = %credential.control_plane_address,
            "📶 WiFi configuration received"
        );
        self.wifi.apply(&credential).await?;
        Ok(WIFI_SUCCESS.to_string())
    }

    /// Failure response. Non-crypto failures carry their signed error code;
    /// crypto failures, and failures that cannot be signed, carry neither
    /// `Data` nor `Sign`.
    fn failure(&self, request: &ProvisioningMessage, err: ProvisioningError) -> ProvisioningResponse {
        warn!(msg_id = %request.msg_id, code = err.code(), "Request failed: {}", err);

        if err.is_crypto() {
            return ProvisioningResponse::failure(request, err.peer_message(), None);
        }

        let code = err.code().to_string();
        let signed = match self.identity.sign(code.as_bytes()) {
            Ok(sign) => Some((code, sign)),
            Err(e) => {
                debug!("Failure code left unsigned: {}", e);
                None
            }
        };
        ProvisioningResponse::failure(request, err.peer_message(), signed)
    }

    fn encode(&self, response: &ProvisioningResponse) -> String {
        match encode_response(response) {
            Ok(line) => line,
            Err(e) => {
                error!("Encoding response failed: {}", e);
                "Error Happened".to_string()
            }
        }
    }

    /// Plaintext aliases; unknown text is echoed back
    pub fn alias(&self, text: &str) -> String {
        let trimmed = text.trim();
        match trimmed.to_ascii_uppercase().as_str() {
            "PING" => "PONG".to_string(),
            "STATUS" => format!("OK - {} Online", self.device.name),
            "TIME" => Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            "INFO" | "DEVICE_INFO" => format!(
                "Device: {}, Address: {}, Channel: {}",
                self.device.name, self.device.address, self.device.channel
            ),
            "HELP" => HELP_TEXT.to_string(),
            _ => format!("Echo: {}", trimmed),
        }
    }
}

#[async_trait]
impl MessageHandler for CommandDispatcher {
    async fn handle(&self, inbound: Inbound) -> String {
        self.dispatch(inbound).await
    }
}
