// Provisioning wire types
//
// Field names are PascalCase on the wire (`MsgId`, `Time`, `Type`, ...).
// Peers built on other stacks send `null` for absent strings, so every
// string field tolerates both `null` and a missing key.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Message type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum MessageType {
    /// 10000: return the device id
    GetDeviceId,
    /// 10050: apply encrypted WiFi credentials and a control-plane address
    ConfigureWifi,
    /// Any other code, preserved for the response
    Unknown(i32),
}

impl MessageType {
    /// Numeric wire code
    pub fn code(&self) -> i32 {
        match self {
            MessageType::GetDeviceId => 10000,
            MessageType::ConfigureWifi => 10050,
            MessageType::Unknown(code) => *code,
        }
    }
}

impl From<i32> for MessageType {
    fn from(code: i32) -> Self {
        match code {
            10000 => MessageType::GetDeviceId,
            10050 => MessageType::ConfigureWifi,
            other => MessageType::Unknown(other),
        }
    }
}

impl From<MessageType> for i32 {
    fn from(kind: MessageType) -> Self {
        kind.code()
    }
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::Unknown(0)
    }
}

/// Inbound request envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProvisioningMessage {
    #[serde(default, deserialize_with = "nullable")]
    pub msg_id: String,
    #[serde(default = "epoch", with = "wire_time")]
    pub time: DateTime<Utc>,
    #[serde(rename = "Type", default, deserialize_with = "nullable")]
    pub kind: MessageType,
    /// Base64 payload; ciphertext for sensitive types
    #[serde(default, deserialize_with = "nullable")]
    pub data: String,
    #[serde(default, deserialize_with = "nullable")]
    pub sign: String,
}

impl ProvisioningMessage {
    /// Create a request stamped with the current time
    pub fn new(msg_id: impl Into<String>, kind: MessageType, data: impl Into<String>) -> Self {
        Self {
            msg_id: msg_id.into(),
            time: Utc::now(),
            kind,
            data: data.into(),
            sign: String::new(),
        }
    }
}

impl Default for ProvisioningMessage {
    fn default() -> Self {
        Self {
            msg_id: String::new(),
            time: epoch(),
            kind: MessageType::default(),
            data: String::new(),
            sign: String::new(),
        }
    }
}

/// Outbound response envelope; `MsgId`, `Time` and `Type` echo the request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProvisioningResponse {
    #[serde(default, deserialize_with = "nullable")]
    pub msg_id: String,
    #[serde(default = "epoch", with = "wire_time")]
    pub time: DateTime<Utc>,
    #[serde(rename = "Type", default, deserialize_with = "nullable")]
    pub kind: MessageType,
    #[serde(default, deserialize_with = "nullable")]
    pub success: bool,
    #[serde(default, deserialize_with = "nullable")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign: Option<String>,
}

impl ProvisioningResponse {
    /// Signed success response
    pub fn success(request: &ProvisioningMessage, data: String, sign: String) -> Self {
        Self {
            msg_id: request.msg_id.clone(),
            time: request.time,
            kind: request.kind,
            success: true,
            message: "Success".to_string(),
            data: Some(data),
            sign: Some(sign),
        }
    }

    /// Failure response; `data`/`sign` are present only when the failure
    /// code could be signed
    pub fn failure(
        request: &ProvisioningMessage,
        message: impl Into<String>,
        signed_code: Option<(String, String)>,
    ) -> Self {
        let (data, sign) = match signed_code {
            Some((code, sign)) => (Some(code), Some(sign)),
            None => (None, None),
        };
        Self {
            msg_id: request.msg_id.clone(),
            time: request.time,
            kind: request.kind,
            success: false,
            message: message.into(),
            data,
            sign,
        }
    }
}

/// Decrypted payload of a `ConfigureWifi` request
#[derive(Clone, Default, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct WifiCredential {
    #[serde(rename = "SSID", default, deserialize_with = "nullable")]
    pub ssid: String,
    #[serde(rename = "Password", default)]
    pub password: Option<String>,
    /// Control-plane address (IPv4 or IPv6 literal)
    #[serde(rename = "NCBIP", default, deserialize_with = "nullable")]
    pub control_plane_address: String,
}

impl WifiCredential {
    /// SSID, if one was supplied
    pub fn ssid(&self) -> Option<&str> {
        let ssid = self.ssid.trim();
        (!ssid.is_empty()).then_some(ssid)
    }

    /// Password, empty for open networks
    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }
}

impl std::fmt::Debug for WifiCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WifiCredential")
            .field("ssid", &self.ssid)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("control_plane_address", &self.control_plane_address)
            .finish()
    }
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Timestamps: RFC 3339 out; RFC 3339 or zone-less ISO 8601 (read as UTC) in
mod wire_time {
    use super::*;

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(epoch());
        }
        if let Ok(time) = DateTime::parse_from_rfc3339(raw) {
            return Ok(time.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
            .map(|naive| Utc.from_utc_datetime(&naive))
            .map_err(|e| format!("invalid timestamp '{}': {}", raw, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_codes() {
        assert_eq!(MessageType::from(10000), MessageType::GetDeviceId);
        assert_eq!(MessageType::from(10050), MessageType::ConfigureWifi);
        assert_eq!(MessageType::from(42), MessageType::Unknown(42));
        assert_eq!(MessageType::ConfigureWifi.code(), 10050);
        assert_eq!(MessageType::default().code(), 0);
    }

    #[test]
    fn test_parse_request() {
        let json = r#"{"MsgId":"m-1","Time":"2024-05-01T08:30:00Z","Type":10000,"Data":"","Sign":null}"#;
        let msg: ProvisioningMessage = serde_json::from_str(json).unwrap();

        assert_eq!(msg.msg_id, "m-1");
        assert_eq!(msg.kind, MessageType::GetDeviceId);
        assert_eq!(msg.time, Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap());
        assert_eq!(msg.sign, "");
    }

    #[test]
    fn test_parse_request_with_missing_fields() {
        let msg: ProvisioningMessage = serde_json::from_str(r#"{"Type":10050}"#).unwrap();
        assert_eq!(msg.msg_id, "");
        assert_eq!(msg.time, epoch());
        assert_eq!(msg.kind, MessageType::ConfigureWifi);
    }

    #[test]
    fn test_zoneless_time_is_utc() {
        let parsed = wire_time::parse("2024-05-01T08:30:00.250").unwrap();
        assert_eq!(parsed.timestamp_millis(), 1714552200250);
        assert!(wire_time::parse("yesterday").is_err());
    }

    #[test]
    fn test_response_wire_names() {
        let request = ProvisioningMessage {
            msg_id: "m-9".into(),
            kind: MessageType::ConfigureWifi,
            ..Default::default()
        };
        let response = ProvisioningResponse::success(&request, "SUCCESS".into(), "c2ln".into());
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["MsgId"], "m-9");
        assert_eq!(value["Type"], 10050);
        assert_eq!(value["Success"], true);
        assert_eq!(value["Message"], "Success");
        assert_eq!(value["Data"], "SUCCESS");
        assert_eq!(value["Sign"], "c2ln");
        assert_eq!(value["Time"], "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_unsigned_failure_omits_data_and_sign() {
        let response = ProvisioningResponse::failure(&ProvisioningMessage::default(), "boom", None);
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["Success"], false);
        assert!(value.get("Data").is_none());
        assert!(value.get("Sign").is_none());
    }

    #[test]
    fn test_credential_parsing() {
        let cred: WifiCredential =
            serde_json::from_str(r#"{"SSID":"lab","Password":null,"NCBIP":"10.0.0.5"}"#).unwrap();
        assert_eq!(cred.ssid(), Some("lab"));
        assert_eq!(cred.password(), "");
        assert_eq!(cred.control_plane_address, "10.0.0.5");

        let no_ssid: WifiCredential = serde_json::from_str(r#"{"SSID":" ","NCBIP":"::1"}"#).unwrap();
        assert_eq!(no_ssid.ssid(), None);
    }

    #[test]
    fn test_credential_debug_redacts_password() {
        let cred = WifiCredential {
            ssid: "lab".into(),
            password: Some("hunter2".into()),
            control_plane_address: "10.0.0.5".into(),
        };
        let debug = format!("{:?}", cred);
        assert!(debug.contains("lab"));
        assert!(!debug.contains("hunter2"));
    }
}
