// Message codec: line decoding with base64 unwrapping and response encoding
//
// A received line is either base64-wrapped or sent verbatim. The unwrapped
// text is a JSON request envelope when it parses as a JSON object and a
// plaintext command otherwise.

use super::types::{ProvisioningMessage, ProvisioningResponse};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

/// Errors for encoding and parsing envelopes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("JSON encoding failed: {0}")]
    Encode(String),
    #[error("Invalid response envelope: {0}")]
    InvalidResponse(String),
}

/// Classified inbound line
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Well-formed request envelope
    Request(ProvisioningMessage),
    /// A JSON object that does not fit the request envelope
    Malformed(String),
    /// Plaintext command or free text
    Command(String),
}

/// Result of decoding one line
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLine {
    /// Text after base64 unwrapping (or the trimmed raw line)
    pub text: String,
    /// Whether the line was base64-wrapped
    pub was_base64: bool,
    pub inbound: Inbound,
}

/// Decode one received line. Blank input yields `None` and gets no reply.
pub fn decode_line(line: &str) -> Option<DecodedLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (text, was_base64) = match unwrap_base64(trimmed) {
        Some(decoded) => (decoded, true),
        None => (trimmed.to_string(), false),
    };

    let text_trimmed = text.trim();
    if text_trimmed.is_empty() {
        return None;
    }

    let inbound = classify(text_trimmed);
    Some(DecodedLine {
        text,
        was_base64,
        inbound,
    })
}

/// Base64-decode `input` when the result is printable UTF-8.
///
/// Short uppercase words such as `PING` or `INFO` are valid base64 too, but
/// decode to binary noise; requiring printable text keeps them plaintext.
pub fn unwrap_base64(input: &str) -> Option<String> {
    let bytes = STANDARD.decode(input.trim()).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    let printable = text
        .chars()
        .all(|c| !c.is_control() || matches!(c, '\t' | '\r' | '\n'));
    printable.then_some(text)
}

fn classify(text: &str) -> Inbound {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value @ serde_json::Value::Object(_)) => {
            match serde_json::from_value::<ProvisioningMessage>(value) {
                Ok(message) => Inbound::Request(message),
                Err(e) => Inbound::Malformed(e.to_string()),
            }
        }
        _ => Inbound::Command(text.to_string()),
    }
}

/// Encode a response envelope as one JSON line (without terminator)
pub fn encode_response(response: &ProvisioningResponse) -> Result<String, CodecError> {
    serde_json::to_string(response).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Encode a request envelope, optionally base64-wrapped, as clients send it
pub fn encode_request(message: &ProvisioningMessage, wrap_base64: bool) -> Result<String, CodecError> {
    let json = serde_json::to_string(message).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(if wrap_base64 { STANDARD.encode(json) } else { json })
}

/// Parse a response line as received by a client
pub fn parse_response(line: &str) -> Result<ProvisioningResponse, CodecError> {
    serde_json::from_str(line.trim()).map_err(|e| CodecError::InvalidResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::types::MessageType;

    #[test]
    fn test_blank_lines_are_ignored() {
        assert!(decode_line("").is_none());
        assert!(decode_line("  \r\n").is_none());
        // base64 of three spaces
        assert!(decode_line("ICAg").is_none());
    }

    #[test]
    fn test_plaintext_aliases_stay_plaintext() {
        for word in ["PING", "TIME", "HELP", "INFO", "STATUS", "ping", "test"] {
            let decoded = decode_line(word).unwrap();
            assert!(!decoded.was_base64, "{} was unwrapped", word);
            assert_eq!(decoded.inbound, Inbound::Command(word.to_string()));
        }
    }

    #[test]
    fn test_base64_wrapped_command() {
        let decoded = decode_line(&STANDARD.encode("PING")).unwrap();
        assert!(decoded.was_base64);
        assert_eq!(decoded.text, "PING");
        assert_eq!(decoded.inbound, Inbound::Command("PING".into()));
    }

    #[test]
    fn test_plain_json_request() {
        let decoded = decode_line(r#"  {"MsgId":"a","Type":10000}  "#).unwrap();
        match decoded.inbound {
            Inbound::Request(msg) => {
                assert_eq!(msg.msg_id, "a");
                assert_eq!(msg.kind, MessageType::GetDeviceId);
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_base64_json_request() {
        let request = ProvisioningMessage::new("m-2", MessageType::ConfigureWifi, "Y2lwaGVy");
        let line = encode_request(&request, true).unwrap();

        let decoded = decode_line(&line).unwrap();
        assert!(decoded.was_base64);
        assert_eq!(decoded.inbound, Inbound::Request(request));
    }

    #[test]
    fn test_json_object_with_wrong_shape_is_malformed() {
        let decoded = decode_line(r#"{"Type":"ten thousand"}"#).unwrap();
        assert!(matches!(decoded.inbound, Inbound::Malformed(_)));
    }

    #[test]
    fn test_non_object_json_is_a_command() {
        assert_eq!(
            decode_line("[1,2]").unwrap().inbound,
            Inbound::Command("[1,2]".into())
        );
        assert_eq!(
            decode_line("{broken").unwrap().inbound,
            Inbound::Command("{broken".into())
        );
    }

    #[test]
    fn test_unwrap_rejects_binary() {
        assert_eq!(unwrap_base64(&STANDARD.encode([0u8, 1, 2, 255])), None);
        assert_eq!(unwrap_base64("not base64"), None);
        assert_eq!(unwrap_base64(&STANDARD.encode("a\tb\n")), Some("a\tb\n".into()));
    }

    #[test]
    fn test_parse_response_line() {
        let line = r#"{"MsgId":"x","Time":"2024-01-01T00:00:00Z","Type":10000,"Success":true,"Message":"Success","Data":"did","Sign":"c2ln"}"#;
        let response = parse_response(line).unwrap();
        assert!(response.success);
        assert_eq!(response.data.as_deref(), Some("did"));
        assert!(parse_response("PONG").is_err());
    }
}
