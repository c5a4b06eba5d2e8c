// Message types, envelopes, and line codec

pub mod codec;
pub mod types;

pub use codec::{decode_line, encode_request, encode_response, parse_response, CodecError, DecodedLine, Inbound};
pub use types::{MessageType, ProvisioningMessage, ProvisioningResponse, WifiCredential};
