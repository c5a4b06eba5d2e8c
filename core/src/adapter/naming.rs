// Deterministic adapter name and service UUID derived from the device id

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Service UUID advertised when no device id is configured
pub const DEFAULT_SERVICE_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_56789abcdef0);

/// Leading fixed part of a derived service UUID; 8 hex digits follow
const SERVICE_UUID_TEMPLATE: &str = "12345678-1234-5678-1234-5678";

/// Suffix used when no device id is configured
const DEFAULT_SUFFIX: &str = "DEFAULT";

fn effective_id(device_id: Option<&str>) -> Option<&str> {
    device_id
        .map(str::trim)
        .filter(|did| !did.is_empty() && *did != DEFAULT_SUFFIX)
}

/// Last `width` characters of `s`, left-padded with `0` when shorter
fn tail_padded(s: &str, width: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() >= width {
        chars[chars.len() - width..].iter().collect()
    } else {
        format!("{:0>width$}", s, width = width)
    }
}

/// Name suffix for a device id.
///
/// `ab-cdef12-0007` → `ef12-0007`; `abc123456` → `123456`; none → `DEFAULT`.
pub fn name_suffix(device_id: Option<&str>) -> String {
    let Some(did) = effective_id(device_id) else {
        return DEFAULT_SUFFIX.to_string();
    };

    let segments: Vec<&str> = did.split('-').collect();
    match segments.as_slice() {
        [.., second_last, last] => format!("{}-{}", tail_padded(second_last, 4), last),
        _ => tail_padded(did, 6),
    }
}

/// Advertised adapter name: `<prefix>_<suffix>_<label>`
pub fn adapter_name(prefix: &str, device_id: Option<&str>, label: &str) -> String {
    format!("{}_{}_{}", prefix, name_suffix(device_id), label)
}

/// Service UUID for a device id: the first four bytes of SHA-256(did) fill
/// the last eight hex digits of a fixed template
pub fn service_uuid(device_id: Option<&str>) -> Uuid {
    let Some(did) = effective_id(device_id) else {
        return DEFAULT_SERVICE_UUID;
    };

    let digest = Sha256::digest(did.as_bytes());
    let text = format!("{}{}", SERVICE_UUID_TEMPLATE, hex::encode(&digest[..4]));
    Uuid::parse_str(&text).unwrap_or(DEFAULT_SERVICE_UUID)
}
