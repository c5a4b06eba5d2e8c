// EdgeLink Core: secure RFCOMM provisioning for edge devices
//
// A phone pairs over Bluetooth, opens the serial-port service and sends one
// line at a time. Lines are either plain aliases (PING, STATUS, ...) or
// JSON provisioning messages whose payloads are RSA-encrypted to the device
// key. Every structured response is signed with the same key.

pub mod adapter;
pub mod config;
pub mod control;
pub mod crypto;
pub mod identity;
pub mod message;
pub mod platform;
pub mod provisioning;
pub mod server;
pub mod store;
pub mod transport;

pub use adapter::{AdapterControl, AdapterError, AdapterInfo, AdapterManager, PairedDevice};
pub use config::{ConfigError, ServerConfig};
pub use control::{ControlChannel, ControlPlaneSettings, ReconnectSignal};
pub use crypto::CryptoError;
pub use identity::{DeviceIdentity, DeviceKeys, IdentityError, KeyStore};
pub use message::{
    Inbound, MessageType, ProvisioningMessage, ProvisioningResponse, WifiCredential,
};
pub use provisioning::{
    CommandDispatcher, LivenessProbe, NetworkConfig, ProvisioningError, WifiActivation,
};
pub use server::{Collaborators, ProvisioningServer, ServerError};
pub use store::{ConfigStore, JsonFileConfigStore, MemoryConfigStore, StoreError};
pub use transport::{MemoryPlatform, RfcommPlatform, SessionRegistry};

/// Crate version reported by the CLI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
