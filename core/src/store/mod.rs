// Persistence for the control-plane address

pub mod backend;
pub mod settings;

pub use backend::{ConfigStore, MemoryConfigStore, StoreError};
pub use settings::{JsonFileConfigStore, DEFAULT_ADDRESS_KEY_PATH};
