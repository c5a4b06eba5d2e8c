// Storage abstraction for the persisted control-plane address

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;

/// Errors for configuration persistence
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Settings I/O failed: {0}")]
    Io(String),
    #[error("Settings document is not valid JSON: {0}")]
    Parse(String),
    #[error("Settings key '{0}' is not an object")]
    Layout(String),
}

/// Durable home of the single control-plane address value
#[cfg_attr(test, mockall::automock)]
pub trait ConfigStore: Send + Sync {
    /// Read the stored address, `None` when never written
    fn read(&self) -> Result<Option<String>, StoreError>;
    /// Replace the stored address
    fn write(&self, address: &str) -> Result<(), StoreError>;
}

/// In-memory store useful for testing and simulators
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    value: RwLock<Option<String>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `address`
    pub fn with_value(address: impl Into<String>) -> Self {
        let store = Self::default();
        *store.value.write() = Some(address.into());
        store
    }

    /// Number of successful writes
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Current stored value
    pub fn value(&self) -> Option<String> {
        self.value.read().clone()
    }

    /// Make subsequent writes fail with an I/O error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl ConfigStore for MemoryConfigStore {
    fn read(&self) -> Result<Option<String>, StoreError> {
        Ok(self.value.read().clone())
    }

    fn write(&self, address: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io("simulated write failure".to_string()));
        }
        *self.value.write() = Some(address.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
