//! Control-plane hand-off
//!
//! Provisioning ends by telling the long-lived control channel to reconnect
//! to the freshly configured address. That channel lives outside this crate;
//! it sees a [`ControlChannel`] signal and reads the address from
//! [`ControlPlaneSettings`].

use crate::store::{ConfigStore, StoreError};
use parking_lot::RwLock;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Consumer side of the forced-reconnect signal
#[cfg_attr(test, mockall::automock)]
pub trait ControlChannel: Send + Sync {
    /// Ask the control channel to reconnect now instead of at its next poll
    fn request_reconnect(&self);
}

/// Single-pending reconnect flag.
///
/// Raising an already raised signal is a no-op; `take` clears it.
#[derive(Debug, Default)]
pub struct ReconnectSignal {
    pending: AtomicBool,
    notify: Notify,
}

impl ReconnectSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a reconnect is pending
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Consume the pending signal, returning whether one was raised
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }

    /// Wait until a signal is raised, then consume it
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.take() {
                return;
            }
            notified.await;
        }
    }
}

impl ControlChannel for ReconnectSignal {
    fn request_reconnect(&self) {
        if !self.pending.swap(true, Ordering::SeqCst) {
            tracing::info!("🔁 Control channel reconnect requested");
        }
        self.notify.notify_one();
    }
}

/// Control-plane address: durable store plus an in-memory mirror that the
/// control channel reads at (re)connect time
pub struct ControlPlaneSettings {
    store: Arc<dyn ConfigStore>,
    mirror: RwLock<Option<IpAddr>>,
}

impl ControlPlaneSettings {
    /// Load the stored address into the mirror
    pub fn load(store: Arc<dyn ConfigStore>) -> Result<Self, StoreError> {
        let current = match store.read()? {
            Some(raw) => match raw.trim().parse::<IpAddr>() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    tracing::warn!("Ignoring stored control-plane address '{}': not an IP literal", raw);
                    None
                }
            },
            None => None,
        };
        Ok(Self {
            store,
            mirror: RwLock::new(current),
        })
    }

    /// Current address
    pub fn current(&self) -> Option<IpAddr> {
        *self.mirror.read()
    }

    /// Persist `addr` and update the mirror.
    ///
    /// The mirror lock is held across the durable write so readers never see
    /// a value the store does not hold; on failure neither changes.
    pub fn update(&self, addr: IpAddr) -> Result<(), StoreError> {
        let mut mirror = self.mirror.write();
        self.store.write(&addr.to_string())?;
        *mirror = Some(addr);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::MockConfigStore;
    use crate::store::MemoryConfigStore;
    use std::time::Duration;

    #[test]
    fn test_signal_is_single_pending() {
        let signal = ReconnectSignal::new();
        assert!(!signal.take());

        signal.request_reconnect();
        signal.request_reconnect();
        assert!(signal.is_pending());
        assert!(signal.take());
        assert!(!signal.take());
    }

    #[tokio::test]
    async fn test_wait_consumes_signal() {
        let signal = Arc::new(ReconnectSignal::new());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.request_reconnect();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(!signal.is_pending());
    }

    #[test]
    fn test_settings_load_and_update() {
        let store = Arc::new(MemoryConfigStore::with_value("10.0.0.1"));
        let settings = ControlPlaneSettings::load(store.clone()).unwrap();
        assert_eq!(settings.current(), Some("10.0.0.1".parse().unwrap()));

        settings.update("10.0.0.9".parse().unwrap()).unwrap();
        assert_eq!(settings.current(), Some("10.0.0.9".parse().unwrap()));
        assert_eq!(store.value().as_deref(), Some("10.0.0.9"));
    }

    #[test]
    fn test_settings_ignore_invalid_stored_value() {
        let store = Arc::new(MemoryConfigStore::with_value("edge.example"));
        let settings = ControlPlaneSettings::load(store).unwrap();
        assert_eq!(settings.current(), None);
    }

    #[test]
    fn test_failed_write_leaves_mirror_unchanged() {
        let mut store = MockConfigStore::new();
        store.expect_read().returning(|| Ok(Some("10.0.0.1".to_string())));
        store
            .expect_write()
            .times(1)
            .returning(|_| Err(StoreError::Io("disk full".to_string())));

        let settings = ControlPlaneSettings::load(Arc::new(store)).unwrap();
        assert!(settings.update("10.0.0.2".parse().unwrap()).is_err());
        assert_eq!(settings.current(), Some("10.0.0.1".parse().unwrap()));
    }
}
