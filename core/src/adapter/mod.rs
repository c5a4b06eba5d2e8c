//! Adapter lifecycle
//!
//! Brings the Bluetooth adapter to a discoverable, connectable state under a
//! name derived from the device id, advertises the provisioning service, and
//! keeps the paired-device list clean between clients. All OS work goes
//! through the [`AdapterControl`] collaborator.

pub mod naming;
pub mod sdp;

pub use naming::{adapter_name, name_suffix, service_uuid, DEFAULT_SERVICE_UUID};
pub use sdp::{ServiceRecord, SERVICE_NAME};

use crate::config::ServerConfig;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Errors for adapter operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("Adapter initialization failed: {0}")]
    InitFailed(String),
    #[error("Adapter command failed: {0}")]
    CommandFailed(String),
    #[error("Adapter tool unavailable: {0}")]
    Unavailable(String),
}

/// Adapter facts reported after power-on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// Adapter address, `AA:BB:CC:DD:EE:FF`
    pub address: String,
    /// Name the adapter now advertises
    pub name: String,
}

/// A device known to the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedDevice {
    pub address: String,
    pub name: String,
    pub connected: bool,
}

/// OS-level adapter control
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdapterControl: Send + Sync {
    /// Power on, set the name, and make the adapter discoverable and pairable
    async fn power_on(&self, name: &str) -> Result<AdapterInfo, AdapterError>;
    /// Advertise the service record
    async fn register_service(&self, record: &ServiceRecord) -> Result<(), AdapterError>;
    /// Withdraw the service record
    async fn unregister_service(&self, record: &ServiceRecord) -> Result<(), AdapterError>;
    /// Release a stale binding on `channel`
    async fn release_channel(&self, channel: u8) -> Result<(), AdapterError>;
    /// Restart the Bluetooth daemon and wait for it to settle
    async fn restart_daemon(&self) -> Result<(), AdapterError>;
    /// Devices the adapter knows about
    async fn list_devices(&self) -> Result<Vec<PairedDevice>, AdapterError>;
    /// Forget a device
    async fn remove_device(&self, address: &str) -> Result<(), AdapterError>;
}

/// Owns the adapter's identity and drives its lifecycle
pub struct AdapterManager {
    control: Arc<dyn AdapterControl>,
    name: String,
    record: ServiceRecord,
    channel: u8,
    info: RwLock<Option<AdapterInfo>>,
}

impl AdapterManager {
    /// Create a manager; name and service UUID derive from the configured id
    pub fn new(control: Arc<dyn AdapterControl>, config: &ServerConfig) -> Self {
        let device_id = config.device_id.as_deref();
        let name = adapter_name(&config.name_prefix, device_id, &config.device_label);
        let uuid = service_uuid(device_id);
        Self {
            control,
            name,
            record: ServiceRecord::new(uuid, config.channel),
            channel: config.channel,
            info: RwLock::new(None),
        }
    }

    /// Advertised name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Advertised service UUID
    pub fn service_uuid(&self) -> Uuid {
        self.record.uuid
    }

    /// Advertised service record
    pub fn service_record(&self) -> &ServiceRecord {
        &self.record
    }

    /// Adapter address once brought up
    pub fn address(&self) -> Option<String> {
        self.info.read().as_ref().map(|info| info.address.clone())
    }

    /// Bring the adapter up and advertise the service. Safe to repeat.
    ///
    /// Power-on failure is fatal to the caller. Service registration is
    /// best effort: clients can still connect to the fixed channel directly.
    pub async fn bring_up(&self) -> Result<AdapterInfo, AdapterError> {
        info!("📡 Bringing up Bluetooth adapter as '{}'", self.name);
        let info = self
            .control
            .power_on(&self.name)
            .await
            .map_err(|e| match e {
                AdapterError::InitFailed(_) => e,
                other => AdapterError::InitFailed(other.to_string()),
            })?;

        match self.control.register_service(&self.record).await {
            Ok(()) => info!(uuid = %self.record.uuid, channel = self.channel, "📡 Service record registered"),
            Err(e) => warn!(
                "Service record registration failed, clients must connect to channel {} directly: {}",
                self.channel, e
            ),
        }

        info!(address = %info.address, "✅ Adapter ready");
        *self.info.write() = Some(info.clone());
        Ok(info)
    }

    /// Release any stale binding on the provisioning channel (best effort)
    pub async fn release_stale_binding(&self) {
        if let Err(e) = self.control.release_channel(self.channel).await {
            debug!("Releasing channel {} failed: {}", self.channel, e);
        }
    }

    /// Recover from a channel conflict: release the binding, restart the
    /// daemon, and bring the adapter back up
    pub async fn force_cleanup(&self) -> Result<(), AdapterError> {
        warn!("🧹 Forcing cleanup of RFCOMM channel {}", self.channel);
        self.release_stale_binding().await;
        if let Err(e) = self.control.restart_daemon().await {
            warn!("Bluetooth daemon restart failed: {}", e);
        }
        self.bring_up().await.map(|_| ())
    }

    /// Forget every known device so the next client pairs from scratch
    pub async fn remove_all_devices(&self) -> usize {
        self.remove_devices(|_| true).await
    }

    /// Forget devices that are not currently connected
    pub async fn sweep_disconnected(&self) -> usize {
        self.remove_devices(|device| !device.connected).await
    }

    async fn remove_devices(&self, select: impl Fn(&PairedDevice) -> bool) -> usize {
        let devices = match self.control.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                debug!("Listing paired devices failed: {}", e);
                return 0;
            }
        };

        let mut removed = 0;
        for device in devices.iter().filter(|d| select(d)) {
            match self.control.remove_device(&device.address).await {
                Ok(()) => {
                    info!(address = %device.address, "Removed paired device '{}'", device.name);
                    removed += 1;
                }
                Err(e) => warn!(address = %device.address, "Removing paired device failed: {}", e),
            }
        }
        removed
    }

    /// Periodically forget disconnected devices until `cancel` fires
    pub async fn run_sweep(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    let removed = self.sweep_disconnected().await;
                    if removed > 0 {
                        debug!("Maintenance sweep removed {} device(s)", removed);
                    }
                }
            }
        }
        debug!("Maintenance sweep stopped");
    }

    /// Withdraw the service record and release the channel (best effort)
    pub async fn teardown(&self) {
        if let Err(e) = self.control.unregister_service(&self.record).await {
            debug!("Unregistering service record failed: {}", e);
        }
        self.release_stale_binding().await;
        info!("📡 Adapter torn down");
    }
}
