//! Provisioning server
//!
//! Owns the run loop: bring the adapter up once, open one listening socket,
//! then serve clients strictly one at a time. A new `accept` starts only
//! after the previous session has closed its descriptor. A maintenance sweep
//! forgets disconnected paired devices on its own timer. Cancellation closes
//! the listener and returns after the current session notices it.

use crate::adapter::{AdapterControl, AdapterError, AdapterInfo, AdapterManager};
use crate::config::{ConfigError, ServerConfig};
use crate::control::{ControlChannel, ControlPlaneSettings};
use crate::identity::DeviceIdentity;
use crate::provisioning::{
    CommandDispatcher, DeviceInfo, LivenessProbe, NetworkConfig, WifiActivation,
    WifiActivationConfig,
};
use crate::store::{ConfigStore, StoreError};
use crate::transport::{
    ListenerError, RfcommListener, RfcommPlatform, SessionHandler, SessionRegistry,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Errors that stop the server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("Transport initialization failed: {0}")]
    TransportInit(#[from] AdapterError),
    #[error("Listening socket failed: {0}")]
    Listener(#[from] ListenerError),
    #[error("Control-plane settings unavailable: {0}")]
    Settings(#[from] StoreError),
}

// ============================================================================
// SERVER
// ============================================================================

/// Everything the server talks to outside this crate
#[derive(Clone)]
pub struct Collaborators {
    pub platform: Arc<dyn RfcommPlatform>,
    pub adapter: Arc<dyn AdapterControl>,
    pub network: Arc<dyn NetworkConfig>,
    pub probe: Arc<dyn LivenessProbe>,
    pub store: Arc<dyn ConfigStore>,
    pub control: Arc<dyn ControlChannel>,
}

/// Secure RFCOMM provisioning server
pub struct ProvisioningServer {
    config: ServerConfig,
    identity: Arc<DeviceIdentity>,
    collaborators: Collaborators,
    settings: Arc<ControlPlaneSettings>,
    registry: SessionRegistry,
}

impl ProvisioningServer {
    /// Validate configuration and load the persisted control-plane address
    pub fn new(
        config: ServerConfig,
        identity: DeviceIdentity,
        collaborators: Collaborators,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let settings = ControlPlaneSettings::load(Arc::clone(&collaborators.store))?;
        if let Some(addr) = settings.current() {
            info!(%addr, "Control-plane address loaded");
        }

        Ok(Self {
            config,
            identity: Arc::new(identity),
            collaborators,
            settings: Arc::new(settings),
            registry: SessionRegistry::new(),
        })
    }

    /// Control-plane address shared with the control channel
    pub fn settings(&self) -> Arc<ControlPlaneSettings> {
        Arc::clone(&self.settings)
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serve until `cancel` fires or a fatal transport error occurs
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ServerError> {
        let adapter = Arc::new(AdapterManager::new(
            Arc::clone(&self.collaborators.adapter),
            &self.config,
        ));
        let info = adapter.bring_up().await?;

        let sweep_cancel = cancel.child_token();
        let sweep = tokio::spawn(
            Arc::clone(&adapter).run_sweep(self.config.sweep_interval, sweep_cancel.clone()),
        );

        let result = self.serve(&adapter, info, &cancel).await;
        if let Err(e) = &result {
            error!("Provisioning server stopped: {}", e);
        }

        sweep_cancel.cancel();
        if let Err(e) = sweep.await {
            warn!("Maintenance sweep task ended abnormally: {}", e);
        }
        adapter.teardown().await;

        let stats = self.registry.stats();
        info!(
            sessions = stats.sessions_total,
            messages = stats.messages_received,
            "Provisioning server stopped"
        );
        result
    }

    async fn serve(
        &self,
        adapter: &AdapterManager,
        info: AdapterInfo,
        cancel: &CancellationToken,
    ) -> Result<(), ServerError> {
        let listener = RfcommListener::open(
            Arc::clone(&self.collaborators.platform),
            adapter,
            &self.config,
        )
        .await?;

        let sessions = SessionHandler::new(
            Arc::new(self.dispatcher(adapter, info)),
            self.registry.clone(),
            self.config.clone(),
        );

        info!(
            name = adapter.name(),
            uuid = %adapter.service_uuid(),
            channel = self.config.channel,
            "✅ Provisioning server ready"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match listener.accept(cancel).await {
                Ok(conn) => {
                    info!(peer = %conn.peer, "📲 Client accepted");
                    sessions.run(conn, cancel).await;

                    let removed = adapter.remove_all_devices().await;
                    if removed > 0 {
                        info!("🧹 Removed {} paired device(s) after session", removed);
                    }
                    if pause(self.config.between_sessions_delay, cancel).await {
                        break;
                    }
                }
                Err(ListenerError::Cancelled) => break,
                Err(e) => {
                    warn!("Accept failed, retrying: {}", e);
                    if pause(self.config.accept_retry_delay, cancel).await {
                        break;
                    }
                }
            }
        }

        listener.close();
        Ok(())
    }

    fn dispatcher(&self, adapter: &AdapterManager, info: AdapterInfo) -> CommandDispatcher {
        let wifi = WifiActivation::new(
            Arc::clone(&self.collaborators.network),
            Arc::clone(&self.collaborators.probe),
            Arc::clone(&self.settings),
            Arc::clone(&self.collaborators.control),
            WifiActivationConfig::from(&self.config),
        );
        let device = DeviceInfo {
            name: adapter.name().to_string(),
            address: info.address,
            channel: self.config.channel,
        };
        CommandDispatcher::new(Arc::clone(&self.identity), wifi, device)
    }
}

/// Sleep for `delay`; returns `true` when cancelled first
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
