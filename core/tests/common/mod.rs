//! Shared fakes for the integration tests
//!
//! The server runs against `MemoryPlatform` and these in-process stand-ins
//! for the adapter, WiFi configuration and liveness probe.

#![allow(dead_code)]

use async_trait::async_trait;
use edgelink_core::adapter::{AdapterControl, AdapterError, AdapterInfo, PairedDevice, ServiceRecord};
use edgelink_core::identity::{public_key_from_pem, DeviceKeys};
use edgelink_core::provisioning::{
    LivenessProbe, NetworkConfig, NetworkError, NetworkInfo, ProbeError,
};
use edgelink_core::{
    Collaborators, DeviceIdentity, MemoryConfigStore, MemoryPlatform, ProvisioningServer,
    ReconnectSignal, ServerConfig, ServerError,
};
use parking_lot::Mutex;
use rsa::RsaPublicKey;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEVICE_ID: &str = "edge-7f3a9c01";
pub const ADAPTER_ADDRESS: &str = "B8:27:EB:00:00:01";

const PRIVATE_PEM: &str = include_str!("../../testdata/device_key.pem");
const PUBLIC_PEM: &str = include_str!("../../testdata/device_key.pub.pem");

pub fn device_keys() -> DeviceKeys {
    DeviceKeys::from_pem(PRIVATE_PEM).unwrap()
}

pub fn public_key() -> RsaPublicKey {
    public_key_from_pem(PUBLIC_PEM).unwrap()
}

pub fn fast_config() -> ServerConfig {
    ServerConfig::new(DEVICE_ID)
        .with_compressed_timing(Duration::from_millis(20), Duration::from_millis(1))
        .with_probes(3, Duration::from_millis(10), Duration::from_millis(1))
}

// ============================================================================
// ADAPTER
// ============================================================================

#[derive(Default)]
pub struct FakeAdapter {
    calls: Mutex<Vec<String>>,
    devices: Mutex<Vec<PairedDevice>>,
}

impl FakeAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pair(&self, address: &str, connected: bool) {
        self.devices.lock().push(PairedDevice {
            address: address.to_string(),
            name: "phone".to_string(),
            connected,
        });
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl AdapterControl for FakeAdapter {
    async fn power_on(&self, name: &str) -> Result<AdapterInfo, AdapterError> {
        self.record(format!("power_on {}", name));
        Ok(AdapterInfo {
            address: ADAPTER_ADDRESS.to_string(),
            name: name.to_string(),
        })
    }

    async fn register_service(&self, record: &ServiceRecord) -> Result<(), AdapterError> {
        self.record(format!("register {}", record.uuid));
        Ok(())
    }

    async fn unregister_service(&self, record: &ServiceRecord) -> Result<(), AdapterError> {
        self.record(format!("unregister {}", record.uuid));
        Ok(())
    }

    async fn release_channel(&self, channel: u8) -> Result<(), AdapterError> {
        self.record(format!("release {}", channel));
        Ok(())
    }

    async fn restart_daemon(&self) -> Result<(), AdapterError> {
        self.record("restart".to_string());
        Ok(())
    }

    async fn list_devices(&self) -> Result<Vec<PairedDevice>, AdapterError> {
        Ok(self.devices.lock().clone())
    }

    async fn remove_device(&self, address: &str) -> Result<(), AdapterError> {
        self.record(format!("remove {}", address));
        self.devices.lock().retain(|d| d.address != address);
        Ok(())
    }
}

// ============================================================================
// NETWORK
// ============================================================================

/// WiFi stand-in: activation associates with the requested SSID
pub struct FakeNetwork {
    enabled: bool,
    visible: Vec<NetworkInfo>,
    active: Mutex<Option<String>>,
    activations: Mutex<Vec<(String, String)>>,
}

impl FakeNetwork {
    pub fn with_visible(ssids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            enabled: true,
            visible: ssids
                .iter()
                .map(|ssid| NetworkInfo {
                    ssid: ssid.to_string(),
                    signal: 70,
                    security: "WPA2".to_string(),
                })
                .collect(),
            active: Mutex::new(None),
            activations: Mutex::new(Vec::new()),
        })
    }

    pub fn activations(&self) -> Vec<(String, String)> {
        self.activations.lock().clone()
    }
}

#[async_trait]
impl NetworkConfig for FakeNetwork {
    async fn is_enabled(&self) -> Result<bool, NetworkError> {
        Ok(self.enabled)
    }

    async fn network_available(&self, ssid: &str) -> Result<bool, NetworkError> {
        Ok(self.visible.iter().any(|n| n.ssid == ssid))
    }

    async fn network_info(&self, ssid: &str) -> Result<Option<NetworkInfo>, NetworkError> {
        Ok(self.visible.iter().find(|n| n.ssid == ssid).cloned())
    }

    async fn visible_networks(&self) -> Result<Vec<NetworkInfo>, NetworkError> {
        Ok(self.visible.clone())
    }

    async fn remove_profile(&self, _ssid: &str) -> Result<(), NetworkError> {
        Ok(())
    }

    async fn activate(&self, ssid: &str, password: &str) -> Result<(), NetworkError> {
        self.activations
            .lock()
            .push((ssid.to_string(), password.to_string()));
        *self.active.lock() = Some(ssid.to_string());
        Ok(())
    }

    async fn active_ssid(&self) -> Result<Option<String>, NetworkError> {
        Ok(self.active.lock().clone())
    }
}

// ============================================================================
// PROBE
// ============================================================================

/// Fails the first `failures` probes, then answers
#[derive(Default)]
pub struct FakeProbe {
    failures: AtomicU32,
    calls: AtomicU32,
}

impl FakeProbe {
    pub fn failing(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LivenessProbe for FakeProbe {
    async fn probe(&self, _addr: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProbeError::Timeout(timeout));
        }
        Ok(Duration::from_millis(2))
    }
}

// ============================================================================
// HARNESS
// ============================================================================

/// A running server and handles to everything it talks to
pub struct Harness {
    pub platform: Arc<MemoryPlatform>,
    pub adapter: Arc<FakeAdapter>,
    pub network: Arc<FakeNetwork>,
    pub probe: Arc<FakeProbe>,
    pub store: Arc<MemoryConfigStore>,
    pub signal: Arc<ReconnectSignal>,
    pub server: Arc<ProvisioningServer>,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), ServerError>>,
}

pub struct HarnessBuilder {
    config: ServerConfig,
    keys: Option<DeviceKeys>,
    platform: Arc<MemoryPlatform>,
    network: Arc<FakeNetwork>,
    probe: Arc<FakeProbe>,
    store: Arc<MemoryConfigStore>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            config: fast_config(),
            keys: Some(device_keys()),
            platform: MemoryPlatform::new(),
            network: FakeNetwork::with_visible(&["Lab"]),
            probe: FakeProbe::failing(0),
            store: Arc::new(MemoryConfigStore::new()),
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn without_keys(mut self) -> Self {
        self.keys = None;
        self
    }

    pub fn platform(mut self, platform: Arc<MemoryPlatform>) -> Self {
        self.platform = platform;
        self
    }

    pub fn network(mut self, network: Arc<FakeNetwork>) -> Self {
        self.network = network;
        self
    }

    pub fn probe(mut self, probe: Arc<FakeProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn store(mut self, store: Arc<MemoryConfigStore>) -> Self {
        self.store = store;
        self
    }

    pub fn start(self) -> Harness {
        let adapter = FakeAdapter::new();
        let signal = Arc::new(ReconnectSignal::new());
        let identity = DeviceIdentity::new(self.config.device_id.clone(), self.keys);
        let collaborators = Collaborators {
            platform: self.platform.clone(),
            adapter: adapter.clone(),
            network: self.network.clone(),
            probe: self.probe.clone(),
            store: self.store.clone(),
            control: signal.clone(),
        };
        let server = Arc::new(ProvisioningServer::new(self.config, identity, collaborators).unwrap());

        let cancel = CancellationToken::new();
        let task = {
            let server = server.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { server.run(cancel).await })
        };

        Harness {
            platform: self.platform,
            adapter,
            network: self.network,
            probe: self.probe,
            store: self.store,
            signal,
            server,
            cancel,
            task,
        }
    }
}

impl Harness {
    /// Cancel the server and wait for `run` to return
    pub async fn stop(self) -> Result<(), ServerError> {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server did not stop after cancellation")
            .expect("server task panicked")
    }

    /// Wait for `run` to return without cancelling
    pub async fn join(self) -> Result<(), ServerError> {
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
    }
}
