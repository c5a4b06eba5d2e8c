//! Listening socket manager
//!
//! One listening socket per server run, created after releasing any stale
//! binding and kept open across client churn. A bind that finds the channel
//! in use triggers a forced adapter cleanup and exactly one retry.

use super::socket::{BdAddr, Descriptor, RfcommPlatform, SocketError};
use crate::adapter::AdapterManager;
use crate::config::ServerConfig;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on waiting for a blocked accept to unwind after shutdown
const ACCEPT_UNWIND_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors for the listening socket
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListenerError {
    #[error("RFCOMM channel {channel} still in use after forced cleanup: {source}")]
    BindConflict { channel: u8, source: SocketError },
    #[error("RFCOMM {op} failed: {source}")]
    Transport {
        op: &'static str,
        source: SocketError,
    },
    #[error("Listener cancelled")]
    Cancelled,
}

impl ListenerError {
    fn transport(op: &'static str, source: SocketError) -> Self {
        ListenerError::Transport { op, source }
    }
}

/// An accepted client connection
#[derive(Debug)]
pub struct Connection {
    pub descriptor: Descriptor,
    pub peer: BdAddr,
}

/// The single long-lived listening socket
#[derive(Debug)]
pub struct RfcommListener {
    descriptor: Arc<Descriptor>,
    channel: u8,
}

impl RfcommListener {
    /// Create, bind and listen on the configured channel
    pub async fn open(
        platform: Arc<dyn RfcommPlatform>,
        adapter: &AdapterManager,
        config: &ServerConfig,
    ) -> Result<Self, ListenerError> {
        let channel = config.channel;
        adapter.release_stale_binding().await;

        let handle = platform
            .socket()
            .map_err(|e| ListenerError::transport("socket", e))?;
        let descriptor = Descriptor::new(Arc::clone(&platform), handle);

        if let Err(e) = platform.set_reuse_addr(handle) {
            warn!("SO_REUSEADDR not applied to RFCOMM socket: {}", e);
        }

        match platform.bind(handle, channel) {
            Ok(()) => {}
            Err(SocketError::AddrInUse) => {
                warn!(channel, "RFCOMM channel in use, forcing cleanup before one retry");
                if let Err(e) = adapter.force_cleanup().await {
                    warn!("Forced cleanup did not complete: {}", e);
                }
                tokio::time::sleep(config.bind_retry_delay).await;
                platform
                    .bind(handle, channel)
                    .map_err(|source| ListenerError::BindConflict { channel, source })?;
                info!(channel, "🔁 Bind succeeded after forced cleanup");
            }
            Err(e) => return Err(ListenerError::transport("bind", e)),
        }

        platform
            .listen(handle, config.backlog)
            .map_err(|e| ListenerError::transport("listen", e))?;

        info!(channel, backlog = config.backlog, "📡 Listening for RFCOMM clients");
        Ok(Self {
            descriptor: Arc::new(descriptor),
            channel,
        })
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Wait for the next client.
    ///
    /// The blocking accept runs on the blocking pool. Cancelling shuts the
    /// listening socket down to wake it; a connection that raced the
    /// shutdown is closed rather than returned.
    pub async fn accept(&self, cancel: &CancellationToken) -> Result<Connection, ListenerError> {
        if cancel.is_cancelled() {
            return Err(ListenerError::Cancelled);
        }
        if self.descriptor.is_closed() {
            return Err(ListenerError::transport("accept", SocketError::Closed));
        }

        let platform = Arc::clone(self.descriptor.platform());
        let handle = self.descriptor.handle();
        let mut task = {
            let platform = Arc::clone(&platform);
            tokio::task::spawn_blocking(move || platform.accept(handle))
        };

        let joined = tokio::select! {
            joined = &mut task => Some(joined),
            _ = cancel.cancelled() => None,
        };

        match joined {
            Some(Ok(Ok((client, peer)))) => Ok(Connection {
                descriptor: Descriptor::new(platform, client),
                peer,
            }),
            Some(Ok(Err(_))) if cancel.is_cancelled() => Err(ListenerError::Cancelled),
            Some(Ok(Err(e))) => Err(ListenerError::transport("accept", e)),
            Some(Err(join)) => Err(ListenerError::transport(
                "accept",
                SocketError::Os {
                    code: -1,
                    message: join.to_string(),
                },
            )),
            None => {
                self.descriptor.shutdown();
                if let Ok(Ok(Ok((client, peer)))) =
                    tokio::time::timeout(ACCEPT_UNWIND_TIMEOUT, task).await
                {
                    debug!(peer = %peer, "Dropping connection accepted during shutdown");
                    Descriptor::new(platform, client).close();
                }
                Err(ListenerError::Cancelled)
            }
        }
    }

    /// Close the listening socket. Safe to repeat.
    pub fn close(&self) {
        self.descriptor.shutdown();
        if self.descriptor.close() {
            info!(channel = self.channel, "Listening socket closed");
        }
    }
}
