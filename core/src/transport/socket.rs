// Platform socket abstraction for RFCOMM
//
// The protocol logic never touches raw descriptors; it speaks to an
// `RfcommPlatform` through opaque handles. Linux provides the real syscalls,
// `MemoryPlatform` a scripted in-process transport.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Opaque socket handle issued by a platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub i32);

/// Bluetooth device address as stored by the kernel (little-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BdAddr(pub [u8; 6]);

impl BdAddr {
    /// Wildcard local address
    pub const ANY: BdAddr = BdAddr([0; 6]);

    /// Build from the human-readable (big-endian) byte order
    pub fn from_display_bytes(bytes: [u8; 6]) -> Self {
        let mut reversed = bytes;
        reversed.reverse();
        BdAddr(reversed)
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

/// Whether a socket error ends the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// No data yet; keep polling
    Transient,
    /// The connection is unusable
    Fatal,
}

/// Errors for socket operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SocketError {
    #[error("Operation would block")]
    WouldBlock,
    #[error("Connection reset by peer")]
    ConnectionReset,
    #[error("Broken pipe")]
    BrokenPipe,
    #[error("Address already in use")]
    AddrInUse,
    #[error("Socket closed")]
    Closed,
    #[error("OS error {code}: {message}")]
    Os { code: i32, message: String },
}

impl SocketError {
    /// Classify for the receive loop
    pub fn severity(&self) -> Severity {
        match self {
            SocketError::WouldBlock => Severity::Transient,
            _ => Severity::Fatal,
        }
    }
}

/// RFCOMM socket primitives.
///
/// `accept` blocks until a peer connects or the listening handle is shut
/// down; `recv` and `send` never block and report `WouldBlock` instead.
/// `recv` returning `Ok(0)` means the peer closed the connection.
pub trait RfcommPlatform: Send + Sync {
    fn socket(&self) -> Result<Handle, SocketError>;
    fn set_reuse_addr(&self, handle: Handle) -> Result<(), SocketError>;
    fn bind(&self, handle: Handle, channel: u8) -> Result<(), SocketError>;
    fn listen(&self, handle: Handle, backlog: i32) -> Result<(), SocketError>;
    fn accept(&self, handle: Handle) -> Result<(Handle, BdAddr), SocketError>;
    fn recv(&self, handle: Handle, buf: &mut [u8]) -> Result<usize, SocketError>;
    fn send(&self, handle: Handle, data: &[u8]) -> Result<usize, SocketError>;
    /// Shut both directions down; wakes a blocked `accept`
    fn shutdown(&self, handle: Handle) -> Result<(), SocketError>;
    fn close(&self, handle: Handle) -> Result<(), SocketError>;
}

/// Owned handle that is closed exactly once, explicitly or on drop
pub struct Descriptor {
    platform: Arc<dyn RfcommPlatform>,
    handle: Handle,
    closed: AtomicBool,
}

impl Descriptor {
    pub fn new(platform: Arc<dyn RfcommPlatform>, handle: Handle) -> Self {
        Self {
            platform,
            handle,
            closed: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn platform(&self) -> &Arc<dyn RfcommPlatform> {
        &self.platform
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn recv(&self, buf: &mut [u8]) -> Result<usize, SocketError> {
        if self.is_closed() {
            return Err(SocketError::Closed);
        }
        self.platform.recv(self.handle, buf)
    }

    pub fn send(&self, data: &[u8]) -> Result<usize, SocketError> {
        if self.is_closed() {
            return Err(SocketError::Closed);
        }
        self.platform.send(self.handle, data)
    }

    /// Shut the socket down without releasing the handle
    pub fn shutdown(&self) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.platform.shutdown(self.handle) {
            tracing::debug!("shutdown({:?}) failed: {}", self.handle, e);
        }
    }

    /// Close the handle. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Err(e) = self.platform.close(self.handle) {
            tracing::debug!("close({:?}) failed: {}", self.handle, e);
        }
        true
    }
}

impl Drop for Descriptor {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("handle", &self.handle)
            .field("closed", &self.is_closed())
            .finish()
    }
}
