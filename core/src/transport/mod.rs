// Transport: RFCOMM sockets, the listening socket, and client sessions

pub mod listener;
pub mod memory;
pub mod registry;
pub mod session;
pub mod socket;

pub use listener::{Connection, ListenerError, RfcommListener};
pub use memory::{MemoryPeer, MemoryPlatform, PlatformEvent};
pub use registry::{ClientSession, RegistryStats, SessionRegistry, SessionState};
pub use session::{CloseReason, LineBuffer, MessageHandler, SessionHandler, SessionSummary};
pub use socket::{BdAddr, Descriptor, Handle, RfcommPlatform, Severity, SocketError};
