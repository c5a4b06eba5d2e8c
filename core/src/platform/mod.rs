//! Host integration for Linux
//!
//! - External command execution (`command`)
//! - BlueZ adapter control (`bluez`)
//! - NetworkManager WiFi configuration (`nmcli`)
//! - ICMP liveness probing (`ping`)
//! - Kernel RFCOMM sockets (`rfcomm`, Linux only)

pub mod bluez;
pub mod command;
pub mod nmcli;
pub mod ping;
#[cfg(target_os = "linux")]
pub mod rfcomm;

pub use bluez::{BluezAdapter, DEFAULT_HCI};
pub use command::{CommandError, CommandOutput, CommandRunner, SystemRunner};
pub use nmcli::{NmcliNetwork, DEFAULT_INTERFACE};
pub use ping::PingProbe;
#[cfg(target_os = "linux")]
pub use rfcomm::LinuxRfcomm;
