//! Linux RFCOMM sockets
//!
//! Thin `libc` wrappers implementing [`RfcommPlatform`]. `accept` waits in
//! short `poll` slices so a shutdown from another task is noticed even when
//! the kernel does not wake the blocked thread. Accepted sockets are
//! non-blocking so `recv`/`send` return `WouldBlock`.

use crate::transport::{BdAddr, Handle, RfcommPlatform, SocketError};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io;
use std::mem;

const AF_BLUETOOTH: libc::c_int = 31;
const BTPROTO_RFCOMM: libc::c_int = 3;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct SockaddrRc {
    rc_family: libc::sa_family_t,
    rc_bdaddr: [u8; 6],
    rc_channel: u8,
}

const SOCKADDR_RC_LEN: libc::socklen_t = mem::size_of::<SockaddrRc>() as libc::socklen_t;

/// Slice of one `poll` while waiting in `accept`, in milliseconds
const ACCEPT_POLL_MS: libc::c_int = 250;

/// Kernel RFCOMM sockets
#[derive(Debug, Default)]
pub struct LinuxRfcomm {
    shut_down: Mutex<HashSet<i32>>,
}

impl LinuxRfcomm {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_shut_down(&self, handle: Handle) -> bool {
        self.shut_down.lock().contains(&handle.0)
    }

    /// Wait until `handle` is readable; `false` on timeout
    fn wait_readable(&self, handle: Handle) -> Result<bool, SocketError> {
        let mut fds = libc::pollfd {
            fd: handle.0,
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: `fds` is a single valid pollfd for the duration of the call.
        let ready = unsafe { libc::poll(&mut fds, 1, ACCEPT_POLL_MS) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(from_io(err));
        }
        if fds.revents & libc::POLLNVAL != 0 {
            return Err(SocketError::Closed);
        }
        Ok(ready > 0)
    }
}

fn last_error() -> SocketError {
    from_io(io::Error::last_os_error())
}

fn from_io(err: io::Error) -> SocketError {
    match err.raw_os_error() {
        Some(code) => map_errno(code, err.to_string()),
        None => SocketError::Os {
            code: -1,
            message: err.to_string(),
        },
    }
}

fn map_errno(code: i32, message: String) -> SocketError {
    match code {
        c if c == libc::EAGAIN || c == libc::EWOULDBLOCK => SocketError::WouldBlock,
        libc::ECONNRESET => SocketError::ConnectionReset,
        libc::EPIPE => SocketError::BrokenPipe,
        libc::EADDRINUSE => SocketError::AddrInUse,
        libc::EBADF => SocketError::Closed,
        _ => SocketError::Os { code, message },
    }
}

fn check(ret: libc::c_int) -> Result<libc::c_int, SocketError> {
    if ret < 0 {
        Err(last_error())
    } else {
        Ok(ret)
    }
}

impl RfcommPlatform for LinuxRfcomm {
    fn socket(&self) -> Result<Handle, SocketError> {
        // SAFETY: plain syscall with constant arguments.
        let fd = check(unsafe {
            libc::socket(
                AF_BLUETOOTH,
                libc::SOCK_STREAM | libc::SOCK_CLOEXEC,
                BTPROTO_RFCOMM,
            )
        })?;
        Ok(Handle(fd))
    }

    fn set_reuse_addr(&self, handle: Handle) -> Result<(), SocketError> {
        let on: libc::c_int = 1;
        // SAFETY: `on` outlives the call and its size is passed alongside.
        check(unsafe {
            libc::setsockopt(
                handle.0,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &on as *const libc::c_int as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        })?;
        Ok(())
    }

    fn bind(&self, handle: Handle, channel: u8) -> Result<(), SocketError> {
        let addr = SockaddrRc {
            rc_family: AF_BLUETOOTH as libc::sa_family_t,
            rc_bdaddr: BdAddr::ANY.0,
            rc_channel: channel,
        };
        // SAFETY: `addr` is a valid sockaddr_rc for the duration of the call.
        check(unsafe {
            libc::bind(
                handle.0,
                &addr as *const SockaddrRc as *const libc::sockaddr,
                SOCKADDR_RC_LEN,
            )
        })?;
        Ok(())
    }

    fn listen(&self, handle: Handle, backlog: i32) -> Result<(), SocketError> {
        // SAFETY: plain syscall on an owned descriptor.
        check(unsafe { libc::listen(handle.0, backlog) })?;
        Ok(())
    }

    fn accept(&self, handle: Handle) -> Result<(Handle, BdAddr), SocketError> {
        loop {
            if self.is_shut_down(handle) {
                return Err(SocketError::Closed);
            }
            if !self.wait_readable(handle)? {
                continue;
            }

            let mut addr = SockaddrRc::default();
            let mut len = SOCKADDR_RC_LEN;
            // SAFETY: `addr` and `len` are writable and sized for sockaddr_rc.
            let fd = unsafe {
                libc::accept4(
                    handle.0,
                    &mut addr as *mut SockaddrRc as *mut libc::sockaddr,
                    &mut len,
                    libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                )
            };
            if fd >= 0 {
                return Ok((Handle(fd), BdAddr(addr.rc_bdaddr)));
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => {}
                _ => return Err(from_io(err)),
            }
        }
    }

    fn recv(&self, handle: Handle, buf: &mut [u8]) -> Result<usize, SocketError> {
        // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
        let n = unsafe {
            libc::recv(
                handle.0,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                libc::MSG_DONTWAIT,
            )
        };
        if n < 0 {
            Err(last_error())
        } else {
            Ok(n as usize)
        }
    }

    fn send(&self, handle: Handle, data: &[u8]) -> Result<usize, SocketError> {
        // SAFETY: `data` is valid for reads of `data.len()` bytes.
        let n = unsafe {
            libc::send(
                handle.0,
                data.as_ptr() as *const libc::c_void,
                data.len(),
                libc::MSG_NOSIGNAL | libc::MSG_DONTWAIT,
            )
        };
        if n < 0 {
            Err(last_error())
        } else {
            Ok(n as usize)
        }
    }

    fn shutdown(&self, handle: Handle) -> Result<(), SocketError> {
        self.shut_down.lock().insert(handle.0);
        // SAFETY: plain syscall on an owned descriptor.
        check(unsafe { libc::shutdown(handle.0, libc::SHUT_RDWR) })?;
        Ok(())
    }

    fn close(&self, handle: Handle) -> Result<(), SocketError> {
        self.shut_down.lock().remove(&handle.0);
        // SAFETY: the caller's `Descriptor` guarantees a single close.
        check(unsafe { libc::close(handle.0) })?;
        Ok(())
    }
}
