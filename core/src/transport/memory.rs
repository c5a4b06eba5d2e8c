// In-memory RFCOMM platform
//
// A scripted transport for tests and simulators: peers connect in-process,
// bind failures can be queued, and every socket call is recorded as a
// `PlatformEvent` so ordering properties can be asserted.

use super::socket::{BdAddr, Handle, RfcommPlatform, SocketError};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Recorded socket call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    Socket(Handle),
    Bind { channel: u8, ok: bool },
    Listen(Handle),
    AcceptStarted,
    AcceptReturned(Handle),
    Shutdown(Handle),
    Closed(Handle),
}

#[derive(Debug, Default)]
struct Connection {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    peer_closed: bool,
    reset: bool,
    closed: bool,
    send_would_block: u32,
}

#[derive(Debug, Default)]
struct State {
    next_handle: i32,
    shut_down: Vec<Handle>,
    closed: Vec<Handle>,
    pending: VecDeque<(Handle, BdAddr)>,
    connections: HashMap<Handle, Connection>,
    bind_failures: VecDeque<SocketError>,
    events: Vec<PlatformEvent>,
}

impl State {
    fn allocate(&mut self) -> Handle {
        self.next_handle += 1;
        Handle(self.next_handle)
    }

    fn is_dead(&self, handle: Handle) -> bool {
        self.shut_down.contains(&handle) || self.closed.contains(&handle)
    }
}

/// Scripted in-process RFCOMM transport
#[derive(Debug, Default)]
pub struct MemoryPlatform {
    state: Mutex<State>,
    accept_ready: Condvar,
}

impl MemoryPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a peer connection for the next `accept`
    pub fn connect(self: &Arc<Self>, peer: BdAddr) -> MemoryPeer {
        let mut state = self.state.lock();
        let handle = state.allocate();
        state.connections.insert(handle, Connection::default());
        state.pending.push_back((handle, peer));
        drop(state);
        self.accept_ready.notify_all();
        MemoryPeer {
            platform: Arc::clone(self),
            handle,
        }
    }

    /// Make the next `bind` calls fail with `errors`, in order
    pub fn fail_binds(&self, errors: impl IntoIterator<Item = SocketError>) {
        self.state.lock().bind_failures.extend(errors);
    }

    /// Snapshot of recorded socket calls
    pub fn events(&self) -> Vec<PlatformEvent> {
        self.state.lock().events.clone()
    }

    /// Number of `bind` calls so far
    pub fn bind_attempts(&self) -> usize {
        self.state
            .lock()
            .events
            .iter()
            .filter(|e| matches!(e, PlatformEvent::Bind { .. }))
            .count()
    }
}

impl RfcommPlatform for MemoryPlatform {
    fn socket(&self) -> Result<Handle, SocketError> {
        let mut state = self.state.lock();
        let handle = state.allocate();
        state.events.push(PlatformEvent::Socket(handle));
        Ok(handle)
    }

    fn set_reuse_addr(&self, _handle: Handle) -> Result<(), SocketError> {
        Ok(())
    }

    fn bind(&self, _handle: Handle, channel: u8) -> Result<(), SocketError> {
        let mut state = self.state.lock();
        let result = match state.bind_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        };
        state.events.push(PlatformEvent::Bind {
            channel,
            ok: result.is_ok(),
        });
        result
    }

    fn listen(&self, handle: Handle, _backlog: i32) -> Result<(), SocketError> {
        self.state.lock().events.push(PlatformEvent::Listen(handle));
        Ok(())
    }

    fn accept(&self, handle: Handle) -> Result<(Handle, BdAddr), SocketError> {
        let mut state = self.state.lock();
        state.events.push(PlatformEvent::AcceptStarted);
        loop {
            if state.is_dead(handle) {
                return Err(SocketError::Closed);
            }
            if let Some((conn, peer)) = state.pending.pop_front() {
                state.events.push(PlatformEvent::AcceptReturned(conn));
                return Ok((conn, peer));
            }
            self.accept_ready.wait(&mut state);
        }
    }

    fn recv(&self, handle: Handle, buf: &mut [u8]) -> Result<usize, SocketError> {
        let mut state = self.state.lock();
        let conn = state
            .connections
            .get_mut(&handle)
            .ok_or(SocketError::Closed)?;
        if conn.closed {
            return Err(SocketError::Closed);
        }
        if conn.reset {
            return Err(SocketError::ConnectionReset);
        }
        if conn.inbound.is_empty() {
            return if conn.peer_closed {
                Ok(0)
            } else {
                Err(SocketError::WouldBlock)
            };
        }
        let n = buf.len().min(conn.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(conn.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn send(&self, handle: Handle, data: &[u8]) -> Result<usize, SocketError> {
        let mut state = self.state.lock();
        let conn = state
            .connections
            .get_mut(&handle)
            .ok_or(SocketError::Closed)?;
        if conn.closed {
            return Err(SocketError::Closed);
        }
        if conn.reset {
            return Err(SocketError::ConnectionReset);
        }
        if conn.peer_closed {
            return Err(SocketError::BrokenPipe);
        }
        if conn.send_would_block > 0 {
            conn.send_would_block -= 1;
            return Err(SocketError::WouldBlock);
        }
        conn.outbound.extend_from_slice(data);
        Ok(data.len())
    }

    fn shutdown(&self, handle: Handle) -> Result<(), SocketError> {
        let mut state = self.state.lock();
        state.shut_down.push(handle);
        state.events.push(PlatformEvent::Shutdown(handle));
        drop(state);
        self.accept_ready.notify_all();
        Ok(())
    }

    fn close(&self, handle: Handle) -> Result<(), SocketError> {
        let mut state = self.state.lock();
        if state.closed.contains(&handle) {
            return Err(SocketError::Os {
                code: 9,
                message: "bad file descriptor".to_string(),
            });
        }
        state.closed.push(handle);
        if let Some(conn) = state.connections.get_mut(&handle) {
            conn.closed = true;
        }
        state.events.push(PlatformEvent::Closed(handle));
        drop(state);
        self.accept_ready.notify_all();
        Ok(())
    }
}

/// Client end of an in-memory connection
#[derive(Debug, Clone)]
pub struct MemoryPeer {
    platform: Arc<MemoryPlatform>,
    handle: Handle,
}

impl MemoryPeer {
    /// Server-side handle of this connection
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Deliver raw bytes to the server
    pub fn write(&self, bytes: &[u8]) {
        let mut state = self.platform.state.lock();
        if let Some(conn) = state.connections.get_mut(&self.handle) {
            conn.inbound.extend(bytes.iter().copied());
        }
    }

    /// Deliver `line` followed by `\n`
    pub fn send_line(&self, line: &str) {
        self.write(format!("{}\n", line).as_bytes());
    }

    /// Orderly close from the peer side
    pub fn close(&self) {
        let mut state = self.platform.state.lock();
        if let Some(conn) = state.connections.get_mut(&self.handle) {
            conn.peer_closed = true;
        }
    }

    /// Abortive close from the peer side
    pub fn reset(&self) {
        let mut state = self.platform.state.lock();
        if let Some(conn) = state.connections.get_mut(&self.handle) {
            conn.reset = true;
        }
    }

    /// Make the next `count` server sends report `WouldBlock`
    pub fn block_sends(&self, count: u32) {
        let mut state = self.platform.state.lock();
        if let Some(conn) = state.connections.get_mut(&self.handle) {
            conn.send_would_block = count;
        }
    }

    /// Whether the server has closed its end
    pub fn is_closed_by_server(&self) -> bool {
        self.platform
            .state
            .lock()
            .connections
            .get(&self.handle)
            .map(|conn| conn.closed)
            .unwrap_or(true)
    }

    /// Everything the server has sent and not yet read
    pub fn take_output(&self) -> String {
        let mut state = self.platform.state.lock();
        match state.connections.get_mut(&self.handle) {
            Some(conn) => String::from_utf8_lossy(&std::mem::take(&mut conn.outbound)).into_owned(),
            None => String::new(),
        }
    }

    fn try_read_line(&self) -> Option<String> {
        let mut state = self.platform.state.lock();
        let conn = state.connections.get_mut(&self.handle)?;
        let end = conn.outbound.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = conn.outbound.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line[..end]).into_owned())
    }

    /// Wait up to `timeout` for the next line the server sends
    pub async fn recv_line(&self, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(line) = self.try_read_line() {
                return Some(line);
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Wait up to `timeout` for the server to close its end
    pub async fn wait_closed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_closed_by_server() {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer_addr() -> BdAddr {
        BdAddr::from_display_bytes([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01])
    }

    #[test]
    fn test_recv_states() {
        let platform = MemoryPlatform::new();
        let peer = platform.connect(peer_addr());
        let mut buf = [0u8; 4];

        assert_eq!(platform.recv(peer.handle(), &mut buf), Err(SocketError::WouldBlock));

        peer.write(b"hello");
        assert_eq!(platform.recv(peer.handle(), &mut buf), Ok(4));
        assert_eq!(&buf, b"hell");
        assert_eq!(platform.recv(peer.handle(), &mut buf), Ok(1));

        peer.close();
        assert_eq!(platform.recv(peer.handle(), &mut buf), Ok(0));
        assert_eq!(platform.send(peer.handle(), b"x"), Err(SocketError::BrokenPipe));
    }

    #[test]
    fn test_reset_is_reported() {
        let platform = MemoryPlatform::new();
        let peer = platform.connect(peer_addr());
        peer.reset();

        let mut buf = [0u8; 4];
        assert_eq!(platform.recv(peer.handle(), &mut buf), Err(SocketError::ConnectionReset));
    }

    #[test]
    fn test_scripted_bind_failures() {
        let platform = MemoryPlatform::new();
        platform.fail_binds([SocketError::AddrInUse]);
        let handle = platform.socket().unwrap();

        assert_eq!(platform.bind(handle, 1), Err(SocketError::AddrInUse));
        assert_eq!(platform.bind(handle, 1), Ok(()));
        assert_eq!(platform.bind_attempts(), 2);
    }

    #[test]
    fn test_accept_returns_pending_peer() {
        let platform = MemoryPlatform::new();
        let listener = platform.socket().unwrap();
        let peer = platform.connect(peer_addr());

        let (handle, addr) = platform.accept(listener).unwrap();
        assert_eq!(handle, peer.handle());
        assert_eq!(addr.to_string(), "AA:BB:CC:DD:EE:01");
    }

    #[test]
    fn test_shutdown_wakes_blocked_accept() {
        let platform = MemoryPlatform::new();
        let listener = platform.socket().unwrap();

        let acceptor = {
            let platform = platform.clone();
            std::thread::spawn(move || platform.accept(listener))
        };
        std::thread::sleep(Duration::from_millis(20));
        platform.shutdown(listener).unwrap();

        assert_eq!(acceptor.join().unwrap(), Err(SocketError::Closed));
    }

    #[test]
    fn test_send_would_block_then_succeeds() {
        let platform = MemoryPlatform::new();
        let peer = platform.connect(peer_addr());
        peer.block_sends(1);

        assert_eq!(platform.send(peer.handle(), b"a\n"), Err(SocketError::WouldBlock));
        assert_eq!(platform.send(peer.handle(), b"a\n"), Ok(2));
        assert_eq!(peer.take_output(), "a\n");
    }

    #[test]
    fn test_double_close_is_an_error_not_a_panic() {
        let platform = MemoryPlatform::new();
        let handle = platform.socket().unwrap();
        assert!(platform.close(handle).is_ok());
        assert!(platform.close(handle).is_err());
    }

    #[tokio::test]
    async fn test_recv_line() {
        let platform = MemoryPlatform::new();
        let peer = platform.connect(peer_addr());
        platform.send(peer.handle(), b"PONG\nnext").unwrap();

        assert_eq!(peer.recv_line(Duration::from_millis(50)).await.as_deref(), Some("PONG"));
        assert_eq!(peer.recv_line(Duration::from_millis(20)).await, None);
        assert_eq!(peer.take_output(), "next");
    }
}
