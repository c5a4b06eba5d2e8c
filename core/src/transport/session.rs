//! Connection session handler
//!
//! Drives one accepted client through
//! `Connected → Receiving → Processing → Responding → Receiving … → Closed`.
//! Input is polled in fixed windows; a line terminator or an expired window
//! with buffered bytes produces a message. A message identical to the last
//! line this session sent is a transport loop-back and gets no reply.

use super::listener::Connection;
use super::registry::{ClientSession, SessionRegistry, SessionState};
use super::socket::{BdAddr, Descriptor, Severity, SocketError};
use crate::config::ServerConfig;
use crate::message::{decode_line, Inbound};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Receive buffer size per `recv` call
const RECV_CHUNK: usize = 1024;

/// Produces the reply line for a decoded inbound message
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, inbound: Inbound) -> String;
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Zero-byte read
    PeerClosed,
    /// Reset or broken pipe while receiving
    Reset,
    /// Any other receive failure
    ReceiveFailed(SocketError),
    /// Writing a reply failed after the single retry
    SendFailed(SocketError),
    /// Server shutdown
    Cancelled,
}

/// Final record of a finished session
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: Uuid,
    pub peer: BdAddr,
    pub reason: CloseReason,
    pub messages_received: u64,
    pub responses_sent: u64,
    pub echoes_suppressed: u64,
    pub duration: Duration,
}

/// Reassembles lines from a byte stream
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    max_line_bytes: usize,
}

impl LineBuffer {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line_bytes,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take every complete line, leaving any unterminated tail buffered.
    /// A tail longer than the line limit is taken as-is.
    pub fn take_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        if self.buf.len() > self.max_line_bytes {
            lines.extend(self.take_partial());
        }
        lines
    }

    /// Take the unterminated tail, if any
    pub fn take_partial(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let bytes = std::mem::take(&mut self.buf);
        let text = String::from_utf8_lossy(&bytes);
        Some(text.trim_end_matches('\r').to_string())
    }
}

enum Received {
    Lines(Vec<String>),
    Nothing,
}

/// Runs the receive/respond loop for one client at a time
pub struct SessionHandler {
    handler: Arc<dyn MessageHandler>,
    registry: SessionRegistry,
    config: ServerConfig,
}

impl SessionHandler {
    pub fn new(handler: Arc<dyn MessageHandler>, registry: SessionRegistry, config: ServerConfig) -> Self {
        Self {
            handler,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Service `conn` until it closes. The descriptor is closed on return.
    pub async fn run(&self, conn: Connection, cancel: &CancellationToken) -> SessionSummary {
        let Connection { descriptor, peer } = conn;
        let started = Instant::now();
        let id = self.registry.open(peer);
        tracing::info!(session = %id, peer = %peer, "🔗 Client connected");

        let mut buffer = LineBuffer::new(self.config.max_line_bytes);
        let reason = loop {
            if cancel.is_cancelled() {
                break CloseReason::Cancelled;
            }
            self.registry.set_state(id, SessionState::Receiving);

            let lines = match self.receive(&descriptor, &mut buffer, cancel).await {
                Ok(Received::Lines(lines)) => lines,
                Ok(Received::Nothing) => {
                    tokio::time::sleep(self.config.idle_backoff).await;
                    continue;
                }
                Err(reason) => break reason,
            };

            if let Err(reason) = self.process_lines(id, &descriptor, lines).await {
                break reason;
            }
        };

        descriptor.close();
        let record = self.registry.close(id);
        let summary = summarize(id, peer, reason, record, started.elapsed());
        tracing::info!(
            session = %id,
            peer = %peer,
            reason = ?summary.reason,
            received = summary.messages_received,
            sent = summary.responses_sent,
            "🔌 Client session closed"
        );
        summary
    }

    async fn process_lines(
        &self,
        id: Uuid,
        descriptor: &Descriptor,
        lines: Vec<String>,
    ) -> Result<(), CloseReason> {
        for line in lines {
            let Some(decoded) = decode_line(&line) else {
                continue;
            };

            if let Some(last) = self.registry.last_sent(id) {
                let echoed = line == last || (decoded.was_base64 && decoded.text == last);
                if echoed {
                    tracing::debug!(session = %id, "Suppressed echo of last reply");
                    self.registry.record_echo(id);
                    continue;
                }
            }

            self.registry.touch(id);
            self.registry.set_state(id, SessionState::Processing);
            tracing::debug!(session = %id, base64 = decoded.was_base64, "📨 Message received");
            let reply = self.handler.handle(decoded.inbound).await;

            self.registry.set_state(id, SessionState::Responding);
            self.send_line(descriptor, &reply)
                .await
                .map_err(CloseReason::SendFailed)?;
            self.registry.record_sent(id, &reply);
        }
        Ok(())
    }

    /// Poll for input for one window
    async fn receive(
        &self,
        descriptor: &Descriptor,
        buffer: &mut LineBuffer,
        cancel: &CancellationToken,
    ) -> Result<Received, CloseReason> {
        let deadline = Instant::now() + self.config.poll_window;
        let mut chunk = [0u8; RECV_CHUNK];

        loop {
            match descriptor.recv(&mut chunk) {
                Ok(0) => return Err(CloseReason::PeerClosed),
                Ok(n) => {
                    buffer.push(&chunk[..n]);
                    let lines = buffer.take_lines();
                    if !lines.is_empty() {
                        return Ok(Received::Lines(lines));
                    }
                    continue;
                }
                Err(e) if e.severity() == Severity::Transient => {}
                Err(SocketError::ConnectionReset) | Err(SocketError::BrokenPipe) => {
                    return Err(CloseReason::Reset)
                }
                Err(e) => return Err(CloseReason::ReceiveFailed(e)),
            }

            if Instant::now() >= deadline || cancel.is_cancelled() {
                break;
            }
            tokio::time::sleep(self.config.would_block_backoff).await;
        }

        match buffer.take_partial() {
            Some(partial) => {
                tracing::debug!("Poll window elapsed with an unterminated message, processing it");
                Ok(Received::Lines(vec![partial]))
            }
            None => Ok(Received::Nothing),
        }
    }

    /// Write `line` plus terminator, retrying once after a would-block
    async fn send_line(&self, descriptor: &Descriptor, line: &str) -> Result<(), SocketError> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');

        tokio::time::sleep(self.config.pre_send_delay).await;

        let mut written = 0;
        let mut retried = false;
        while written < bytes.len() {
            match descriptor.send(&bytes[written..]) {
                Ok(0) => return Err(SocketError::BrokenPipe),
                Ok(n) => written += n,
                Err(SocketError::WouldBlock) if !retried => {
                    retried = true;
                    tracing::debug!("Send would block, retrying once");
                    tokio::time::sleep(self.config.send_retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        tokio::time::sleep(self.config.post_send_delay).await;
        Ok(())
    }
}

fn summarize(
    id: Uuid,
    peer: BdAddr,
    reason: CloseReason,
    record: Option<ClientSession>,
    duration: Duration,
) -> SessionSummary {
    let (messages_received, responses_sent, echoes_suppressed) = record
        .map(|s| (s.messages_received, s.responses_sent, s.echoes_suppressed))
        .unwrap_or_default();
    SessionSummary {
        id,
        peer,
        reason,
        messages_received,
        responses_sent,
        echoes_suppressed,
        duration,
    }
}
