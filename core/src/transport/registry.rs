//! Session registry: bookkeeping for accepted clients

use super::socket::BdAddr;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Per-connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Receiving,
    Processing,
    Responding,
    Closed,
}

/// One accepted client
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub id: Uuid,
    pub peer: BdAddr,
    pub connected_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Exact line most recently written to this client
    pub last_sent_message: Option<String>,
    pub state: SessionState,
    pub messages_received: u64,
    pub responses_sent: u64,
    pub echoes_suppressed: u64,
}

impl ClientSession {
    fn new(peer: BdAddr) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            peer,
            connected_at: now,
            last_activity_at: now,
            last_sent_message: None,
            state: SessionState::Connected,
            messages_received: 0,
            responses_sent: 0,
            echoes_suppressed: 0,
        }
    }
}

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub sessions_active: usize,
    pub sessions_total: u64,
    pub messages_received: u64,
    pub responses_sent: u64,
    pub echoes_suppressed: u64,
}

/// Concurrent map of live sessions keyed by session id
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, ClientSession>>>,
    stats: Arc<RwLock<RegistryStats>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted client
    pub fn open(&self, peer: BdAddr) -> Uuid {
        let session = ClientSession::new(peer);
        let id = session.id;

        let mut sessions = self.sessions.write();
        sessions.insert(id, session);

        let mut stats = self.stats.write();
        stats.sessions_active = sessions.len();
        stats.sessions_total += 1;
        id
    }

    pub fn set_state(&self, id: Uuid, state: SessionState) {
        if let Some(session) = self.sessions.write().get_mut(&id) {
            session.state = state;
        }
    }

    /// Record an inbound message
    pub fn touch(&self, id: Uuid) {
        if let Some(session) = self.sessions.write().get_mut(&id) {
            session.last_activity_at = Utc::now();
            session.messages_received += 1;
            self.stats.write().messages_received += 1;
        }
    }

    /// Record an outbound line
    pub fn record_sent(&self, id: Uuid, line: &str) {
        if let Some(session) = self.sessions.write().get_mut(&id) {
            session.last_activity_at = Utc::now();
            session.last_sent_message = Some(line.to_string());
            session.responses_sent += 1;
            self.stats.write().responses_sent += 1;
        }
    }

    pub fn record_echo(&self, id: Uuid) {
        if let Some(session) = self.sessions.write().get_mut(&id) {
            session.echoes_suppressed += 1;
            self.stats.write().echoes_suppressed += 1;
        }
    }

    /// Last line sent to the session, if any
    pub fn last_sent(&self, id: Uuid) -> Option<String> {
        self.sessions
            .read()
            .get(&id)
            .and_then(|session| session.last_sent_message.clone())
    }

    /// Remove a session, returning its final record
    pub fn close(&self, id: Uuid) -> Option<ClientSession> {
        let mut sessions = self.sessions.write();
        let mut session = sessions.remove(&id)?;
        session.state = SessionState::Closed;

        self.stats.write().sessions_active = sessions.len();
        Some(session)
    }

    pub fn get(&self, id: Uuid) -> Option<ClientSession> {
        self.sessions.read().get(&id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn stats(&self) -> RegistryStats {
        self.stats.read().clone()
    }
}
