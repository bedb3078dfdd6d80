//! Session lifecycle and inbound message routing
//!
//! Every keygen, keysign or reshare call runs as one session. The registry
//! tracks each session's status (`Idle -> Running -> Completed | Failed`),
//! owns the sender half of the session's inbound queue, and serializes
//! registration with routing so a message can never slip between "unknown
//! session" and "session registered".
//!
//! Messages for sessions that have not started yet are held in a bounded
//! early-arrival buffer and replayed into the queue on registration.

use crate::types::{MessageFromTss, TssScheme};
use crate::{Error, PartyId, Result, SessionId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Most sessions buffered at once before the oldest buffer is evicted
const MAX_PENDING_SESSIONS: usize = 64;

/// Status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Known only from early-arriving messages
    Idle,
    /// Protocol rounds in progress
    Running,
    /// Finished and state persisted
    Completed,
    /// Aborted with an error
    Failed,
}

impl SessionStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Running)
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

/// Operation a session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Keygen,
    Keysign,
    Reshare,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Keygen => "keygen",
            SessionKind::Keysign => "keysign",
            SessionKind::Reshare => "reshare",
        }
    }
}

/// How a session uses the key it names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAccess {
    /// Reads the key; any number of readers may run together
    Shared,
    /// Replaces the key's state; runs alone
    Exclusive,
}

/// Record of one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub kind: SessionKind,
    pub scheme: TssScheme,
    /// Local party running the session
    pub party: PartyId,
    /// Public key the session reads or replaces, if any
    pub pub_key: Option<String>,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Error message (if failed)
    pub error: Option<String>,
}

impl SessionInfo {
    pub fn new(id: SessionId, kind: SessionKind, scheme: TssScheme, party: PartyId) -> Self {
        Self {
            id,
            kind,
            scheme,
            party,
            pub_key: None,
            status: SessionStatus::Idle,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    pub fn with_pub_key(mut self, pub_key: impl Into<String>) -> Self {
        self.pub_key = Some(pub_key.into());
        self
    }
}

/// Session statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionStats {
    pub total_started: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_rejected_busy: u64,
    pub dropped_messages: u64,
}

/// Derive a session id every peer computes identically from its request
pub fn session_id(kind: SessionKind, scheme: TssScheme, fields: &[&str]) -> SessionId {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(scheme.to_string().as_bytes());
    for field in fields {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }
    hex::encode(hasher.finalize())
}

struct Route {
    party: PartyId,
    tx: mpsc::UnboundedSender<MessageFromTss>,
}

/// Routing state guarded by a single lock
#[derive(Default)]
struct Routes {
    active: HashMap<SessionId, Route>,
    pending: HashMap<SessionId, Vec<MessageFromTss>>,
    pending_order: VecDeque<SessionId>,
    /// pub_key -> sessions holding it
    key_holders: HashMap<String, Vec<(SessionId, KeyAccess)>>,
}

impl Routes {
    fn release_key(&mut self, pub_key: &str, id: &str) {
        if let Some(holders) = self.key_holders.get_mut(pub_key) {
            holders.retain(|(holder, _)| holder != id);
            if holders.is_empty() {
                self.key_holders.remove(pub_key);
            }
        }
    }

    fn take_pending(&mut self, id: &str) -> Vec<MessageFromTss> {
        self.pending_order.retain(|pending| pending != id);
        self.pending.remove(id).unwrap_or_default()
    }
}

/// Registry of sessions run by one service
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionInfo>,
    routes: Mutex<Routes>,
    stats: RwLock<SessionStats>,
    max_pending_messages: usize,
}

impl SessionRegistry {
    pub fn new(max_pending_messages: usize) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            routes: Mutex::new(Routes::default()),
            stats: RwLock::new(SessionStats::default()),
            max_pending_messages,
        })
    }

    /// Register a running session and return its guard and inbound queue.
    ///
    /// Fails with [`Error::SessionBusy`] if the session is already running or
    /// its key is held by a conflicting session.
    pub fn register(
        self: &Arc<Self>,
        info: SessionInfo,
        access: KeyAccess,
    ) -> Result<(SessionGuard, mpsc::UnboundedReceiver<MessageFromTss>)> {
        let mut routes = self.routes.lock();

        if routes.active.contains_key(&info.id) {
            self.stats.write().total_rejected_busy += 1;
            return Err(Error::SessionBusy(format!("session {} is already running", info.id)));
        }
        if let Some(pub_key) = &info.pub_key {
            let holders = routes.key_holders.get(pub_key).map(Vec::as_slice).unwrap_or_default();
            let conflict = holders.iter().any(|(_, held)| {
                access == KeyAccess::Exclusive || *held == KeyAccess::Exclusive
            });
            if conflict {
                self.stats.write().total_rejected_busy += 1;
                return Err(Error::SessionBusy(format!(
                    "key {} is held by another session",
                    pub_key
                )));
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let early = routes.take_pending(&info.id);
        let mut replayed = 0;
        for message in early.into_iter().filter(|m| m.is_for(&info.party)) {
            // The receiver is still in hand, so this cannot fail
            let _ = tx.send(message);
            replayed += 1;
        }
        routes.active.insert(
            info.id.clone(),
            Route {
                party: info.party.clone(),
                tx,
            },
        );
        if let Some(pub_key) = &info.pub_key {
            routes
                .key_holders
                .entry(pub_key.clone())
                .or_default()
                .push((info.id.clone(), access));
        }

        let mut info = info;
        info.status = SessionStatus::Running;
        info.started_at = Utc::now();
        info.finished_at = None;
        info.error = None;

        info!(
            session = %info.id,
            kind = info.kind.as_str(),
            scheme = %info.scheme,
            replayed,
            "Session started"
        );

        let guard = SessionGuard {
            registry: Arc::clone(self),
            id: info.id.clone(),
            pub_key: info.pub_key.clone(),
            finished: false,
        };
        self.sessions.insert(info.id.clone(), info);
        self.stats.write().total_started += 1;
        drop(routes);

        Ok((guard, rx))
    }

    /// Hand one decoded inbound message to its session.
    ///
    /// Messages for completed sessions, or addressed to another party, are
    /// dropped. Messages for unknown sessions are buffered up to the limit.
    pub fn route(&self, session: &str, message: MessageFromTss) {
        let mut routes = self.routes.lock();

        if let Some(route) = routes.active.get(session) {
            if !message.is_for(&route.party) {
                debug!(session, to = %message.to, "Dropping message for another party");
                return;
            }
            trace!(session, from = %message.from, "Routing message to session");
            if route.tx.send(message).is_err() {
                debug!(session, "Session queue already closed");
            }
            return;
        }

        // A failed session may be retried under the same id, so only
        // completed sessions stop buffering
        let completed = self
            .sessions
            .get(session)
            .map(|info| info.status == SessionStatus::Completed)
            .unwrap_or(false);
        if completed {
            trace!(session, "Dropping message for completed session");
            return;
        }

        if !routes.pending.contains_key(session) {
            if routes.pending_order.len() >= MAX_PENDING_SESSIONS {
                if let Some(evicted) = routes.pending_order.pop_front() {
                    let dropped = routes.pending.remove(&evicted).map_or(0, |m| m.len());
                    warn!(session = %evicted, dropped, "Evicting early-arrival buffer");
                    self.stats.write().dropped_messages += dropped as u64;
                }
            }
            routes.pending_order.push_back(session.to_string());
        }

        let buffer = routes.pending.entry(session.to_string()).or_default();
        if buffer.len() >= self.max_pending_messages {
            warn!(session, "Early-arrival buffer full, dropping message");
            self.stats.write().dropped_messages += 1;
            return;
        }
        buffer.push(message);
    }

    pub fn status(&self, id: &str) -> Option<SessionStatus> {
        if let Some(info) = self.sessions.get(id) {
            return Some(info.status);
        }
        self.routes
            .lock()
            .pending
            .contains_key(id)
            .then_some(SessionStatus::Idle)
    }

    pub fn info(&self, id: &str) -> Option<SessionInfo> {
        self.sessions.get(id).map(|info| info.clone())
    }

    /// Number of sessions currently running
    pub fn active_count(&self) -> usize {
        self.routes.lock().active.len()
    }

    /// Number of messages waiting for a session to start
    pub fn pending_count(&self, id: &str) -> usize {
        self.routes.lock().pending.get(id).map_or(0, Vec::len)
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.read().clone()
    }

    fn finish(&self, id: &str, pub_key: Option<&str>, outcome: std::result::Result<(), String>) {
        {
            let mut routes = self.routes.lock();
            routes.active.remove(id);
            if let Some(pub_key) = pub_key {
                routes.release_key(pub_key, id);
            }
        }

        if let Some(mut info) = self.sessions.get_mut(id) {
            info.finished_at = Some(Utc::now());
            match outcome {
                Ok(()) => {
                    info.status = SessionStatus::Completed;
                    self.stats.write().total_completed += 1;
                    info!(session = %id, "Session completed");
                }
                Err(error) => {
                    warn!(session = %id, error = %error, "Session failed");
                    info.status = SessionStatus::Failed;
                    info.error = Some(error);
                    self.stats.write().total_failed += 1;
                }
            }
        }
    }
}

/// Marks its session finished when dropped.
///
/// Dropping without [`SessionGuard::complete`] records the session as failed,
/// so a cancelled or panicking call never leaves a session stuck in Running.
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    id: SessionId,
    pub_key: Option<String>,
    finished: bool,
}

impl SessionGuard {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn complete(mut self) {
        self.finished = true;
        self.registry.finish(&self.id, self.pub_key.as_deref(), Ok(()));
    }

    pub fn fail(mut self, error: &Error) {
        self.finished = true;
        self.registry
            .finish(&self.id, self.pub_key.as_deref(), Err(error.to_string()));
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.registry.finish(
                &self.id,
                self.pub_key.as_deref(),
                Err("session abandoned".to_string()),
            );
        }
    }
}
