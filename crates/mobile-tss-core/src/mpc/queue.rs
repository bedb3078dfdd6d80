//! Queue-backed relay used by the service
//!
//! Outbound messages are wrapped in a [`WireMessage`] and handed to the host
//! [`Messenger`]. Inbound messages arrive through an unbounded queue whose
//! only writer is `apply_data`; the protocol task is the only reader, so
//! round state is never shared between the two.

use super::{Relay, async_trait, decode_payload};
use crate::messenger::Messenger;
use crate::types::{MessageFromTss, WireMessage};
use crate::{Error, PartyId, Result, SessionId};
use serde::{Serialize, de::DeserializeOwned};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, trace};

/// (round, is_broadcast, sender)
type StashKey = (u32, bool, PartyId);

/// Messages received but not yet collected
struct Inbox {
    rx: mpsc::UnboundedReceiver<MessageFromTss>,
    stash: HashMap<StashKey, serde_json::Value>,
    consumed: HashSet<StashKey>,
}

impl Inbox {
    fn has_all(&self, round: u32, broadcast: bool, from: &[PartyId]) -> bool {
        from.iter()
            .all(|party| self.stash.contains_key(&(round, broadcast, party.clone())))
    }
}

/// Relay for one session, fed by the service's session queue
pub struct QueueRelay {
    session_id: SessionId,
    local_party: PartyId,
    /// Parties allowed to send into this session
    peers: Vec<PartyId>,
    messenger: Arc<dyn Messenger>,
    inbox: Mutex<Inbox>,
    round_timeout: Option<Duration>,
}

impl QueueRelay {
    pub fn new(
        session_id: SessionId,
        local_party: PartyId,
        peers: Vec<PartyId>,
        messenger: Arc<dyn Messenger>,
        rx: mpsc::UnboundedReceiver<MessageFromTss>,
        round_timeout: Option<Duration>,
    ) -> Self {
        Self {
            session_id,
            local_party,
            peers,
            messenger,
            inbox: Mutex::new(Inbox {
                rx,
                stash: HashMap::new(),
                consumed: HashSet::new(),
            }),
            round_timeout,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    async fn send_message<T: Serialize + Sync>(
        &self,
        round: u32,
        to: Option<&str>,
        message: &T,
    ) -> Result<()> {
        let wire = WireMessage {
            session: self.session_id.clone(),
            round,
            payload: serde_json::to_value(message)?,
        };
        let outbound = MessageFromTss {
            wire_bytes: serde_json::to_vec(&wire)?,
            from: self.local_party.clone(),
            to: to.unwrap_or_default().to_string(),
            is_broadcast: to.is_none(),
        };
        let body = outbound.encode_body()?;

        trace!(
            session = %self.session_id,
            round,
            to = %outbound.to,
            "Sending protocol message"
        );

        self.messenger
            .send(&outbound.from, &outbound.to, &body)
            .await
            .map_err(|e| match e {
                Error::Transport(_) => e,
                other => Error::Transport(other.to_string()),
            })
    }

    /// Validate one inbound message and stash its payload
    fn accept(&self, inbox: &mut Inbox, message: MessageFromTss) -> Result<()> {
        if message.from == self.local_party {
            return Ok(());
        }
        if !message.is_for(&self.local_party) {
            debug!(from = %message.from, to = %message.to, "Ignoring message for another party");
            return Ok(());
        }
        if !self.peers.contains(&message.from) {
            return Err(Error::ProtocolViolation(format!(
                "message from {} who is not in session {}",
                message.from, self.session_id
            )));
        }

        let wire = message.wire()?;
        if wire.session != self.session_id {
            debug!(session = %wire.session, "Ignoring message for another session");
            return Ok(());
        }

        let key = (wire.round, message.is_broadcast, message.from);
        if inbox.consumed.contains(&key) {
            trace!(round = wire.round, "Ignoring redelivered message");
            return Ok(());
        }
        match inbox.stash.get(&key) {
            Some(existing) if *existing == wire.payload => Ok(()),
            Some(_) => Err(Error::ProtocolViolation(format!(
                "conflicting round {} messages from {}",
                key.0, key.2
            ))),
            None => {
                inbox.stash.insert(key, wire.payload);
                Ok(())
            }
        }
    }

    async fn collect<T: DeserializeOwned + Send>(
        &self,
        round: u32,
        broadcast: bool,
        from: &[PartyId],
    ) -> Result<Vec<T>> {
        let mut guard = self.inbox.lock().await;
        let inbox = &mut *guard;

        let wait = async {
            while !inbox.has_all(round, broadcast, from) {
                let message = inbox.rx.recv().await.ok_or_else(|| {
                    Error::SessionClosed(format!("session {} queue closed", self.session_id))
                })?;
                self.accept(inbox, message)?;
            }
            Ok::<(), Error>(())
        };

        match self.round_timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                Error::Timeout(format!("round {} of session {}", round, self.session_id))
            })??,
            None => wait.await?,
        }

        from.iter()
            .map(|party| {
                let key = (round, broadcast, party.clone());
                let value = inbox
                    .stash
                    .remove(&key)
                    .ok_or_else(|| Error::Internal("stashed message vanished".into()))?;
                inbox.consumed.insert(key);
                decode_payload(value, party, round)
            })
            .collect()
    }
}

#[async_trait]
impl Relay for QueueRelay {
    fn local_party(&self) -> &str {
        &self.local_party
    }

    async fn broadcast<T: Serialize + Send + Sync>(&self, round: u32, message: &T) -> Result<()> {
        self.send_message(round, None, message).await
    }

    async fn send_direct<T: Serialize + Send + Sync>(
        &self,
        round: u32,
        to: &str,
        message: &T,
    ) -> Result<()> {
        self.send_message(round, Some(to), message).await
    }

    async fn collect_broadcasts<T: DeserializeOwned + Send>(
        &self,
        round: u32,
        from: &[PartyId],
    ) -> Result<Vec<T>> {
        self.collect(round, true, from).await
    }

    async fn collect_direct<T: DeserializeOwned + Send>(
        &self,
        round: u32,
        from: &[PartyId],
    ) -> Result<Vec<T>> {
        self.collect(round, false, from).await
    }
}
