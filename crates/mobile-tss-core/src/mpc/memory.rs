//! In-memory relay for tests and local simulation

use super::{Relay, async_trait, decode_payload};
use crate::{Error, PartyId, Result};
use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// In-memory message relay shared by every party of one session
///
/// Each party gets its own endpoint via [`MemoryRelay::endpoint`]; endpoints
/// share the underlying maps. Messages are keyed by sender so a collector can
/// wait for an exact set of peers.
#[derive(Debug, Clone)]
pub struct MemoryRelay {
    local_party: PartyId,
    /// Broadcasts: (round, from) -> payload
    broadcasts: Arc<DashMap<(u32, PartyId), serde_json::Value>>,
    /// Direct messages: (round, from, to) -> payload
    directs: Arc<DashMap<(u32, PartyId, PartyId), serde_json::Value>>,
    /// Wakes collectors when anything is stored
    notify: broadcast::Sender<()>,
    timeout_ms: u64,
}

impl MemoryRelay {
    /// Create a new shared relay with the default timeout, as `local_party`
    pub fn new(local_party: &str) -> Self {
        Self::with_timeout(local_party, 30_000)
    }

    /// Create a new shared relay with a custom timeout
    pub fn with_timeout(local_party: &str, timeout_ms: u64) -> Self {
        let (notify, _) = broadcast::channel(1000);
        Self {
            local_party: local_party.to_string(),
            broadcasts: Arc::new(DashMap::new()),
            directs: Arc::new(DashMap::new()),
            notify,
            timeout_ms,
        }
    }

    /// Endpoint of the same relay for another party
    pub fn endpoint(&self, party: &str) -> Self {
        Self {
            local_party: party.to_string(),
            ..self.clone()
        }
    }

    /// Drop all stored messages
    pub fn clear(&self) {
        self.broadcasts.clear();
        self.directs.clear();
    }

    /// Number of broadcasts stored for a round
    pub fn broadcast_count(&self, round: u32) -> usize {
        self.broadcasts.iter().filter(|e| e.key().0 == round).count()
    }

    /// Number of direct messages stored for a round and recipient
    pub fn direct_count(&self, round: u32, to: &str) -> usize {
        self.directs
            .iter()
            .filter(|e| e.key().0 == round && e.key().2 == to)
            .count()
    }

    async fn wait_for<F>(&self, what: &str, round: u32, mut take: F) -> Result<Vec<(PartyId, serde_json::Value)>>
    where
        F: FnMut() -> Option<Vec<(PartyId, serde_json::Value)>> + Send,
    {
        let mut rx = self.notify.subscribe();
        let deadline = Instant::now() + Duration::from_millis(self.timeout_ms);

        loop {
            if let Some(messages) = take() {
                return Ok(messages);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout(format!(
                    "{} messages to {} in round {}",
                    what, self.local_party, round
                )));
            }

            tokio::select! {
                _ = rx.recv() => continue,
                _ = tokio::time::sleep(Duration::from_millis(100).min(remaining)) => continue,
            }
        }
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    fn local_party(&self) -> &str {
        &self.local_party
    }

    async fn broadcast<T: Serialize + Send + Sync>(&self, round: u32, message: &T) -> Result<()> {
        let value = serde_json::to_value(message)?;
        let key = (round, self.local_party.clone());
        if self.broadcasts.contains_key(&key) {
            return Err(Error::ProtocolViolation(format!(
                "{} already broadcast in round {}",
                self.local_party, round
            )));
        }
        self.broadcasts.insert(key, value);

        let _ = self.notify.send(());
        Ok(())
    }

    async fn send_direct<T: Serialize + Send + Sync>(
        &self,
        round: u32,
        to: &str,
        message: &T,
    ) -> Result<()> {
        let value = serde_json::to_value(message)?;
        self.directs
            .insert((round, self.local_party.clone(), to.to_string()), value);

        let _ = self.notify.send(());
        Ok(())
    }

    async fn collect_broadcasts<T: DeserializeOwned + Send>(
        &self,
        round: u32,
        from: &[PartyId],
    ) -> Result<Vec<T>> {
        let messages = self
            .wait_for("broadcast", round, || {
                from.iter()
                    .map(|party| {
                        self.broadcasts
                            .get(&(round, party.clone()))
                            .map(|v| (party.clone(), v.value().clone()))
                    })
                    .collect()
            })
            .await?;

        messages
            .into_iter()
            .map(|(party, value)| decode_payload(value, &party, round))
            .collect()
    }

    async fn collect_direct<T: DeserializeOwned + Send>(
        &self,
        round: u32,
        from: &[PartyId],
    ) -> Result<Vec<T>> {
        let messages = self
            .wait_for("direct", round, || {
                from.iter()
                    .map(|party| {
                        self.directs
                            .get(&(round, party.clone(), self.local_party.clone()))
                            .map(|v| (party.clone(), v.value().clone()))
                    })
                    .collect()
            })
            .await?;

        messages
            .into_iter()
            .map(|(party, value)| decode_payload(value, &party, round))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct TestMessage {
        value: u32,
        data: String,
    }

    fn msg(value: u32, data: &str) -> TestMessage {
        TestMessage {
            value,
            data: data.to_string(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_ordered_by_sender_list() {
        let alice = MemoryRelay::new("alice");
        let bob = alice.endpoint("bob");
        let carol = alice.endpoint("carol");

        carol.broadcast(1, &msg(3, "carol")).await.unwrap();
        bob.broadcast(1, &msg(2, "bob")).await.unwrap();

        let messages: Vec<TestMessage> = alice
            .collect_broadcasts(1, &["bob".to_string(), "carol".to_string()])
            .await
            .unwrap();

        assert_eq!(messages, vec![msg(2, "bob"), msg(3, "carol")]);
        assert_eq!(alice.broadcast_count(1), 2);
    }

    #[tokio::test]
    async fn test_direct() {
        let alice = MemoryRelay::new("alice");
        let bob = alice.endpoint("bob");

        alice.send_direct(1, "bob", &msg(100, "direct")).await.unwrap();
        assert_eq!(alice.direct_count(1, "bob"), 1);

        let messages: Vec<TestMessage> =
            bob.collect_direct(1, &["alice".to_string()]).await.unwrap();
        assert_eq!(messages[0].value, 100);
    }

    #[tokio::test]
    async fn test_collector_waits_for_late_sender() {
        let alice = MemoryRelay::new("alice");
        let bob = alice.endpoint("bob");

        let collector = tokio::spawn(async move {
            alice
                .collect_broadcasts::<TestMessage>(1, &["bob".to_string()])
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        bob.broadcast(1, &msg(7, "late")).await.unwrap();

        let messages = collector.await.unwrap().unwrap();
        assert_eq!(messages[0].value, 7);
    }

    #[tokio::test]
    async fn test_timeout() {
        let alice = MemoryRelay::with_timeout("alice", 100);
        let result: Result<Vec<TestMessage>> =
            alice.collect_broadcasts(1, &["bob".to_string()]).await;
        assert!(matches!(result.unwrap_err(), Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_duplicate_broadcast_rejected() {
        let alice = MemoryRelay::new("alice");
        alice.broadcast(1, &msg(1, "first")).await.unwrap();
        assert!(alice.broadcast(1, &msg(2, "again")).await.is_err());
        // Different round is fine
        alice.broadcast(2, &msg(3, "next")).await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_payload_is_protocol_violation() {
        let alice = MemoryRelay::new("alice");
        let bob = alice.endpoint("bob");
        bob.broadcast(1, &"just a string").await.unwrap();

        let result: Result<Vec<TestMessage>> =
            alice.collect_broadcasts(1, &["bob".to_string()]).await;
        assert!(matches!(result.unwrap_err(), Error::ProtocolViolation(_)));
    }

    #[test]
    fn test_clear() {
        let relay = MemoryRelay::new("alice");
        relay
            .broadcasts
            .insert((1, "bob".to_string()), serde_json::json!({"value": 1}));
        assert_eq!(relay.broadcast_count(1), 1);

        relay.clear();
        assert_eq!(relay.broadcast_count(1), 0);
    }
}
