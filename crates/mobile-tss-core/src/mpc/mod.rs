//! MPC coordination utilities
//!
//! The `Relay` trait abstracts round-based message passing between parties.
//! Protocols are written against it and never see the transport: the service
//! runs them over a [`QueueRelay`] fed by `apply_data`, tests can run them
//! over the shared in-process [`MemoryRelay`].

use crate::{PartyId, Result};
use serde::{Serialize, de::DeserializeOwned};

pub use async_trait::async_trait;

pub mod memory;
pub mod queue;

pub use memory::MemoryRelay;
pub use queue::QueueRelay;

/// Message relay for one party in one session
///
/// A relay is bound to a session and to the local party, so protocol code
/// only names rounds and peers. Collected messages are returned in the order
/// of the `from` list, never in arrival order.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Key of the party this relay sends as
    fn local_party(&self) -> &str;

    /// Broadcast a message to every other party
    async fn broadcast<T: Serialize + Send + Sync>(&self, round: u32, message: &T) -> Result<()>;

    /// Send a message to a single party
    async fn send_direct<T: Serialize + Send + Sync>(
        &self,
        round: u32,
        to: &str,
        message: &T,
    ) -> Result<()>;

    /// Wait for one broadcast of `round` from each party in `from`
    async fn collect_broadcasts<T: DeserializeOwned + Send>(
        &self,
        round: u32,
        from: &[PartyId],
    ) -> Result<Vec<T>>;

    /// Wait for one direct message of `round` from each party in `from`
    async fn collect_direct<T: DeserializeOwned + Send>(
        &self,
        round: u32,
        from: &[PartyId],
    ) -> Result<Vec<T>>;
}

/// Decode a payload received from `from`, reporting failures as protocol violations
pub(crate) fn decode_payload<T: DeserializeOwned>(
    value: serde_json::Value,
    from: &str,
    round: u32,
) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        crate::Error::ProtocolViolation(format!(
            "malformed round {} message from {}: {}",
            round, from, e
        ))
    })
}
