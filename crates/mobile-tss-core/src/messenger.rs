//! Transport adapter supplied by the host
//!
//! The service never talks to the network itself. Every outbound protocol
//! message is handed to a [`Messenger`] as an opaque body; the host delivers
//! it and calls [`TssService::apply_data`] on the recipient.

use crate::service::TssService;
use crate::{Error, PartyId, Result};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Host transport
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Deliver `body` from `from` to `to`; an empty `to` is a broadcast to
    /// every other committee member. Failures surface to the running
    /// protocol as [`Error::Transport`] and are not retried.
    async fn send(&self, from: &str, to: &str, body: &str) -> Result<()>;
}

/// In-process transport connecting several services
///
/// Each registered party maps to a service; a send calls `apply_data` on the
/// recipient directly. Used by the CLI simulation and the integration tests.
#[derive(Default)]
pub struct LoopbackNetwork {
    endpoints: DashMap<PartyId, Weak<TssService>>,
    offline: DashSet<PartyId>,
    delivered: AtomicUsize,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Route messages for `party` into `service`
    pub fn register(&self, party: &str, service: &Arc<TssService>) {
        self.endpoints
            .insert(party.to_string(), Arc::downgrade(service));
    }

    pub fn unregister(&self, party: &str) {
        self.endpoints.remove(party);
    }

    /// Make deliveries to `party` fail until it is brought back online
    pub fn set_offline(&self, party: &str, offline: bool) {
        if offline {
            self.offline.insert(party.to_string());
        } else {
            self.offline.remove(party);
        }
    }

    /// Total number of bodies handed to a service
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::Relaxed)
    }

    fn deliver(&self, to: &str, body: &str) -> Result<()> {
        if self.offline.contains(to) {
            return Err(Error::Transport(format!("{} is offline", to)));
        }
        let service = self
            .endpoints
            .get(to)
            .and_then(|endpoint| endpoint.upgrade())
            .ok_or_else(|| Error::Transport(format!("no route to {}", to)))?;

        service
            .apply_data(body)
            .map_err(|e| Error::Transport(format!("{} rejected message: {}", to, e)))?;
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl Messenger for LoopbackNetwork {
    async fn send(&self, from: &str, to: &str, body: &str) -> Result<()> {
        if !to.is_empty() {
            debug!(from, to, "Loopback direct delivery");
            return self.deliver(to, body);
        }

        let recipients: Vec<PartyId> = self
            .endpoints
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|party| party != from)
            .collect();

        let mut first_error = None;
        for party in recipients {
            if let Err(e) = self.deliver(&party, body) {
                warn!(from, to = %party, error = %e, "Loopback broadcast delivery failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
