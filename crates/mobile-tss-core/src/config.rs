//! Service configuration

use crate::paillier::MIN_PRIME_BITS;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default Paillier prime size (2048-bit modulus)
pub const DEFAULT_PAILLIER_PRIME_BITS: usize = 1024;

/// Default bound on messages buffered for sessions that have not started
pub const DEFAULT_MAX_PENDING_MESSAGES: usize = 1024;

/// Tunables for a [`crate::TssService`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Generate ECDSA pre-parameters when the service is built
    pub create_pre_params: bool,
    /// Bit size of each Paillier prime
    pub paillier_prime_bits: usize,
    /// Limit on how long one round may wait for peers; `None` waits forever
    pub round_timeout: Option<Duration>,
    /// Early-arrival buffer size per unknown session
    pub max_pending_messages: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            create_pre_params: false,
            paillier_prime_bits: DEFAULT_PAILLIER_PRIME_BITS,
            round_timeout: None,
            max_pending_messages: DEFAULT_MAX_PENDING_MESSAGES,
        }
    }
}

impl ServiceConfig {
    pub fn with_pre_params(mut self, create: bool) -> Self {
        self.create_pre_params = create;
        self
    }

    pub fn with_paillier_prime_bits(mut self, bits: usize) -> Self {
        self.paillier_prime_bits = bits;
        self
    }

    pub fn with_round_timeout(mut self, timeout: Duration) -> Self {
        self.round_timeout = Some(timeout);
        self
    }

    pub fn with_max_pending_messages(mut self, max: usize) -> Self {
        self.max_pending_messages = max;
        self
    }

    /// Reject settings the protocols cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.paillier_prime_bits < MIN_PRIME_BITS {
            return Err(Error::InvalidInput(format!(
                "paillier_prime_bits must be at least {}, got {}",
                MIN_PRIME_BITS, self.paillier_prime_bits
            )));
        }
        if self.max_pending_messages == 0 {
            return Err(Error::InvalidInput(
                "max_pending_messages must be positive".into(),
            ));
        }
        if self.round_timeout == Some(Duration::ZERO) {
            return Err(Error::InvalidInput("round_timeout must be positive".into()));
        }
        Ok(())
    }
}
