//! # Mobile TSS Core
//!
//! Threshold ECDSA (secp256k1) and EdDSA (Ed25519) for mobile hosts: key
//! generation, signing and resharing across a committee of parties that talk
//! over a transport the host application supplies.
//!
//! ## Architecture
//!
//! - **Protocol engine** ([`keygen`], [`sign`]): round-based protocols written
//!   against the [`mpc::Relay`] trait
//! - **Service facade** ([`TssService`]): request/response calls, one session
//!   per call, inbound messages fed through [`TssService::apply_data`]
//! - **Collaborators**: the host implements [`Messenger`] to move message
//!   bodies and [`LocalStateAccessor`] to persist key-share state
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mobile_tss_core::{KeygenRequest, MemoryStateStore, TssService};
//! use std::sync::Arc;
//!
//! let service = Arc::new(TssService::new(messenger, Arc::new(MemoryStateStore::new()), true)?);
//!
//! // The host delivers every body the messenger sends to the recipient:
//! // service.apply_data(&body)?;
//!
//! let response = service
//!     .keygen_ecdsa(&KeygenRequest {
//!         local_party_id: "alice".into(),
//!         all_parties: "alice,bob,carol".into(),
//!         chain_code_hex: chain_code,
//!     })
//!     .await?;
//! println!("public key: {}", response.pub_key);
//! ```
//!
//! ## Security Model
//!
//! Any `threshold + 1` committee members can sign, where
//! `threshold = ceil((n + 1) / 2) - 1`. Secret shares never leave the party
//! that holds them and are zeroized when dropped. Dealer commitments,
//! Schnorr proofs and every combined signature are verified. A signer only
//! runs the Paillier multiplicative-to-additive step on a peer's ciphertext
//! after checking that peer's modulus proof and a range proof for the
//! encrypted nonce.

pub mod committee;
pub mod config;
pub mod curve;
pub mod derivation;
pub mod error;
pub mod keygen;
pub mod messenger;
pub mod mpc;
pub mod paillier;
pub mod proofs;
pub mod service;
pub mod session;
pub mod sign;
pub mod storage;
pub mod types;
pub mod vss;

pub use committee::{contains, get_threshold};
pub use config::ServiceConfig;
pub use derivation::{get_derive_path_bytes, get_derived_pub_key, get_hex_encoded_pub_key};
pub use error::{Error, ErrorKind, Result};
pub use messenger::{LoopbackNetwork, Messenger};
pub use service::TssService;
pub use session::{SessionInfo, SessionKind, SessionStatus};
pub use sign::{get_der_signature, hash_to_int};
pub use storage::{EncryptedStateStore, FileStateStore, LocalStateAccessor, MemoryStateStore};
pub use types::{
    KeygenRequest, KeygenResponse, KeysignRequest, KeysignResponse, LocalState, MessageFromTss,
    PartyId, ReshareRequest, ReshareResponse, SessionId, TssScheme,
};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
