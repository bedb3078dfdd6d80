//! Integration tests module
//!
//! Every test builds one [`TssService`] per party, wires them together with a
//! [`LoopbackNetwork`] and drives the public request/response API.

pub mod keysign_test;
pub mod reshare_test;
pub mod transport_test;

use mobile_tss_core::{
    KeygenRequest, KeysignRequest, KeysignResponse, LoopbackNetwork, MemoryStateStore,
    ReshareRequest, ReshareResponse, Result, ServiceConfig, TssScheme, TssService,
};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const CHAIN_CODE: &str = "873dff81c02f525623fd1fe5167eac3a55a049de3d314bb42ee227ffed37d508";

/// A set of services joined by one loopback network
pub struct Cluster {
    pub network: Arc<LoopbackNetwork>,
    pub services: BTreeMap<String, Arc<TssService>>,
    pub stores: BTreeMap<String, Arc<MemoryStateStore>>,
}

impl Cluster {
    pub fn new(parties: &[&str]) -> Self {
        let mut cluster = Self {
            network: LoopbackNetwork::new(),
            services: BTreeMap::new(),
            stores: BTreeMap::new(),
        };
        for party in parties {
            cluster.add(party);
        }
        cluster
    }

    /// Add a party with an empty store
    pub fn add(&mut self, party: &str) -> Arc<TssService> {
        let store = Arc::new(MemoryStateStore::new());
        let config = ServiceConfig::default().with_paillier_prime_bits(1024);
        let service = Arc::new(
            TssService::with_config(self.network.clone(), store.clone(), config)
                .expect("valid config"),
        );
        self.network.register(party, &service);
        self.services.insert(party.to_string(), Arc::clone(&service));
        self.stores.insert(party.to_string(), store);
        service
    }

    pub fn service(&self, party: &str) -> Arc<TssService> {
        Arc::clone(&self.services[party])
    }

    /// Run keygen on every listed party and return each party's response
    pub async fn keygen(&self, scheme: TssScheme, parties: &[&str]) -> Vec<Result<String>> {
        let handles: Vec<_> = parties
            .iter()
            .map(|party| {
                let service = self.service(party);
                let request = KeygenRequest {
                    local_party_id: party.to_string(),
                    all_parties: parties.join(","),
                    chain_code_hex: CHAIN_CODE.to_string(),
                };
                tokio::spawn(async move {
                    let response = match scheme {
                        TssScheme::Ecdsa => service.keygen_ecdsa(&request).await,
                        TssScheme::Eddsa => service.keygen_eddsa(&request).await,
                    };
                    response.map(|r| r.pub_key)
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.expect("keygen task panicked"));
        }
        results
    }

    /// Keygen that must succeed, returning the agreed public key
    pub async fn keygen_ok(&self, scheme: TssScheme, parties: &[&str]) -> String {
        let keys: Vec<String> = self
            .keygen(scheme, parties)
            .await
            .into_iter()
            .map(|r| r.expect("keygen failed"))
            .collect();
        assert!(keys.windows(2).all(|w| w[0] == w[1]), "parties disagree on the key");
        keys[0].clone()
    }

    pub async fn keysign(
        &self,
        scheme: TssScheme,
        pub_key: &str,
        signers: &[&str],
        message: &[u8],
        derive_path: &str,
    ) -> Vec<Result<KeysignResponse>> {
        use base64::Engine;
        let message = base64::engine::general_purpose::STANDARD.encode(message);

        let handles: Vec<_> = signers
            .iter()
            .map(|party| {
                let service = self.service(party);
                let request = KeysignRequest {
                    pub_key: pub_key.to_string(),
                    message_to_sign: message.clone(),
                    keysign_committee_keys: signers.join(","),
                    local_party_key: party.to_string(),
                    derive_path: derive_path.to_string(),
                };
                tokio::spawn(async move {
                    match scheme {
                        TssScheme::Ecdsa => service.keysign_ecdsa(&request).await,
                        TssScheme::Eddsa => service.keysign_eddsa(&request).await,
                    }
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.expect("keysign task panicked"));
        }
        results
    }

    /// Reshare run by every member of either committee
    pub async fn reshare(
        &self,
        scheme: TssScheme,
        pub_key: &str,
        old: &[&str],
        new: &[&str],
        prefix: &str,
    ) -> Vec<Result<ReshareResponse>> {
        let mut parties: Vec<&str> = old.iter().chain(new.iter()).copied().collect();
        parties.sort();
        parties.dedup();

        let handles: Vec<_> = parties
            .iter()
            .map(|party| {
                let service = self.service(party);
                let request = ReshareRequest {
                    pub_key: pub_key.to_string(),
                    local_party_id: party.to_string(),
                    old_parties: old.join(","),
                    new_parties: new.join(","),
                    chain_code_hex: CHAIN_CODE.to_string(),
                    reshare_prefix: prefix.to_string(),
                    new_reshare_prefix: String::new(),
                };
                tokio::spawn(async move {
                    match scheme {
                        TssScheme::Ecdsa => service.reshare_ecdsa(&request).await,
                        TssScheme::Eddsa => service.reshare_eddsa(&request).await,
                    }
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.expect("reshare task panicked"));
        }
        results
    }
}

/// Check an ECDSA response against a compressed secp256k1 key
pub fn verify_ecdsa(pub_key_hex: &str, digest: &[u8], response: &KeysignResponse) {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD_NO_PAD;
    use k256::ecdsa::signature::hazmat::PrehashVerifier;
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

    let r = STANDARD_NO_PAD.decode(&response.r).unwrap();
    let s = STANDARD_NO_PAD.decode(&response.s).unwrap();
    let signature = Signature::from_slice(&[r, s].concat()).unwrap();
    assert!(signature.normalize_s().is_none(), "signature is not low-S");
    assert_eq!(hex::encode(signature.to_der().as_bytes()), response.der_signature);

    let key = VerifyingKey::from_sec1_bytes(&hex::decode(pub_key_hex).unwrap()).unwrap();
    key.verify_prehash(digest, &signature).unwrap();

    let recovery_id = RecoveryId::from_byte(hex::decode(&response.recovery_id).unwrap()[0]).unwrap();
    let recovered = VerifyingKey::recover_from_prehash(digest, &signature, recovery_id).unwrap();
    assert_eq!(recovered, key);
}

/// Check an EdDSA response against a 32-byte Ed25519 key
pub fn verify_eddsa(pub_key_hex: &str, message: &[u8], response: &KeysignResponse) {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD_NO_PAD;
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    let r = STANDARD_NO_PAD.decode(&response.r).unwrap();
    let s = STANDARD_NO_PAD.decode(&response.s).unwrap();
    let bytes: [u8; 64] = [r, s].concat().try_into().unwrap();
    let key_bytes: [u8; 32] = hex::decode(pub_key_hex).unwrap().try_into().unwrap();

    let key = VerifyingKey::from_bytes(&key_bytes).unwrap();
    key.verify(message, &Signature::from_bytes(&bytes)).unwrap();
    assert_eq!(response.recovery_id, "00");
}
