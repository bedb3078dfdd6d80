//! State stores as the service uses them

use mobile_tss_core::storage::generate_encryption_key;
use mobile_tss_core::{
    EncryptedStateStore, Error, FileStateStore, KeygenRequest, KeysignRequest, LocalState,
    LocalStateAccessor, LoopbackNetwork, MemoryStateStore, ServiceConfig, TssService,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::sync::Arc;

#[tokio::test]
async fn test_encrypted_file_store_hides_state() {
    let dir = tempfile::tempdir().unwrap();
    let key = generate_encryption_key();
    let store = EncryptedStateStore::new(FileStateStore::new(dir.path()).unwrap(), key);

    store
        .save_local_state("02abcd", "{\"secret_share\":\"deadbeef\"}")
        .await
        .unwrap();
    assert_eq!(
        store.get_local_state("02abcd").await.unwrap(),
        "{\"secret_share\":\"deadbeef\"}"
    );

    let on_disk = std::fs::read_to_string(dir.path().join("02abcd.json")).unwrap();
    assert!(!on_disk.contains("deadbeef"));

    let other = EncryptedStateStore::new(FileStateStore::new(dir.path()).unwrap(), [9u8; 32]);
    assert!(matches!(
        other.get_local_state("02abcd").await,
        Err(Error::Encryption(_))
    ));
    assert!(matches!(
        store.get_local_state("03ffff").await,
        Err(Error::StateNotFound(_))
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn test_file_store_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let store = FileStateStore::new(dir.path()).unwrap();
    store.save_local_state("02aa", "{}").await.unwrap();

    let mode = std::fs::metadata(dir.path().join("02aa.json"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[tokio::test]
async fn test_service_persists_through_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let network = LoopbackNetwork::new();
    let parties = ["alice", "bob"];

    let mut services = Vec::new();
    for party in parties {
        let store = FileStateStore::new(dir.path().join(party)).unwrap();
        let service = Arc::new(
            TssService::with_config(
                network.clone(),
                Arc::new(store),
                ServiceConfig::default().with_paillier_prime_bits(1024),
            )
            .unwrap(),
        );
        network.register(party, &service);
        services.push(service);
    }

    let mut handles = Vec::new();
    for (party, service) in parties.iter().zip(&services) {
        let service = Arc::clone(service);
        let request = KeygenRequest {
            local_party_id: party.to_string(),
            all_parties: "alice,bob".into(),
            chain_code_hex: String::new(),
        };
        handles.push(tokio::spawn(async move { service.keygen_eddsa(&request).await }));
    }
    let mut pub_key = String::new();
    for handle in handles {
        pub_key = handle.await.unwrap().unwrap().pub_key;
    }

    let alice_store = FileStateStore::new(dir.path().join("alice")).unwrap();
    let state = LocalState::from_json(&alice_store.get_local_state(&pub_key).await.unwrap()).unwrap();
    assert_eq!(state.pub_key, pub_key);
    assert!(state.eddsa_local_data.is_some());
    assert!(state.ecdsa_local_data.is_none());

    // A fresh service over the same directories can sign
    drop(services);
    let network = LoopbackNetwork::new();
    let mut handles = Vec::new();
    for party in parties {
        let service = Arc::new(
            TssService::new(
                network.clone(),
                Arc::new(FileStateStore::new(dir.path().join(party)).unwrap()),
                false,
            )
            .unwrap(),
        );
        network.register(party, &service);
        let request = KeysignRequest {
            pub_key: pub_key.clone(),
            message_to_sign: STANDARD.encode(b"restart"),
            keysign_committee_keys: "alice,bob".into(),
            local_party_key: party.to_string(),
            derive_path: String::new(),
        };
        handles.push(tokio::spawn(async move { service.keysign_eddsa(&request).await }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }
}

#[tokio::test]
async fn test_corrupt_state_is_reported() {
    let store = Arc::new(MemoryStateStore::new());
    store.save_local_state("02aa", "not json").await.unwrap();
    let service = TssService::new(LoopbackNetwork::new(), store, false).unwrap();

    let request = KeysignRequest {
        pub_key: "02aa".into(),
        message_to_sign: STANDARD.encode([1u8; 32]),
        keysign_committee_keys: "alice,bob".into(),
        local_party_key: "alice".into(),
        derive_path: String::new(),
    };
    assert!(matches!(
        service.keysign_ecdsa(&request).await,
        Err(Error::StateCorrupt(_))
    ));
}
