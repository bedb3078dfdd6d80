//! Fuzz tests for request parsing and wire decoding
//!
//! Host input arrives as strings: committees, paths, prefixes and message
//! bodies. None of it may panic, and parsing must not depend on ordering.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use mobile_tss_core::committee::Committee;
use mobile_tss_core::types::is_newer_prefix;
use mobile_tss_core::{
    LocalState, LoopbackNetwork, MemoryStateStore, MessageFromTss, TssService, contains,
    get_derive_path_bytes, get_threshold,
};
use proptest::prelude::*;
use std::sync::Arc;

// ============================================================================
// Strategies for generating test data
// ============================================================================

/// Distinct party keys
fn parties_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set("[a-z0-9]{1,12}", 2..10).prop_map(|set| set.into_iter().collect())
}

/// Non-hardened path indexes with a random hardened marker on each
fn path_strategy() -> impl Strategy<Value = Vec<(u32, bool)>> {
    prop::collection::vec((0u32..0x8000_0000, any::<bool>()), 0..8)
}

// ============================================================================
// Threshold and Committees
// ============================================================================

proptest! {
    /// `threshold + 1` is always a strict majority that the committee can reach
    #[test]
    fn threshold_is_majority(n in 1i64..100_000) {
        let t = get_threshold(n).unwrap() as i64;
        prop_assert!(2 * (t + 1) > n);
        prop_assert!(t < n);
        prop_assert_eq!(t, n / 2);
    }

    #[test]
    fn negative_threshold_rejected(n in i64::MIN..0) {
        prop_assert!(get_threshold(n).is_err());
    }

    /// Every peer builds the same committee whatever order the request lists
    #[test]
    fn committee_order_independent(parties in parties_strategy(), seed in any::<u64>()) {
        let mut shuffled = parties.clone();
        let len = shuffled.len();
        shuffled.rotate_left((seed as usize) % len);
        shuffled.reverse();

        let a = Committee::parse(&parties.join(",")).unwrap();
        let b = Committee::parse(&shuffled.join(" , ")).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.parties(), parties.as_slice());
    }

    #[test]
    fn contains_matches_entries(parties in parties_strategy(), item in "[a-z0-9]{1,12}") {
        let list = parties.join(",");
        prop_assert_eq!(contains(&list, &item), parties.contains(&item));
        for party in &parties {
            prop_assert!(contains(&list, party));
        }
    }
}

// ============================================================================
// Paths and Prefixes
// ============================================================================

proptest! {
    #[test]
    fn path_markers_are_stripped(path in path_strategy()) {
        let formatted: Vec<String> = path
            .iter()
            .map(|(index, hardened)| if *hardened { format!("{}'", index) } else { index.to_string() })
            .collect();
        let text = format!("m/{}", formatted.join("/"));

        let parsed = get_derive_path_bytes(&text).unwrap();
        let expected: Vec<u32> = path.iter().map(|(index, _)| *index).collect();
        prop_assert_eq!(parsed, expected);
    }

    #[test]
    fn path_parser_never_panics(text in "\\PC{0,64}") {
        let _ = get_derive_path_bytes(&text);
    }

    /// Generated prefixes always move forward
    #[test]
    fn generated_prefix_increases(counter in 0u64..u64::MAX) {
        let current = format!("{:016x}", counter);
        let next = LocalState::next_reshare_prefix(&current, "").unwrap();
        prop_assert!(is_newer_prefix(&next, &current));
        prop_assert_eq!(u64::from_str_radix(&next, 16).unwrap(), counter + 1);
        prop_assert!(LocalState::next_reshare_prefix(&next, &current).is_err());
    }
}

// ============================================================================
// Inbound Messages
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Arbitrary bodies are rejected, never panic
    #[test]
    fn apply_data_survives_garbage(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let service = TssService::new(
            LoopbackNetwork::new(),
            Arc::new(MemoryStateStore::new()),
            false,
        ).unwrap();

        let _ = service.apply_data(&String::from_utf8_lossy(&bytes));
        prop_assert!(service.apply_data(&STANDARD.encode(&bytes)).is_err());
    }

    #[test]
    fn decode_body_never_panics(text in "\\PC{0,256}") {
        let _ = MessageFromTss::decode_body(&text);
    }
}
