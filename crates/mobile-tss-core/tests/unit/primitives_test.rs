//! Free functions exposed next to the service

use mobile_tss_core::committee::Committee;
use mobile_tss_core::{
    Error, ErrorKind, contains, get_der_signature, get_derive_path_bytes, get_derived_pub_key,
    get_threshold, hash_to_int,
};

const ROOT_PUB: &str = "035a784662a4a20a65bf6aab9ae98a6c068a81c52e4b032c0fb5400c706cfccc56";
const CHAIN_CODE: &str = "47fdacbd0f1097043b78c63c20c34ef4ed9a111d980047ad16282c7ae6236141";

#[test]
fn test_get_threshold() {
    assert!(matches!(get_threshold(-1), Err(Error::InvalidInput(_))));
    assert_eq!(get_threshold(0).unwrap(), 0);
    assert_eq!(get_threshold(1).unwrap(), 0);
    assert_eq!(get_threshold(2).unwrap(), 1);
    assert_eq!(get_threshold(3).unwrap(), 1);
    assert_eq!(get_threshold(4).unwrap(), 2);
    assert_eq!(get_threshold(5).unwrap(), 2);
    assert_eq!(get_threshold(-1).unwrap_err().kind(), ErrorKind::InvalidInput);
}

#[test]
fn test_contains() {
    assert!(contains("alice,bob,carol", "bob"));
    assert!(contains("alice, bob", "bob"));
    assert!(!contains("alice,bob", "bo"));
    assert!(!contains("", "alice"));
}

#[test]
fn test_committee_order_ignores_request_order() {
    let a = Committee::parse("carol,alice,bob").unwrap();
    let b = Committee::parse("bob, carol ,alice,").unwrap();
    assert_eq!(a, b);
    assert_eq!(a.to_string(), "alice,bob,carol");
    assert_eq!(a.threshold(), 1);

    assert!(Committee::parse("alice,alice").is_err());
    assert!(Committee::parse("alice").is_err());
}

#[test]
fn test_derived_pub_key_empty_path_is_root() {
    assert_eq!(
        get_derived_pub_key(ROOT_PUB, CHAIN_CODE, "", false).unwrap(),
        ROOT_PUB
    );
    assert_eq!(get_derived_pub_key(ROOT_PUB, CHAIN_CODE, "m", false).unwrap(), ROOT_PUB);
}

#[test]
fn test_derived_pub_key_strips_hardened_markers() {
    let marked = get_derived_pub_key(ROOT_PUB, CHAIN_CODE, "m/44'/60'/0'/0/0", false).unwrap();
    let plain = get_derived_pub_key(ROOT_PUB, CHAIN_CODE, "m/44/60/0/0/0", false).unwrap();
    assert_eq!(marked, plain);
    assert_ne!(marked, ROOT_PUB);
    assert_eq!(
        get_derive_path_bytes("m/44'/60'/0'/0/0").unwrap(),
        vec![44, 60, 0, 0, 0]
    );
}

#[test]
fn test_derived_pub_key_rejects_bad_input() {
    assert!(get_derived_pub_key("", CHAIN_CODE, "m/0", false).is_err());
    assert!(get_derived_pub_key("zz", CHAIN_CODE, "m/0", false).is_err());
    assert!(get_derived_pub_key(ROOT_PUB, "00", "m/0", false).is_err());
    assert!(get_derived_pub_key(ROOT_PUB, CHAIN_CODE, "m/x", false).is_err());
}

#[test]
fn test_der_signature_encoding() {
    // High bit set on r needs a leading zero; leading zeros on s are trimmed
    let mut r = [0u8; 32];
    r[0] = 0x80;
    r[31] = 1;
    let mut s = [0u8; 32];
    s[30] = 0x01;
    s[31] = 0x02;

    let der = get_der_signature(&r, &s);
    assert_eq!(der[0], 0x30);
    assert_eq!(der[1] as usize, der.len() - 2);
    assert_eq!(&der[2..5], &[0x02, 33, 0x00]);
    assert_eq!(&der[der.len() - 4..], &[0x02, 0x02, 0x01, 0x02]);
}

#[test]
fn test_hash_to_int_uses_leftmost_bytes() {
    let mut long = vec![0u8; 40];
    long[31] = 5;
    long[39] = 9;
    let mut short = vec![0u8; 32];
    short[31] = 5;
    assert_eq!(hash_to_int(&long), hash_to_int(&short));
    assert_eq!(hash_to_int(&[5]), hash_to_int(&short));
}
