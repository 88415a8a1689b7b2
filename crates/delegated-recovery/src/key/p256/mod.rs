//! P-256 (secp256r1) keys and ECDSA-SHA256 signatures.
pub mod private_key;
pub mod public_key;
pub mod signature;

use crate::hash;

/// Verifies the DER-encoded ECDSA signature of `msg` against each public
/// key in order, returning true at the first key that verifies and false
/// if none match. DER that fails to parse counts as a non-match for that
/// key, not a hard error, so key lists with overlapping rotation windows
/// keep working.
#[must_use]
pub fn verify_any(msg: &[u8], sig_der: &[u8], keys: &[public_key::Key]) -> bool {
    let digest = hash::sha256(msg);
    keys.iter().any(|k| k.verify(&digest, sig_der))
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- key::p256::test_verify_any --exact --show-output
#[test]
fn test_verify_any() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .is_test(true)
        .try_init();

    let msg: Vec<u8> = random_manager::secure_bytes(100).unwrap();
    let digest = hash::sha256(&msg);

    let k_old = private_key::Key::generate().unwrap();
    let k_new = private_key::Key::generate().unwrap();
    let k_other = private_key::Key::generate().unwrap();

    let sig_old = k_old.sign_digest(&digest).unwrap().to_der();
    let sig_new = k_new.sign_digest(&digest).unwrap().to_der();

    // a published list [K_new, K_old] accepts either signer
    let published = vec![k_new.to_public_key(), k_old.to_public_key()];
    assert!(verify_any(&msg, &sig_new, &published));
    assert!(verify_any(&msg, &sig_old, &published));

    // a signer absent from the list never verifies
    let sig_other = k_other.sign_digest(&digest).unwrap().to_der();
    assert!(!verify_any(&msg, &sig_other, &published));

    // removing the matching key makes verification fail
    assert!(!verify_any(&msg, &sig_old, &[k_new.to_public_key()]));

    // malformed DER is a non-match, not an error
    assert!(!verify_any(&msg, b"\x30\x03\x02\x01", &published));
    assert!(!verify_any(&msg, &[], &published));

    // empty key list never verifies
    assert!(!verify_any(&msg, &sig_new, &[]));
}
