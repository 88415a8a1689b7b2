//! Hashing utilities.
use ring::digest::{digest, SHA256};

pub const SHA256_OUTPUT_LEN: usize = ring::digest::SHA256_OUTPUT_LEN;

/// Returns SHA256 digest of the given data.
pub fn sha256(d: impl AsRef<[u8]>) -> Vec<u8> {
    digest(&SHA256, d.as_ref()).as_ref().into()
}

/// Returns the lowercase hex encoding of the SHA256 digest of the given data.
pub fn sha256_hex(d: impl AsRef<[u8]>) -> String {
    hex::encode(sha256(d))
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- hash::test_sha256 --exact --show-output
#[test]
fn test_sha256() {
    // ref. FIPS 180-2 appendix B.1
    let d = sha256(b"abc");
    assert_eq!(d.len(), SHA256_OUTPUT_LEN);
    assert_eq!(
        sha256_hex(b"abc"),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );

    let empty = sha256_hex(b"");
    assert_eq!(
        empty,
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}
