use crate::errors::{Error, Result};
use p256::ecdsa::Signature;

/// Represents an ECDSA P-256 signature in its ASN.1 DER form, the
/// "SEQUENCE { INTEGER r, INTEGER s }" every token carries on the wire.
/// "r" and "s" are positive integers modulo the curve order; the encoder
/// emits no leading-zero padding beyond the single byte ASN.1 requires to
/// keep them non-negative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sig(pub Signature);

impl Sig {
    /// Loads the signature from ASN.1 DER bytes.
    pub fn from_der(b: &[u8]) -> Result<Self> {
        let sig = Signature::from_der(b).map_err(|e| Error::Key {
            message: format!("failed Signature::from_der {}", e),
        })?;
        Ok(Self(sig))
    }

    /// Converts the signature to ASN.1 DER bytes.
    pub fn to_der(&self) -> Vec<u8> {
        let der: ecdsa::der::Signature<p256::NistP256> = self.0.to_der();
        der.as_bytes().to_vec()
    }
}

impl From<Signature> for Sig {
    fn from(sig: Signature) -> Self {
        Self(sig)
    }
}

impl From<Sig> for Signature {
    fn from(sig: Sig) -> Self {
        sig.0
    }
}

/// ref. <https://doc.rust-lang.org/std/string/trait.ToString.html>
/// ref. <https://doc.rust-lang.org/std/fmt/trait.Display.html>
/// Use "Self.to_string()" to directly invoke this.
impl std::fmt::Display for Sig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.to_der()))
    }
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- key::p256::signature::test_sig --exact --show-output
#[test]
fn test_sig() {
    use crate::hash;

    let msg: Vec<u8> = random_manager::secure_bytes(64).unwrap();
    let digest = hash::sha256(&msg);

    let pk = crate::key::p256::private_key::Key::generate().unwrap();
    let sig1 = pk.sign_digest(&digest).unwrap();

    let der = sig1.to_der();
    // 2-byte SEQUENCE header, two INTEGERs of at most 33 bytes each
    assert!(der.len() <= 72);

    let sig2 = Sig::from_der(&der).unwrap();
    assert_eq!(sig1, sig2);

    assert!(Sig::from_der(b"junk").is_err());
    assert!(Sig::from_der(&[]).is_err());
}
