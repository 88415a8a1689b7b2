use crate::{
    errors::{Error, Result},
    key::p256::signature::Sig,
};
use base64::Engine;
use p256::{
    ecdsa::{signature::hazmat::PrehashVerifier, VerifyingKey},
    pkcs8::{DecodePublicKey, EncodePublicKey},
    PublicKey,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The size (in bytes) of a serialized uncompressed public key.
pub const UNCOMPRESSED_LEN: usize = 65;

/// The size (in bytes) of the DER "SubjectPublicKeyInfo" wrapping of an
/// uncompressed P-256 point: the 26-byte ASN.1 header followed by
/// "04 || X(32) || Y(32)".
pub const SPKI_DER_LEN: usize = 91;

/// Represents "p256::PublicKey" and "p256::ecdsa::VerifyingKey".
/// Serializes as the single-line base64 "SubjectPublicKeyInfo" string,
/// the form provider configurations carry on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Key(pub PublicKey);

impl Key {
    /// Decodes compressed or uncompressed public key bytes with
    /// Elliptic-Curve-Point-to-Octet-String encoding described in
    /// SEC 1: Elliptic Curve Cryptography (Version 2.0) section 2.3.3.
    /// ref. <http://www.secg.org/sec1-v2.pdf>
    pub fn from_sec1_bytes(b: &[u8]) -> Result<Self> {
        let pubkey = PublicKey::from_sec1_bytes(b).map_err(|e| Error::Key {
            message: format!("failed PublicKey::from_sec1_bytes {}", e),
        })?;
        Ok(Self(pubkey))
    }

    /// Decodes ASN.1 DER-encoded "SubjectPublicKeyInfo" bytes.
    pub fn from_public_key_der(b: &[u8]) -> Result<Self> {
        let pubkey = PublicKey::from_public_key_der(b).map_err(|e| Error::Key {
            message: format!("failed PublicKey::from_public_key_der {}", e),
        })?;
        Ok(Self(pubkey))
    }

    /// Decodes a PEM-encoded "SubjectPublicKeyInfo" document.
    pub fn from_public_key_pem(s: &str) -> Result<Self> {
        let pubkey = PublicKey::from_public_key_pem(s).map_err(|e| Error::Key {
            message: format!("failed PublicKey::from_public_key_pem {}", e),
        })?;
        Ok(Self(pubkey))
    }

    /// Decodes the single-line base64 "SubjectPublicKeyInfo" string, the
    /// wire form of provider configuration key lists.
    pub fn from_spki_base64(s: &str) -> Result<Self> {
        let der = base64::engine::general_purpose::STANDARD
            .decode(s.trim())
            .map_err(|e| Error::Key {
                message: format!("failed base64::decode of public key {}", e),
            })?;
        let vkey = load_verifying_key_from_spki(&der)?;
        Ok(Self::from_verifying_key(&vkey))
    }

    pub fn from_verifying_key(verifying_key: &VerifyingKey) -> Self {
        let pubkey: PublicKey = verifying_key.into();
        Self(pubkey)
    }

    pub fn to_verifying_key(&self) -> VerifyingKey {
        self.0.into()
    }

    /// Encodes the public key as "SubjectPublicKeyInfo" DER bytes.
    pub fn to_public_key_der(&self) -> Result<Vec<u8>> {
        let doc = self.0.to_public_key_der().map_err(|e| Error::Key {
            message: format!("failed PublicKey::to_public_key_der {}", e),
        })?;
        Ok(doc.as_bytes().to_vec())
    }

    /// Encodes the public key as the single-line base64
    /// "SubjectPublicKeyInfo" string.
    pub fn to_spki_base64(&self) -> Result<String> {
        let der = self.to_public_key_der()?;
        Ok(base64::engine::general_purpose::STANDARD.encode(der))
    }

    /// Converts the public key to uncompressed bytes.
    pub fn to_uncompressed_bytes(&self) -> [u8; UNCOMPRESSED_LEN] {
        let vkey: VerifyingKey = self.0.into();
        let p = vkey.to_encoded_point(false);

        let mut b = [0u8; UNCOMPRESSED_LEN];
        b.copy_from_slice(p.as_bytes());
        b
    }

    /// Verifies the DER-encoded ECDSA signature over the 32-byte SHA256
    /// digest. Malformed DER is a non-match, not an error.
    #[must_use]
    pub fn verify(&self, digest: &[u8], sig_der: &[u8]) -> bool {
        let sig = match Sig::from_der(sig_der) {
            Ok(s) => s,
            Err(_) => return false,
        };
        self.to_verifying_key().verify_prehash(digest, &sig.0).is_ok()
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let val = String::deserialize(deserializer)?;
        Self::from_spki_base64(&val).map_err(Error::custom)
    }
}

impl Serialize for Key {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::Error;

        let s = self.to_spki_base64().map_err(S::Error::custom)?;
        serializer.serialize_str(&s)
    }
}

impl From<PublicKey> for Key {
    fn from(pubkey: PublicKey) -> Self {
        Self(pubkey)
    }
}

impl From<Key> for PublicKey {
    fn from(k: Key) -> Self {
        k.0
    }
}

impl From<VerifyingKey> for Key {
    fn from(vkey: VerifyingKey) -> Self {
        Self(vkey.into())
    }
}

impl From<Key> for VerifyingKey {
    fn from(k: Key) -> Self {
        k.0.into()
    }
}

/// Same as "from_public_key_der", through the raw spki parser.
pub fn load_verifying_key_from_spki(b: &[u8]) -> Result<VerifyingKey> {
    let spk = spki::SubjectPublicKeyInfoRef::try_from(b).map_err(|e| Error::Key {
        message: format!("failed to load spki::SubjectPublicKeyInfoRef {}", e),
    })?;
    VerifyingKey::from_sec1_bytes(spk.subject_public_key.raw_bytes()).map_err(|e| Error::Key {
        message: format!(
            "failed to load p256::ecdsa::VerifyingKey::from_sec1_bytes {}",
            e
        ),
    })
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- key::p256::public_key::test_public_key --exact --show-output
#[test]
fn test_public_key() {
    use crate::hash;

    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .is_test(true)
        .try_init();

    let pk1 = crate::key::p256::private_key::Key::generate().unwrap();
    let pubkey1 = pk1.to_public_key();

    let b = pubkey1.to_uncompressed_bytes();
    assert_eq!(b[0], 0x04);
    let pubkey2 = Key::from_sec1_bytes(&b).unwrap();
    assert_eq!(pubkey1, pubkey2);

    let msg: Vec<u8> = random_manager::secure_bytes(100).unwrap();
    let hashed = hash::sha256(&msg);

    let sig1 = pk1.sign_digest(&hashed).unwrap();
    assert!(pubkey1.verify(&hashed, &sig1.to_der()));
    assert!(pubkey2.verify(&hashed, &sig1.to_der()));

    // malformed DER is a non-match
    assert!(!pubkey1.verify(&hashed, b"not a signature"));
    assert!(!pubkey1.verify(&hashed, &[]));
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- key::p256::public_key::test_spki_wire_form --exact --show-output
#[test]
fn test_spki_wire_form() {
    let pk = crate::key::p256::private_key::Key::generate().unwrap();
    let pubkey = pk.to_public_key();

    let der = pubkey.to_public_key_der().unwrap();
    assert_eq!(der.len(), SPKI_DER_LEN);
    // the 26-byte ASN.1 wrapper for an uncompressed P-256 point
    let header: Vec<u8> = vec![
        0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, //
        0x3d, 0x02, 0x01, 0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, //
        0x03, 0x01, 0x07, 0x03, 0x42, 0x00,
    ];
    assert_eq!(&der[..header.len()], &header[..]);
    assert_eq!(der[header.len()], 0x04);

    let b64 = pubkey.to_spki_base64().unwrap();
    assert!(!b64.contains('\n'));
    let decoded = Key::from_spki_base64(&b64).unwrap();
    assert_eq!(pubkey, decoded);

    let vkey = load_verifying_key_from_spki(&der).unwrap();
    assert_eq!(Key::from_verifying_key(&vkey), pubkey);

    assert!(Key::from_spki_base64("AAAA").is_err());
    assert!(Key::from_spki_base64("!!!").is_err());
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- key::p256::public_key::test_pem --exact --show-output
#[test]
fn test_pem() {
    use p256::pkcs8::LineEnding;

    let pk = crate::key::p256::private_key::Key::generate().unwrap();
    let pubkey = pk.to_public_key();

    let pem = pubkey.0.to_public_key_pem(LineEnding::LF).unwrap();
    assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));

    let decoded = Key::from_public_key_pem(&pem).unwrap();
    assert_eq!(pubkey, decoded);
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- key::p256::public_key::test_key_serialization --exact --show-output
#[test]
fn test_key_serialization() {
    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
    struct Data {
        key: Key,
    }

    let pk = crate::key::p256::private_key::Key::generate().unwrap();
    let pubkey = pk.to_public_key();
    let d = Data { key: pubkey };

    let json_encoded = serde_json::to_string(&d).unwrap();
    let json_decoded = serde_json::from_str::<Data>(&json_encoded).unwrap();
    assert_eq!(pubkey, json_decoded.key);
}
