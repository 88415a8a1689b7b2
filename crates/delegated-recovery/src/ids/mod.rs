//! Implements the recovery token Id type (16-byte).
//!
//! Every token carries exactly 16 bytes of entropy, unique per token.
//! The string form is the 32-character lowercase hex encoding, which is
//! also how ids travel in token-status callbacks.
use std::{fmt, str::FromStr};

use crate::errors::{Error, Result};
use lazy_static::lazy_static;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{self, de::Visitor, Deserialize, Deserializer, Serialize, Serializer};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

pub const LEN: usize = 16;

/// The string form is hex, so exactly twice the byte length.
pub const HEX_LEN: usize = LEN * 2;

fn secure_random() -> &'static dyn SecureRandom {
    use std::ops::Deref;
    lazy_static! {
        static ref RANDOM: SystemRandom = SystemRandom::new();
    }
    RANDOM.deref()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsBytes, FromZeroes, FromBytes, Unaligned)]
#[repr(transparent)]
pub struct Id([u8; LEN]);

impl Default for Id {
    fn default() -> Self {
        Self::empty()
    }
}

impl Id {
    pub fn empty() -> Self {
        Id([0; LEN])
    }

    pub fn is_empty(&self) -> bool {
        (*self) == Self::empty()
    }

    /// Generates an Id from secure random bytes.
    pub fn generate() -> Result<Self> {
        let mut b = [0u8; LEN];
        secure_random().fill(&mut b).map_err(|e| Error::Key {
            message: format!("failed secure_random {}", e),
        })?;
        Ok(Id(b))
    }

    /// Loads the Id from the raw bytes, which must be exactly 16-byte.
    pub fn from_slice(d: &[u8]) -> Result<Self> {
        if d.len() != LEN {
            return Err(Error::MalformedToken {
                message: format!("token id must be {}-byte, got {}-byte", LEN, d.len()),
            });
        }
        let mut b = [0u8; LEN];
        b.copy_from_slice(d);
        Ok(Id(b))
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl AsRef<[u8]> for Id {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// ref. <https://doc.rust-lang.org/std/string/trait.ToString.html>
/// ref. <https://doc.rust-lang.org/std/fmt/trait.Display.html>
/// Use "Self.to_string()" to directly invoke this.
impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// ref. <https://doc.rust-lang.org/std/str/trait.FromStr.html>
impl FromStr for Id {
    type Err = Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        // trim in case it's parsed from a form field
        let decoded = hex::decode(s.trim()).map_err(|e| Error::MalformedToken {
            message: format!("failed hex::decode '{}'", e),
        })?;
        Self::from_slice(&decoded)
    }
}

/// Custom serializer.
/// ref. <https://serde.rs/impl-serialize.html>
impl Serialize for Id {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Custom deserializer.
/// ref. <https://serde.rs/impl-deserialize.html>
impl<'de> Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Id, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct IdVisitor;

        impl<'de> Visitor<'de> for IdVisitor {
            type Value = Id;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a 32-character hex-encoded token id")
            }

            fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Id::from_str(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- ids::test_id --exact --show-output
#[test]
fn test_id() {
    let id1 = Id::generate().unwrap();
    let id2 = Id::generate().unwrap();
    assert_ne!(id1, id2);
    assert!(!id1.is_empty());

    let s = id1.to_string();
    assert_eq!(s.len(), HEX_LEN);
    let parsed = Id::from_str(&s).unwrap();
    assert_eq!(id1, parsed);

    let id3 = Id::from_str("00112233445566778899aabbccddeeff").unwrap();
    assert_eq!(
        id3.to_vec(),
        vec![
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, //
            0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff,
        ]
    );

    // wrong lengths are rejected
    assert!(Id::from_str("0011").is_err());
    assert!(Id::from_slice(&[0u8; 15]).is_err());
    assert!(Id::from_slice(&[0u8; 17]).is_err());
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- ids::test_custom_de_serializer --exact --show-output
#[test]
fn test_custom_de_serializer() {
    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
    struct Data {
        id: Id,
    }

    let d = Data {
        id: Id::from_str("00112233445566778899aabbccddeeff").unwrap(),
    };

    let json_encoded = serde_json::to_string(&d).unwrap();
    assert_eq!(
        json_encoded,
        r#"{"id":"00112233445566778899aabbccddeeff"}"#
    );
    let json_decoded = serde_json::from_str::<Data>(&json_encoded).unwrap();
    assert_eq!(d, json_decoded);
}
