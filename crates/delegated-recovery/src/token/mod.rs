//! The binary recovery-token wire format.
//!
//! Layout, all integers big-endian:
//!
//! ```text
//!  uint8    version
//!  uint8    type
//!  byte[16] id
//!  uint8    options
//!  uint16   issuer_length      ASCII issuer[issuer_length]
//!  uint16   audience_length    ASCII audience[audience_length]
//!  uint16   issued_time_length ASCII issued_time[issued_time_length]
//!  uint16   data_length        data[data_length]
//!  uint16   binding_length     binding[binding_length]
//!  variable signature (ASN.1 DER ECDSA, to end of buffer)
//! ```
//!
//! The canonical signing input is every byte preceding the signature.
//! Tokens travel base64-encoded (standard alphabet, "=" padding, single
//! line).
pub mod countersigned;
pub mod recovery;

use crate::{
    errors::{Error, Result},
    ids,
    packer::{self, Packer},
};
use base64::Engine;
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};

/// The only defined token version.
pub const VERSION: u8 = 0x00;

/// The issuing account provider asks the recovery provider to post
/// save/delete status callbacks.
pub const OPTION_STATUS_REQUESTED: u8 = 0x01;
/// The issuing account provider asks for low-friction recovery.
pub const OPTION_LOW_FRICTION_REQUESTED: u8 = 0x02;

/// bytes before the first length-prefixed field: version, type, id, options
const HEADER_LEN: usize = 1 + 1 + ids::LEN + 1;

/// number of uint16 length prefixes in the layout
const LENGTH_FIELDS: usize = 5;

/// The type byte, the tag discriminating the two token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Type {
    Recovery = 0x00,
    Countersigned = 0x01,
}

impl TryFrom<u8> for Type {
    type Error = Error;
    fn try_from(v: u8) -> Result<Self> {
        match v {
            0x00 => Ok(Type::Recovery),
            0x01 => Ok(Type::Countersigned),
            _ => Err(Error::MalformedToken {
                message: format!("unknown token type 0x{:02x}", v),
            }),
        }
    }
}

impl From<Type> for u8 {
    fn from(t: Type) -> Self {
        t as u8
    }
}

/// A parsed or constructed token. Superset of both token kinds; the
/// countersigned kind is discriminated by "token_type" and carries the
/// original recovery token in "data".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub version: u8,
    pub token_type: Type,
    pub id: ids::Id,
    /// Bitwise OR of OPTION_* values; other bits are reserved zero at
    /// construction and carried as-is on parse.
    pub options: u8,
    pub issuer: String,
    pub audience: String,
    /// ASCII ISO-8601 with time-zone designator, second precision,
    /// e.g. "2017-01-31T15:04:05+00:00".
    pub issued_time: String,
    /// Opaque payload, at most 65535 bytes. Countersigned tokens carry
    /// the original recovery token here.
    pub data: Vec<u8>,
    /// Channel/session binding, at most 65535 bytes, usually empty.
    pub binding: Vec<u8>,
    /// ASN.1 DER ECDSA signature over all preceding bytes of the
    /// serialization; empty when unsigned.
    pub signature: Vec<u8>,
}

impl Token {
    /// Serializes the token without its signature: the canonical signing
    /// input. Signatures over anything else are invalid.
    pub fn signing_input(&self) -> Result<Vec<u8>> {
        self.pack(false)
    }

    /// Serializes the full token, signature included.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.pack(true)
    }

    fn pack(&self, with_signature: bool) -> Result<Vec<u8>> {
        let mut n = HEADER_LEN
            + LENGTH_FIELDS * packer::U16_LEN
            + self.issuer.len()
            + self.audience.len()
            + self.issued_time.len()
            + self.data.len()
            + self.binding.len();
        if with_signature {
            n += self.signature.len();
        }

        let packer = Packer::new(n, n);
        packer.pack_byte(self.version)?;
        packer.pack_byte(self.token_type.into())?;
        packer.pack_bytes(self.id.as_ref())?;
        packer.pack_byte(self.options)?;
        packer.pack_str(&self.issuer)?;
        packer.pack_str(&self.audience)?;
        packer.pack_str(&self.issued_time)?;
        packer.pack_bytes_with_header(&self.data)?;
        packer.pack_bytes_with_header(&self.binding)?;
        if with_signature {
            packer.pack_bytes(&self.signature)?;
        }
        Ok(packer.take_bytes().to_vec())
    }

    /// Deserializes a token from the wire bytes. Everything after the
    /// length-prefixed fields is the signature, possibly empty.
    pub fn from_bytes(b: &[u8]) -> Result<Self> {
        let packer = Packer::for_unpack(b);

        let version = packer.unpack_byte()?;
        if version != VERSION {
            return Err(Error::MalformedToken {
                message: format!("unknown token version 0x{:02x}", version),
            });
        }
        let token_type = Type::try_from(packer.unpack_byte()?)?;
        let id = ids::Id::from_slice(&packer.unpack_bytes(ids::LEN)?)?;
        let options = packer.unpack_byte()?;
        let issuer = packer.unpack_str()?;
        let audience = packer.unpack_str()?;
        let issued_time = packer.unpack_str()?;
        let data = packer.unpack_bytes_with_header()?;
        let binding = packer.unpack_bytes_with_header()?;
        let signature = packer.unpack_remaining()?;

        Ok(Self {
            version,
            token_type,
            id,
            options,
            issuer,
            audience,
            issued_time,
            data,
            binding,
            signature,
        })
    }

    /// Encodes the full token as single-line base64 with padding.
    pub fn to_base64(&self) -> Result<String> {
        Ok(base64::engine::general_purpose::STANDARD.encode(self.to_bytes()?))
    }

    /// Decodes a base64-encoded token.
    pub fn from_base64(s: &str) -> Result<Self> {
        let b = base64::engine::general_purpose::STANDARD
            .decode(s.trim())
            .map_err(|e| Error::MalformedToken {
                message: format!("failed base64::decode {}", e),
            })?;
        Self::from_bytes(&b)
    }

    /// Parses the ASCII ISO-8601 issued time into an instant.
    pub fn issued_instant(&self) -> Result<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.issued_time).map_err(|e| Error::MalformedToken {
            message: format!("bad issued time '{}': {}", self.issued_time, e),
        })
    }
}

/// Formats an instant in the second-precision ISO-8601 form tokens carry,
/// e.g. "2017-01-31T15:04:05+00:00".
pub fn format_issued_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, false)
}

#[cfg(test)]
fn test_token(token_type: Type) -> Token {
    use std::str::FromStr;
    Token {
        version: VERSION,
        token_type,
        id: ids::Id::from_str("00112233445566778899aabbccddeeff").unwrap(),
        options: OPTION_STATUS_REQUESTED,
        issuer: "https://ap.example".to_string(),
        audience: "https://rp.example".to_string(),
        issued_time: "2017-01-31T15:04:05+00:00".to_string(),
        data: vec![0xde, 0xad, 0xbe, 0xef],
        binding: Vec::new(),
        signature: vec![0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x01],
    }
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- token::test_round_trip --exact --show-output
#[test]
fn test_round_trip() {
    let t = test_token(Type::Recovery);

    let b = t.to_bytes().unwrap();
    let parsed = Token::from_bytes(&b).unwrap();
    assert_eq!(t, parsed);
    // byte-for-byte
    assert_eq!(parsed.to_bytes().unwrap(), b);

    let encoded = t.to_base64().unwrap();
    assert!(!encoded.contains('\n'));
    let parsed = Token::from_base64(&encoded).unwrap();
    assert_eq!(t, parsed);
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- token::test_layout --exact --show-output
#[test]
fn test_layout() {
    let t = test_token(Type::Countersigned);
    let b = t.to_bytes().unwrap();

    assert_eq!(b[0], 0x00); // version
    assert_eq!(b[1], 0x01); // type
    assert_eq!(&b[2..18], t.id.as_ref()); // id
    assert_eq!(b[18], OPTION_STATUS_REQUESTED); // options
    assert_eq!(&b[19..21], &[0x00, 0x12]); // issuer_length 18
    assert_eq!(&b[21..39], b"https://ap.example");

    // the signing input is every byte preceding the signature
    let input = t.signing_input().unwrap();
    assert_eq!(&b[..b.len() - t.signature.len()], &input[..]);
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- token::test_unknown_version_type --exact --show-output
#[test]
fn test_unknown_version_type() {
    let t = test_token(Type::Recovery);
    let mut b = t.to_bytes().unwrap();

    b[0] = 0x01;
    assert!(Token::from_bytes(&b).is_err());

    b[0] = 0x00;
    b[1] = 0x02;
    assert!(Token::from_bytes(&b).is_err());
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- token::test_truncated --exact --show-output
#[test]
fn test_truncated() {
    let t = test_token(Type::Recovery);
    let b = t.to_bytes().unwrap();

    // the buffer must decompose into the declared fields; any truncation
    // before the end of the length-prefixed region fails
    let sig_start = b.len() - t.signature.len();
    for n in 0..sig_start {
        let err = Token::from_bytes(&b[..n]).unwrap_err();
        assert_eq!(err.reason(), "malformed-token", "truncation at {}", n);
    }

    // truncating into the signature still parses (the signature is
    // whatever remains); it just won't verify
    let parsed = Token::from_bytes(&b[..sig_start + 1]).unwrap();
    assert_eq!(parsed.signature, vec![0x30]);
    let parsed = Token::from_bytes(&b[..sig_start]).unwrap();
    assert!(parsed.signature.is_empty());
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- token::test_length_overrun --exact --show-output
#[test]
fn test_length_overrun() {
    let t = test_token(Type::Recovery);
    let mut b = t.to_bytes().unwrap();

    // inflate the declared issuer length beyond the buffer
    b[19] = 0xff;
    b[20] = 0xff;
    let err = Token::from_bytes(&b).unwrap_err();
    assert_eq!(err.reason(), "malformed-token");
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- token::test_non_ascii --exact --show-output
#[test]
fn test_non_ascii() {
    let t = test_token(Type::Recovery);
    let mut b = t.to_bytes().unwrap();

    // first byte of the issuer field
    b[21] = 0xc3;
    let err = Token::from_bytes(&b).unwrap_err();
    assert_eq!(err.reason(), "malformed-token");
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- token::test_oversize_field --exact --show-output
#[test]
fn test_oversize_field() {
    let mut t = test_token(Type::Recovery);
    t.data = vec![0u8; packer::MAX_U16_LEN + 1];
    assert!(t.to_bytes().is_err());

    t.data = vec![0u8; 1024];
    assert!(t.to_bytes().is_ok());
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- token::test_issued_time --exact --show-output
#[test]
fn test_issued_time() {
    use chrono::TimeZone;

    let t0 = Utc.with_ymd_and_hms(2017, 1, 31, 15, 4, 5).unwrap();
    assert_eq!(format_issued_time(t0), "2017-01-31T15:04:05+00:00");

    let t = test_token(Type::Recovery);
    let parsed = t.issued_instant().unwrap();
    assert_eq!(parsed.timestamp(), t0.timestamp());

    let mut bad = t;
    bad.issued_time = "yesterday".to_string();
    assert!(bad.issued_instant().is_err());
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- token::test_base64_strictness --exact --show-output
#[test]
fn test_base64_strictness() {
    assert!(Token::from_base64("!!not base64!!").is_err());
    // valid base64 of garbage bytes is still a malformed token
    assert!(Token::from_base64("AAECAw==").is_err());
}
