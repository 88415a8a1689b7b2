//! Account-provider recovery token construction.
use crate::{
    errors::Result,
    hash, ids,
    key::p256::private_key,
    origin,
    token::{self, Token, Type},
};
use chrono::{DateTime, Utc};

/// A constructed, signed recovery token, ready to deposit with the
/// recovery provider.
#[derive(Debug, Clone)]
pub struct RecoveryToken {
    token: Token,
    encoded: String,
}

impl RecoveryToken {
    /// Builds and signs a recovery token issued now.
    ///
    /// The issuer is the account provider's origin, the audience the
    /// recovery provider's. `data` is opaque to the protocol; if it is
    /// sensitive, encrypt it before passing it in.
    pub fn issue(
        key: &private_key::Key,
        id: ids::Id,
        options: u8,
        issuer: &str,
        audience: &str,
        data: &[u8],
        binding: &[u8],
    ) -> Result<Self> {
        Self::issue_at(key, id, options, issuer, audience, data, binding, Utc::now())
    }

    /// Same as "issue" with an explicit issue instant.
    #[allow(clippy::too_many_arguments)]
    pub fn issue_at(
        key: &private_key::Key,
        id: ids::Id,
        options: u8,
        issuer: &str,
        audience: &str,
        data: &[u8],
        binding: &[u8],
        issued_at: DateTime<Utc>,
    ) -> Result<Self> {
        origin::validate(issuer)?;
        origin::validate(audience)?;

        let mut t = Token {
            version: token::VERSION,
            token_type: Type::Recovery,
            id,
            options,
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            issued_time: token::format_issued_time(issued_at),
            data: data.to_vec(),
            binding: binding.to_vec(),
            signature: Vec::new(),
        };

        let digest = hash::sha256(t.signing_input()?);
        t.signature = key.sign_digest(&digest)?.to_der();

        let encoded = t.to_base64()?;
        log::debug!("issued recovery token {} for {}", t.id, t.audience);

        Ok(Self { token: t, encoded })
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    /// The base64 form handed to the recovery provider.
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    /// SHA-256 of the raw (base64-decoded) token bytes; the join key the
    /// account provider stores in the token record.
    pub fn token_hash(&self) -> Result<Vec<u8>> {
        Ok(hash::sha256(self.token.to_bytes()?))
    }
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- token::recovery::test_issue --exact --show-output
#[test]
fn test_issue() {
    use crate::key::p256;

    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .is_test(true)
        .try_init();

    let key = private_key::Key::generate().unwrap();
    let id = ids::Id::generate().unwrap();

    let rt = RecoveryToken::issue(
        &key,
        id,
        token::OPTION_STATUS_REQUESTED,
        "https://ap.example",
        "https://rp.example",
        &[],
        &[],
    )
    .unwrap();

    let t = Token::from_base64(rt.encoded()).unwrap();
    assert_eq!(t, *rt.token());
    assert_eq!(t.version, token::VERSION);
    assert_eq!(t.token_type, Type::Recovery);
    assert_eq!(t.id, id);
    assert_eq!(t.issuer, "https://ap.example");
    assert_eq!(t.audience, "https://rp.example");
    assert!(t.data.is_empty());
    assert!(t.binding.is_empty());

    // the issued time is second-precision ISO-8601 with a zone designator
    let issued = t.issued_instant().unwrap();
    let age = Utc::now().signed_duration_since(issued).num_seconds().abs();
    assert!(age <= 5);

    // the signature covers the canonical signing input
    let input = t.signing_input().unwrap();
    assert!(p256::verify_any(
        &input,
        &t.signature,
        &[key.to_public_key()]
    ));

    assert_eq!(rt.token_hash().unwrap(), hash::sha256(t.to_bytes().unwrap()));
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- token::recovery::test_issue_invalid_origin --exact --show-output
#[test]
fn test_issue_invalid_origin() {
    let key = private_key::Key::generate().unwrap();
    let id = ids::Id::generate().unwrap();

    let err = RecoveryToken::issue(&key, id, 0, "http://ap.example", "https://rp.example", &[], &[])
        .unwrap_err();
    assert_eq!(err.reason(), "invalid-origin");

    let err = RecoveryToken::issue(&key, id, 0, "https://ap.example", "https://rp.example/", &[], &[])
        .unwrap_err();
    assert_eq!(err.reason(), "invalid-origin");
}
