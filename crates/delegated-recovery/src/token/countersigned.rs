//! Recovery-provider countersigning and account-provider validation of
//! countersigned tokens.
use crate::{
    errors::{Error, Result},
    hash, ids,
    key::p256::{self, private_key, public_key},
    origin,
    token::{self, Token, Type},
};
use chrono::{DateTime, Utc};

/// Builds the countersigned wrapper for `original` and returns its base64
/// form: a fresh id, type 0x01, issuer/audience swapped relative to the
/// original, and the original's full binary form carried in `data`.
pub fn countersign(
    key: &private_key::Key,
    original: &Token,
    issuer: &str,
    options: u8,
    binding: &[u8],
) -> Result<String> {
    countersign_at(key, original, issuer, options, binding, Utc::now())
}

/// Same as "countersign" with an explicit issue instant.
pub fn countersign_at(
    key: &private_key::Key,
    original: &Token,
    issuer: &str,
    options: u8,
    binding: &[u8],
    issued_at: DateTime<Utc>,
) -> Result<String> {
    origin::validate(issuer)?;
    // the countersignature is addressed back to the original issuer
    origin::validate(&original.issuer)?;

    let mut t = Token {
        version: token::VERSION,
        token_type: Type::Countersigned,
        id: ids::Id::generate()?,
        options,
        issuer: issuer.to_string(),
        audience: original.issuer.clone(),
        issued_time: token::format_issued_time(issued_at),
        data: original.to_bytes()?,
        binding: binding.to_vec(),
        signature: Vec::new(),
    };

    let digest = hash::sha256(t.signing_input()?);
    t.signature = key.sign_digest(&digest)?.to_der();

    log::debug!("countersigned token {} for {}", t.id, t.audience);
    t.to_base64()
}

/// A countersigned token that passed every validation step. The fallible
/// "validate" constructor is the only way to obtain one.
#[derive(Debug, Clone)]
pub struct CountersignedToken {
    token: Token,
    encoded: String,
    inner_token_hash: String,
}

impl CountersignedToken {
    /// Validates a base64-encoded countersigned token. Checks run in a
    /// fixed order and fail on the first failing one:
    ///
    /// 1. the codec parses the bytes (version and type range included)
    /// 2. the type byte marks a countersigned token
    /// 3. issuer and audience equal the expected origins
    /// 4. the binding is byte-equal to the expected binding
    /// 5. the signature verifies under at least one supplied key
    /// 6. the issued time is within the allowed clock skew of now
    pub fn validate(
        encoded: &str,
        expected_issuer: &str,
        expected_audience: &str,
        allowed_clock_skew_secs: u64,
        expected_binding: &[u8],
        keys: &[public_key::Key],
    ) -> Result<Self> {
        let t = Token::from_base64(encoded)?;

        if t.token_type != Type::Countersigned {
            return Err(Error::MalformedToken {
                message: "type byte does not mark a countersigned token".to_string(),
            });
        }

        if t.issuer != expected_issuer {
            return Err(Error::IssuerMismatch {
                got: t.issuer,
                want: expected_issuer.to_string(),
            });
        }
        if t.audience != expected_audience {
            return Err(Error::AudienceMismatch {
                got: t.audience,
                want: expected_audience.to_string(),
            });
        }

        if t.binding != expected_binding {
            return Err(Error::BindingMismatch);
        }

        let input = t.signing_input()?;
        if !p256::verify_any(&input, &t.signature, keys) {
            return Err(Error::SignatureInvalid);
        }

        let issued = t.issued_instant()?;
        let skew_ms = Utc::now()
            .signed_duration_since(issued)
            .num_milliseconds()
            .abs();
        let allowed_ms = (allowed_clock_skew_secs as i64).saturating_mul(1000);
        if skew_ms > allowed_ms {
            return Err(Error::TokenExpired { skew_ms, allowed_ms });
        }

        let inner_token_hash = hash::sha256_hex(&t.data);
        Ok(Self {
            token: t,
            encoded: encoded.to_string(),
            inner_token_hash,
        })
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    /// Lowercase hex SHA-256 of the `data` field, i.e. of the original
    /// recovery token. The account provider rejoins the countersigned
    /// token to its record by this hash.
    pub fn inner_token_hash(&self) -> &str {
        &self.inner_token_hash
    }

    /// Parses the wrapped original recovery token out of `data`.
    pub fn inner_token(&self) -> Result<Token> {
        Token::from_bytes(&self.token.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::recovery::RecoveryToken;
    use chrono::Duration;

    struct Fixture {
        ap_key: private_key::Key,
        rp_key: private_key::Key,
        original: Token,
        encoded: String,
    }

    fn fixture() -> Fixture {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .is_test(true)
            .try_init();

        let ap_key = private_key::Key::generate().unwrap();
        let rp_key = private_key::Key::generate().unwrap();

        let rt = RecoveryToken::issue(
            &ap_key,
            ids::Id::generate().unwrap(),
            token::OPTION_STATUS_REQUESTED,
            "https://ap.example",
            "https://rp.example",
            &[],
            &[],
        )
        .unwrap();

        let encoded =
            countersign(&rp_key, rt.token(), "https://rp.example", 0x00, &[]).unwrap();

        Fixture {
            ap_key,
            rp_key,
            original: rt.token().clone(),
            encoded,
        }
    }

    /// RUST_LOG=debug cargo test --package delegated-recovery --lib -- token::countersigned::tests::test_validate --exact --show-output
    #[test]
    fn test_validate() {
        let f = fixture();

        let ct = CountersignedToken::validate(
            &f.encoded,
            "https://rp.example",
            "https://ap.example",
            3600,
            &[],
            &[f.rp_key.to_public_key()],
        )
        .unwrap();

        assert_eq!(ct.token().token_type, Type::Countersigned);
        assert_eq!(ct.token().issuer, "https://rp.example");
        assert_eq!(ct.token().audience, "https://ap.example");

        // the data field carries the original token, byte-for-byte
        let inner = ct.inner_token().unwrap();
        assert_eq!(inner, f.original);
        assert_eq!(
            ct.inner_token_hash(),
            hash::sha256_hex(f.original.to_bytes().unwrap())
        );
        // the wrapped signature still verifies under the issuing key
        assert!(p256::verify_any(
            &inner.signing_input().unwrap(),
            &inner.signature,
            &[f.ap_key.to_public_key()]
        ));
    }

    /// RUST_LOG=debug cargo test --package delegated-recovery --lib -- token::countersigned::tests::test_validate_wrong_type --exact --show-output
    #[test]
    fn test_validate_wrong_type() {
        let f = fixture();

        // a plain recovery token is not a countersigned token
        let plain = f.original.to_base64().unwrap();
        let err = CountersignedToken::validate(
            &plain,
            "https://ap.example",
            "https://rp.example",
            3600,
            &[],
            &[f.ap_key.to_public_key()],
        )
        .unwrap_err();
        assert_eq!(err.reason(), "malformed-token");
    }

    /// RUST_LOG=debug cargo test --package delegated-recovery --lib -- token::countersigned::tests::test_validate_mismatches --exact --show-output
    #[test]
    fn test_validate_mismatches() {
        let f = fixture();
        let keys = [f.rp_key.to_public_key()];

        let err = CountersignedToken::validate(
            &f.encoded,
            "https://other.example",
            "https://ap.example",
            3600,
            &[],
            &keys,
        )
        .unwrap_err();
        assert_eq!(err.reason(), "issuer-mismatch");

        let err = CountersignedToken::validate(
            &f.encoded,
            "https://rp.example",
            "https://other.example",
            3600,
            &[],
            &keys,
        )
        .unwrap_err();
        assert_eq!(err.reason(), "audience-mismatch");

        let err = CountersignedToken::validate(
            &f.encoded,
            "https://rp.example",
            "https://ap.example",
            3600,
            b"session-binding",
            &keys,
        )
        .unwrap_err();
        assert_eq!(err.reason(), "binding-mismatch");
    }

    /// RUST_LOG=debug cargo test --package delegated-recovery --lib -- token::countersigned::tests::test_validate_tamper --exact --show-output
    #[test]
    fn test_validate_tamper() {
        let f = fixture();

        let mut t = Token::from_base64(&f.encoded).unwrap();
        t.data[0] ^= 0x01;
        let tampered = t.to_base64().unwrap();

        let err = CountersignedToken::validate(
            &tampered,
            "https://rp.example",
            "https://ap.example",
            3600,
            &[],
            &[f.rp_key.to_public_key()],
        )
        .unwrap_err();
        assert_eq!(err.reason(), "signature-invalid");

        // a key that never countersigned fails, too
        let stranger = private_key::Key::generate().unwrap();
        let err = CountersignedToken::validate(
            &f.encoded,
            "https://rp.example",
            "https://ap.example",
            3600,
            &[],
            &[stranger.to_public_key()],
        )
        .unwrap_err();
        assert_eq!(err.reason(), "signature-invalid");
    }

    /// RUST_LOG=debug cargo test --package delegated-recovery --lib -- token::countersigned::tests::test_validate_clock_skew --exact --show-output
    #[test]
    fn test_validate_clock_skew() {
        let f = fixture();

        // countersigned two hours ago, one hour of skew allowed
        let stale = countersign_at(
            &f.rp_key,
            &f.original,
            "https://rp.example",
            0x00,
            &[],
            Utc::now() - Duration::hours(2),
        )
        .unwrap();

        let err = CountersignedToken::validate(
            &stale,
            "https://rp.example",
            "https://ap.example",
            3600,
            &[],
            &[f.rp_key.to_public_key()],
        )
        .unwrap_err();
        assert_eq!(err.reason(), "token-expired");
        if let Error::TokenExpired { skew_ms, allowed_ms } = err {
            assert_eq!(allowed_ms, 3_600_000);
            assert!(skew_ms > allowed_ms);
        }

        // the skew window is two-sided: a token from the future fails the
        // same way
        let future = countersign_at(
            &f.rp_key,
            &f.original,
            "https://rp.example",
            0x00,
            &[],
            Utc::now() + Duration::hours(2),
        )
        .unwrap();
        let err = CountersignedToken::validate(
            &future,
            "https://rp.example",
            "https://ap.example",
            3600,
            &[],
            &[f.rp_key.to_public_key()],
        )
        .unwrap_err();
        assert_eq!(err.reason(), "token-expired");
    }

    /// RUST_LOG=debug cargo test --package delegated-recovery --lib -- token::countersigned::tests::test_validate_key_rotation --exact --show-output
    #[test]
    fn test_validate_key_rotation() {
        let f = fixture();
        let k_new = private_key::Key::generate().unwrap();

        // [K_new, K_old] accepts a token countersigned by the old key
        let rotated = [k_new.to_public_key(), f.rp_key.to_public_key()];
        assert!(CountersignedToken::validate(
            &f.encoded,
            "https://rp.example",
            "https://ap.example",
            3600,
            &[],
            &rotated,
        )
        .is_ok());
    }

    /// RUST_LOG=debug cargo test --package delegated-recovery --lib -- token::countersigned::tests::test_validate_binding --exact --show-output
    #[test]
    fn test_validate_binding() {
        let f = fixture();

        let bound = countersign(
            &f.rp_key,
            &f.original,
            "https://rp.example",
            0x00,
            b"channel-binding",
        )
        .unwrap();

        assert!(CountersignedToken::validate(
            &bound,
            "https://rp.example",
            "https://ap.example",
            3600,
            b"channel-binding",
            &[f.rp_key.to_public_key()],
        )
        .is_ok());

        let err = CountersignedToken::validate(
            &bound,
            "https://rp.example",
            "https://ap.example",
            3600,
            &[],
            &[f.rp_key.to_public_key()],
        )
        .unwrap_err();
        assert_eq!(err.reason(), "binding-mismatch");
    }
}
