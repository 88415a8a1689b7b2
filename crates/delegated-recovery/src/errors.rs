//! Custom error types used in delegated-recovery.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Backing errors for all token, key, and configuration operations.
///
/// Validation fails fast and total: a token is either fully valid or
/// rejected with the first failing condition. Every variant maps to a
/// stable machine-readable reason so callers can surface structured
/// failures over the wire without leaking internals.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid origin '{origin}': {message}")]
    InvalidOrigin { origin: String, message: String },

    #[error("malformed token: {message}")]
    MalformedToken { message: String },

    #[error("signature does not verify under any provided key")]
    SignatureInvalid,

    #[error("issuer mismatch (token: {got:?}, expected: {want:?})")]
    IssuerMismatch { got: String, want: String },

    #[error("audience mismatch (token: {got:?}, expected: {want:?})")]
    AudienceMismatch { got: String, want: String },

    #[error("binding mismatch")]
    BindingMismatch,

    #[error("token issued {skew_ms}ms from now, allowed clock skew {allowed_ms}ms")]
    TokenExpired { skew_ms: i64, allowed_ms: i64 },

    #[error("token was already submitted")]
    ReplayDetected,

    #[error("failed to fetch configuration (message: {message:?}, retryable: {retryable:?})")]
    ConfigFetch { message: String, retryable: bool },

    #[error("key failure: {message}")]
    Key { message: String },

    #[error("signing failure: {message}")]
    Signing { message: String },
}

impl Error {
    /// Returns the stable machine-readable reason for this error.
    #[inline]
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Error::InvalidOrigin { .. } => "invalid-origin",
            Error::MalformedToken { .. } => "malformed-token",
            Error::SignatureInvalid => "signature-invalid",
            Error::IssuerMismatch { .. } => "issuer-mismatch",
            Error::AudienceMismatch { .. } => "audience-mismatch",
            Error::BindingMismatch => "binding-mismatch",
            Error::TokenExpired { .. } => "token-expired",
            Error::ReplayDetected => "replay-detected",
            Error::ConfigFetch { .. } => "config-fetch-error",
            Error::Key { .. } => "key-error",
            Error::Signing { .. } => "signing-error",
        }
    }

    /// Returns if the error is retryable.
    #[inline]
    #[must_use]
    pub fn retryable(&self) -> bool {
        match self {
            Error::ConfigFetch { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- errors::test_reason --exact --show-output
#[test]
fn test_reason() {
    let e = Error::MalformedToken {
        message: "buffer truncated".to_string(),
    };
    assert_eq!(e.reason(), "malformed-token");
    assert!(!e.retryable());

    let e = Error::ConfigFetch {
        message: "connection reset".to_string(),
        retryable: true,
    };
    assert_eq!(e.reason(), "config-fetch-error");
    assert!(e.retryable());

    assert_eq!(Error::SignatureInvalid.reason(), "signature-invalid");
    assert_eq!(Error::ReplayDetected.reason(), "replay-detected");
}
