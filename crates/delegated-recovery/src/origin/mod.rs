//! RFC 6454 web-origin validation, restricted to the "https://host[:port]"
//! form the protocol identifies principals by.
//!
//! The grammar is deliberately narrow: lower-case DNS labels only, no
//! path, query, fragment, or trailing slash. Two origins are the same
//! principal exactly when the validated strings are equal, so any
//! tolerated ambiguity (upper case, a trailing slash) would let one
//! principal appear under two spellings.
use crate::errors::{Error, Result};

const SCHEME: &str = "https://";

/// longest DNS label
const MAX_LABEL_LEN: usize = 63;
/// shortest top-level label
const MIN_TLD_LEN: usize = 2;

/// Validates the origin against
/// "^https://([a-z0-9-]{1,63}\.)+[a-z]{2,63}(:[0-9]+)?$".
pub fn validate(s: &str) -> Result<()> {
    let fail = |message: &str| Error::InvalidOrigin {
        origin: s.to_string(),
        message: message.to_string(),
    };

    let rest = s
        .strip_prefix(SCHEME)
        .ok_or_else(|| fail("scheme must be 'https://'"))?;

    let (host, port) = match rest.split_once(':') {
        Some((h, p)) => (h, Some(p)),
        None => (rest, None),
    };

    if let Some(port) = port {
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(fail("port must be one or more digits"));
        }
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 {
        return Err(fail("host must be at least two dot-separated labels"));
    }

    for label in &labels[..labels.len() - 1] {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(fail("host label must be 1-63 characters"));
        }
        if !label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        {
            return Err(fail("host label must match [a-z0-9-]"));
        }
    }

    let tld = labels[labels.len() - 1];
    if tld.len() < MIN_TLD_LEN || tld.len() > MAX_LABEL_LEN {
        return Err(fail("top-level label must be 2-63 characters"));
    }
    if !tld.bytes().all(|b| b.is_ascii_lowercase()) {
        return Err(fail("top-level label must match [a-z]"));
    }

    Ok(())
}

/// Returns true if the origin passes "validate".
#[must_use]
pub fn is_valid(s: &str) -> bool {
    validate(s).is_ok()
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- origin::test_validate --exact --show-output
#[test]
fn test_validate() {
    let valid = [
        "https://example.com",
        "https://ap.example",
        "https://rp.example",
        "https://a.b.c.example.org",
        "https://sub-domain.example.com:8443",
        "https://0.example.com",
        "https://example.com:1",
        "https://example.com:443",
    ];
    for s in valid.iter() {
        assert!(is_valid(s), "expected valid: {}", s);
    }

    let invalid = [
        "",
        "https://",
        "http://example.com",
        "ftp://example.com",
        "example.com",
        "https://example",          // single label
        "https://EXAMPLE.COM",      // upper case
        "https://example.com/",     // trailing slash
        "https://example.com/path", // path
        "https://example.com?q=1",  // query
        "https://example.com#f",    // fragment
        "https://example.com:",     // empty port
        "https://example.com:80a",  // non-digit port
        "https://example.com:80:1", // double port
        "https://.example.com",     // empty label
        "https://example..com",     // empty label
        "https://example.c",        // 1-char TLD
        "https://example.c0m",      // digit in TLD
        "https://exa_mple.com",     // underscore
        "https://user@example.com", // userinfo
    ];
    for s in invalid.iter() {
        assert!(!is_valid(s), "expected invalid: {}", s);
    }

    // a label longer than 63 characters is rejected
    let long = format!("https://{}.example.com", "a".repeat(64));
    assert!(!is_valid(&long));
    let ok = format!("https://{}.example.com", "a".repeat(63));
    assert!(is_valid(&ok));
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- origin::test_validate_error --exact --show-output
#[test]
fn test_validate_error() {
    let e = validate("https://example.com/").unwrap_err();
    assert_eq!(e.reason(), "invalid-origin");
    // equality of validated origins is plain string equality
    assert!(is_valid("https://example.com"));
    assert!(!is_valid("https://example.com/"));
}
