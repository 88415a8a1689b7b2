//! Provider configuration documents.
//!
//! Account providers and recovery providers publish a JSON configuration
//! at the well-known path; each side discovers the other's endpoints and
//! public keys from it. Configurations are immutable after construction;
//! callers observe "is_expired" and re-fetch.
pub mod client;

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::{
    errors::{Error, Result},
    key::p256::public_key,
    origin,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Configuration documents live under this path on the provider origin.
pub const WELL_KNOWN_CONFIGURATION_PATH: &str =
    "/.well-known/delegated-account-recovery/configuration";

/// Token-status callbacks post to this path on the account provider origin.
pub const WELL_KNOWN_TOKEN_STATUS_PATH: &str =
    "/.well-known/delegated-account-recovery/token-status";

/// Configuration lifetime when the response carries no "max-age".
pub const DEFAULT_MAX_AGE_SECONDS: u64 = 3600;

/// Which provider's configuration document to expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigType {
    AccountProvider,
    RecoveryProvider,
}

/// The account provider's published configuration.
/// ref. <https://serde.rs/container-attrs.html>
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct AccountProviderConfig {
    pub issuer: String,

    pub save_token_return: String,
    pub recover_account_return: String,
    pub privacy_policy: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_152px: Option<String>,

    /// Base64 "SubjectPublicKeyInfo" strings; the first entry is the
    /// current signing key, the rest are accepted for rotation.
    pub tokensign_pubkeys_secp256r1: Vec<String>,

    /// Instant after which callers must re-fetch; derived from fetch
    /// time plus max-age, never serialized.
    #[serde(skip)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccountProviderConfig {
    /// Parses and validates the configuration JSON. The issuer is
    /// lower-cased before origin validation; every listed public key
    /// must decode. Unknown fields are tolerated, missing required
    /// fields fail citing the field name.
    pub fn from_slice(b: &[u8]) -> Result<Self> {
        let mut c: Self = serde_json::from_slice(b).map_err(|e| Error::ConfigFetch {
            message: format!("invalid configuration JSON: {}", e),
            retryable: false,
        })?;
        c.issuer = c.issuer.to_lowercase();
        c.validate()?;
        Ok(c)
    }

    fn validate(&self) -> Result<()> {
        origin::validate(&self.issuer)?;
        if self.tokensign_pubkeys_secp256r1.is_empty() {
            return Err(Error::ConfigFetch {
                message: "tokensign-pubkeys-secp256r1 must not be empty".to_string(),
                retryable: false,
            });
        }
        for k in self.tokensign_pubkeys_secp256r1.iter() {
            public_key::Key::from_spki_base64(k)?;
        }
        Ok(())
    }

    /// Decodes the published token-signing keys, in list order.
    pub fn tokensign_public_keys(&self) -> Result<Vec<public_key::Key>> {
        self.tokensign_pubkeys_secp256r1
            .iter()
            .map(|k| public_key::Key::from_spki_base64(k))
            .collect()
    }

    /// Sets the expiry to now plus `max_age_seconds`.
    #[must_use]
    pub fn with_expiry(mut self, max_age_seconds: u64) -> Self {
        self.expires_at = Some(Utc::now() + Duration::seconds(max_age_seconds as i64));
        self
    }

    /// Returns true once the configuration's lifetime has passed. Stale
    /// configurations are not refreshed automatically; the caller
    /// re-fetches.
    pub fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |t| Utc::now() > t)
    }

    /// The publish form served at the well-known path.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::ConfigFetch {
            message: format!("failed serde_json::to_string {}", e),
            retryable: false,
        })
    }
}

/// The recovery provider's published configuration.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct RecoveryProviderConfig {
    pub issuer: String,

    pub save_token: String,
    pub recover_account: String,
    pub privacy_policy: String,

    /// Optional: present only in deployments offering the async save API.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_token_async_api_iframe: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_152px: Option<String>,

    /// Largest encoded token the provider stores.
    pub token_max_size: u32,

    /// Base64 "SubjectPublicKeyInfo" strings; the first entry is the
    /// current countersigning key, the rest are accepted for rotation.
    pub countersign_pubkeys_secp256r1: Vec<String>,

    /// Instant after which callers must re-fetch; derived from fetch
    /// time plus max-age, never serialized.
    #[serde(skip)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl RecoveryProviderConfig {
    /// Parses and validates the configuration JSON; see
    /// "AccountProviderConfig::from_slice".
    pub fn from_slice(b: &[u8]) -> Result<Self> {
        let mut c: Self = serde_json::from_slice(b).map_err(|e| Error::ConfigFetch {
            message: format!("invalid configuration JSON: {}", e),
            retryable: false,
        })?;
        c.issuer = c.issuer.to_lowercase();
        c.validate()?;
        Ok(c)
    }

    fn validate(&self) -> Result<()> {
        origin::validate(&self.issuer)?;
        if self.countersign_pubkeys_secp256r1.is_empty() {
            return Err(Error::ConfigFetch {
                message: "countersign-pubkeys-secp256r1 must not be empty".to_string(),
                retryable: false,
            });
        }
        for k in self.countersign_pubkeys_secp256r1.iter() {
            public_key::Key::from_spki_base64(k)?;
        }
        Ok(())
    }

    /// Decodes the published countersigning keys, in list order.
    pub fn countersign_public_keys(&self) -> Result<Vec<public_key::Key>> {
        self.countersign_pubkeys_secp256r1
            .iter()
            .map(|k| public_key::Key::from_spki_base64(k))
            .collect()
    }

    /// Sets the expiry to now plus `max_age_seconds`.
    #[must_use]
    pub fn with_expiry(mut self, max_age_seconds: u64) -> Self {
        self.expires_at = Some(Utc::now() + Duration::seconds(max_age_seconds as i64));
        self
    }

    /// Returns true once the configuration's lifetime has passed.
    pub fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |t| Utc::now() > t)
    }

    /// The publish form served at the well-known path.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::ConfigFetch {
            message: format!("failed serde_json::to_string {}", e),
            retryable: false,
        })
    }
}

/// A typed configuration, per the caller-specified "ConfigType".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Configuration {
    AccountProvider(AccountProviderConfig),
    RecoveryProvider(RecoveryProviderConfig),
}

impl Configuration {
    pub fn issuer(&self) -> &str {
        match self {
            Configuration::AccountProvider(c) => &c.issuer,
            Configuration::RecoveryProvider(c) => &c.issuer,
        }
    }

    pub fn is_expired(&self) -> bool {
        match self {
            Configuration::AccountProvider(c) => c.is_expired(),
            Configuration::RecoveryProvider(c) => c.is_expired(),
        }
    }

    pub fn as_account_provider(&self) -> Option<&AccountProviderConfig> {
        match self {
            Configuration::AccountProvider(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_recovery_provider(&self) -> Option<&RecoveryProviderConfig> {
        match self {
            Configuration::RecoveryProvider(c) => Some(c),
            _ => None,
        }
    }
}

/// Read-mostly cache of fetched configurations, keyed by origin. Slot
/// replacement is publish-after-construct: a fully built configuration is
/// swapped in atomically, readers never observe a partial one.
pub trait ConfigCache: Send + Sync {
    fn get(&self, origin: &str) -> Option<Arc<Configuration>>;
    fn put(&self, origin: &str, config: Configuration);
}

/// In-memory, process-lifetime cache.
#[derive(Debug, Default)]
pub struct MemoryConfigCache {
    slots: RwLock<HashMap<String, Arc<Configuration>>>,
}

impl MemoryConfigCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigCache for MemoryConfigCache {
    fn get(&self, origin: &str) -> Option<Arc<Configuration>> {
        self.slots.read().unwrap().get(origin).cloned()
    }

    fn put(&self, origin: &str, config: Configuration) {
        self.slots
            .write()
            .unwrap()
            .insert(origin.to_string(), Arc::new(config));
    }
}

#[cfg(test)]
fn test_spki_key() -> String {
    let pk = crate::key::p256::private_key::Key::generate().unwrap();
    pk.to_public_key().to_spki_base64().unwrap()
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- config::test_account_provider_config --exact --show-output
#[test]
fn test_account_provider_config() {
    let key = test_spki_key();
    let raw = format!(
        r#"{{
  "issuer": "https://AP.Example",
  "save-token-return": "https://ap.example/recovery/save-return",
  "recover-account-return": "https://ap.example/recovery/recover-return",
  "privacy-policy": "https://ap.example/privacy",
  "icon-152px": "https://ap.example/icon.png",
  "tokensign-pubkeys-secp256r1": ["{}"],
  "unknown-future-field": 42
}}"#,
        key
    );

    let c = AccountProviderConfig::from_slice(raw.as_bytes()).unwrap();
    // the issuer is lower-cased before validation
    assert_eq!(c.issuer, "https://ap.example");
    assert_eq!(c.save_token_return, "https://ap.example/recovery/save-return");
    assert_eq!(c.icon_152px.as_deref(), Some("https://ap.example/icon.png"));
    assert_eq!(c.tokensign_public_keys().unwrap().len(), 1);
    assert!(c.expires_at.is_none());
    assert!(!c.is_expired());

    // publish form round-trips with the exact kebab-case keys
    let published = c.to_json().unwrap();
    assert!(published.contains("\"save-token-return\""));
    assert!(published.contains("\"tokensign-pubkeys-secp256r1\""));
    let again = AccountProviderConfig::from_slice(published.as_bytes()).unwrap();
    assert_eq!(c, again);
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- config::test_account_provider_config_missing_field --exact --show-output
#[test]
fn test_account_provider_config_missing_field() {
    let raw = r#"{"issuer": "https://ap.example"}"#;
    let err = AccountProviderConfig::from_slice(raw.as_bytes()).unwrap_err();
    assert_eq!(err.reason(), "config-fetch-error");
    // the parse error cites the missing field
    assert!(err.to_string().contains("save-token-return"), "{}", err);
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- config::test_account_provider_config_bad_key --exact --show-output
#[test]
fn test_account_provider_config_bad_key() {
    let raw = r#"{
  "issuer": "https://ap.example",
  "save-token-return": "https://ap.example/a",
  "recover-account-return": "https://ap.example/b",
  "privacy-policy": "https://ap.example/c",
  "tokensign-pubkeys-secp256r1": ["bm90IGEga2V5"]
}"#;
    let err = AccountProviderConfig::from_slice(raw.as_bytes()).unwrap_err();
    assert_eq!(err.reason(), "key-error");

    let raw = r#"{
  "issuer": "https://ap.example",
  "save-token-return": "https://ap.example/a",
  "recover-account-return": "https://ap.example/b",
  "privacy-policy": "https://ap.example/c",
  "tokensign-pubkeys-secp256r1": []
}"#;
    let err = AccountProviderConfig::from_slice(raw.as_bytes()).unwrap_err();
    assert_eq!(err.reason(), "config-fetch-error");
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- config::test_recovery_provider_config --exact --show-output
#[test]
fn test_recovery_provider_config() {
    let key = test_spki_key();
    // "save-token-async-api-iframe" is optional
    let raw = format!(
        r#"{{
  "issuer": "https://rp.example",
  "save-token": "https://rp.example/save-token",
  "recover-account": "https://rp.example/recover-account",
  "privacy-policy": "https://rp.example/privacy",
  "token-max-size": 8192,
  "countersign-pubkeys-secp256r1": ["{}"]
}}"#,
        key
    );

    let c = RecoveryProviderConfig::from_slice(raw.as_bytes()).unwrap();
    assert_eq!(c.issuer, "https://rp.example");
    assert_eq!(c.token_max_size, 8192);
    assert!(c.save_token_async_api_iframe.is_none());
    assert_eq!(c.countersign_public_keys().unwrap().len(), 1);

    let published = c.to_json().unwrap();
    assert!(published.contains("\"token-max-size\""));
    assert!(!published.contains("save-token-async-api-iframe"));
    let again = RecoveryProviderConfig::from_slice(published.as_bytes()).unwrap();
    assert_eq!(c, again);
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- config::test_config_expiry --exact --show-output
#[test]
fn test_config_expiry() {
    let key = test_spki_key();
    let raw = format!(
        r#"{{
  "issuer": "https://ap.example",
  "save-token-return": "https://ap.example/a",
  "recover-account-return": "https://ap.example/b",
  "privacy-policy": "https://ap.example/c",
  "tokensign-pubkeys-secp256r1": ["{}"]
}}"#,
        key
    );

    let c = AccountProviderConfig::from_slice(raw.as_bytes())
        .unwrap()
        .with_expiry(DEFAULT_MAX_AGE_SECONDS);
    assert!(c.expires_at.is_some());
    assert!(!c.is_expired());

    let mut stale = c.clone();
    stale.expires_at = Some(Utc::now() - Duration::seconds(1));
    assert!(stale.is_expired());
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- config::test_config_cache --exact --show-output
#[test]
fn test_config_cache() {
    let key = test_spki_key();
    let raw = format!(
        r#"{{
  "issuer": "https://ap.example",
  "save-token-return": "https://ap.example/a",
  "recover-account-return": "https://ap.example/b",
  "privacy-policy": "https://ap.example/c",
  "tokensign-pubkeys-secp256r1": ["{}"]
}}"#,
        key
    );
    let c = AccountProviderConfig::from_slice(raw.as_bytes()).unwrap();

    let cache = MemoryConfigCache::new();
    assert!(cache.get("https://ap.example").is_none());

    cache.put("https://ap.example", Configuration::AccountProvider(c));
    let cached = cache.get("https://ap.example").unwrap();
    assert_eq!(cached.issuer(), "https://ap.example");
    assert!(cached.as_account_provider().is_some());
    assert!(cached.as_recovery_provider().is_none());
}
