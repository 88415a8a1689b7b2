//! Discovers provider configurations at the well-known path.
//!
//! The fetch is the only I/O the crate performs. The HTTP client hides
//! behind the "JsonFetcher" trait so tests substitute a deterministic
//! fake; "ReqwestFetcher" is the production implementation.
use std::time::Duration;

use crate::{
    config::{
        AccountProviderConfig, ConfigType, Configuration, RecoveryProviderConfig,
        DEFAULT_MAX_AGE_SECONDS, WELL_KNOWN_CONFIGURATION_PATH,
    },
    errors::{Error, Result},
    origin,
};
use async_trait::async_trait;
use reqwest::{header::CACHE_CONTROL, ClientBuilder};
use url::Url;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Abstract JSON-over-HTTPS fetch: returns the response body and the
/// max-age parsed from the "Cache-Control" response header, if any.
#[async_trait]
pub trait JsonFetcher: Send + Sync {
    async fn fetch_json(&self, url: &str) -> Result<(Vec<u8>, Option<u64>)>;
}

/// Fetches over reqwest with a fixed timeout.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    pub timeout: Duration,
}

impl Default for ReqwestFetcher {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

#[async_trait]
impl JsonFetcher for ReqwestFetcher {
    async fn fetch_json(&self, url: &str) -> Result<(Vec<u8>, Option<u64>)> {
        let req_cli_builder = ClientBuilder::new()
            .user_agent(env!("CARGO_PKG_NAME"))
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::ConfigFetch {
                message: format!("failed reqwest::ClientBuilder.build '{}'", e),
                retryable: false,
            })?;
        let resp = req_cli_builder
            .get(url)
            .send()
            .await
            .map_err(|e| Error::ConfigFetch {
                message: format!("failed reqwest::Client.send '{}'", e),
                retryable: true,
            })?;

        if !resp.status().is_success() {
            return Err(Error::ConfigFetch {
                message: format!("configuration endpoint returned {}", resp.status()),
                retryable: resp.status().is_server_error(),
            });
        }

        let max_age = resp
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_max_age);

        let out = resp.bytes().await.map_err(|e| Error::ConfigFetch {
            message: format!("failed reqwest response bytes '{}'", e),
            retryable: true,
        })?;
        Ok((out.into(), max_age))
    }
}

/// Parses the "max-age" directive out of a "Cache-Control" header value.
pub fn parse_max_age(v: &str) -> Option<u64> {
    for directive in v.split(',') {
        let d = directive.trim().to_ascii_lowercase();
        if let Some(rest) = d.strip_prefix("max-age=") {
            return rest.parse().ok();
        }
    }
    None
}

/// Fetches and validates the configuration document of the given origin.
/// Fails with "ConfigFetch" on network failure, non-2xx status, or a body
/// that does not parse as the expected configuration; the expiry comes
/// from the "Cache-Control" max-age, defaulting to one hour.
pub async fn fetch_configuration(origin_s: &str, config_type: ConfigType) -> Result<Configuration> {
    fetch_configuration_with(&ReqwestFetcher::default(), origin_s, config_type).await
}

/// Same as "fetch_configuration" with a caller-provided fetcher.
pub async fn fetch_configuration_with(
    fetcher: &dyn JsonFetcher,
    origin_s: &str,
    config_type: ConfigType,
) -> Result<Configuration> {
    origin::validate(origin_s)?;

    let url = Url::parse(origin_s)
        .and_then(|u| u.join(WELL_KNOWN_CONFIGURATION_PATH))
        .map_err(|e| Error::ConfigFetch {
            message: format!("failed Url::parse '{}'", e),
            retryable: false,
        })?;
    log::info!("fetching {:?} configuration from {}", config_type, url);

    let (body, max_age) = fetcher.fetch_json(url.as_str()).await?;
    let max_age = max_age.unwrap_or(DEFAULT_MAX_AGE_SECONDS);

    match config_type {
        ConfigType::AccountProvider => Ok(Configuration::AccountProvider(
            AccountProviderConfig::from_slice(&body)?.with_expiry(max_age),
        )),
        ConfigType::RecoveryProvider => Ok(Configuration::RecoveryProvider(
            RecoveryProviderConfig::from_slice(&body)?.with_expiry(max_age),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};

    struct StaticFetcher {
        body: Vec<u8>,
        max_age: Option<u64>,
    }

    #[async_trait]
    impl JsonFetcher for StaticFetcher {
        async fn fetch_json(&self, url: &str) -> Result<(Vec<u8>, Option<u64>)> {
            assert!(url.ends_with(WELL_KNOWN_CONFIGURATION_PATH));
            Ok((self.body.clone(), self.max_age))
        }
    }

    fn ap_config_json() -> String {
        let pk = crate::key::p256::private_key::Key::generate().unwrap();
        format!(
            r#"{{
  "issuer": "https://AP.Example",
  "save-token-return": "https://ap.example/a",
  "recover-account-return": "https://ap.example/b",
  "privacy-policy": "https://ap.example/c",
  "tokensign-pubkeys-secp256r1": ["{}"]
}}"#,
            pk.to_public_key().to_spki_base64().unwrap()
        )
    }

    /// RUST_LOG=debug cargo test --package delegated-recovery --lib -- config::client::tests::test_parse_max_age --exact --show-output
    #[test]
    fn test_parse_max_age() {
        assert_eq!(parse_max_age("max-age=60"), Some(60));
        assert_eq!(parse_max_age("public, max-age=3600"), Some(3600));
        assert_eq!(parse_max_age("Max-Age=120, public"), Some(120));
        assert_eq!(parse_max_age("no-store, must-revalidate"), None);
        assert_eq!(parse_max_age("max-age=abc"), None);
        assert_eq!(parse_max_age(""), None);
    }

    /// RUST_LOG=debug cargo test --package delegated-recovery --lib -- config::client::tests::test_fetch_configuration --exact --show-output
    #[tokio::test]
    async fn test_fetch_configuration() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .is_test(true)
            .try_init();

        let fetcher = StaticFetcher {
            body: ap_config_json().into_bytes(),
            max_age: Some(60),
        };

        let c = fetch_configuration_with(&fetcher, "https://ap.example", ConfigType::AccountProvider)
            .await
            .unwrap();
        // the issuer is lower-cased, the expiry follows max-age
        assert_eq!(c.issuer(), "https://ap.example");
        let ap = c.as_account_provider().unwrap();
        let expires = ap.expires_at.unwrap();
        assert!(expires <= Utc::now() + ChronoDuration::seconds(61));
        assert!(expires >= Utc::now() + ChronoDuration::seconds(50));
    }

    /// RUST_LOG=debug cargo test --package delegated-recovery --lib -- config::client::tests::test_fetch_configuration_default_max_age --exact --show-output
    #[tokio::test]
    async fn test_fetch_configuration_default_max_age() {
        let fetcher = StaticFetcher {
            body: ap_config_json().into_bytes(),
            max_age: None,
        };

        let c = fetch_configuration_with(&fetcher, "https://ap.example", ConfigType::AccountProvider)
            .await
            .unwrap();
        let ap = c.as_account_provider().unwrap();
        let expires = ap.expires_at.unwrap();
        assert!(expires >= Utc::now() + ChronoDuration::seconds(3590));
    }

    /// RUST_LOG=debug cargo test --package delegated-recovery --lib -- config::client::tests::test_fetch_configuration_failures --exact --show-output
    #[tokio::test]
    async fn test_fetch_configuration_failures() {
        // the origin is validated before any fetch happens
        let fetcher = StaticFetcher {
            body: Vec::new(),
            max_age: None,
        };
        let err =
            fetch_configuration_with(&fetcher, "http://ap.example", ConfigType::AccountProvider)
                .await
                .unwrap_err();
        assert_eq!(err.reason(), "invalid-origin");

        // a non-JSON body fails with a fetch error
        let fetcher = StaticFetcher {
            body: b"<html>not json</html>".to_vec(),
            max_age: None,
        };
        let err =
            fetch_configuration_with(&fetcher, "https://ap.example", ConfigType::AccountProvider)
                .await
                .unwrap_err();
        assert_eq!(err.reason(), "config-fetch-error");

        // the wrong document type fails, too
        let fetcher = StaticFetcher {
            body: ap_config_json().into_bytes(),
            max_age: None,
        };
        let err =
            fetch_configuration_with(&fetcher, "https://ap.example", ConfigType::RecoveryProvider)
                .await
                .unwrap_err();
        assert_eq!(err.reason(), "config-fetch-error");
    }
}
