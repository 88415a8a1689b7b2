use std::{
    convert::Infallible,
    error::Error,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use delegated_recovery::{
    config::{AccountProviderConfig, WELL_KNOWN_CONFIGURATION_PATH, WELL_KNOWN_TOKEN_STATUS_PATH},
    errors::Result as CoreResult,
    ids,
    record::{self, CallbackStatus, TokenRecordStore},
};
use futures::{TryFutureExt, TryStreamExt};
use http::{header, Method, Request, Response, StatusCode};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Server};
use log::{debug, info, warn};
use tokio::signal;

/// Where save-token-return redirects land on this deployment. The path
/// must agree with the "save-token-return" URL the configuration
/// publishes.
pub const SAVE_TOKEN_RETURN_PATH: &str = "/save-token-return";

const HSTS_VALUE: &str = "max-age=3600000; includeSubDomains";
const NO_STORE_VALUE: &str = "no-store, must-revalidate";

/// Shared state of the account-provider surface.
pub struct ProviderState {
    /// Pre-rendered configuration document.
    pub config_json: String,
    /// max-age advertised on the configuration document.
    pub config_max_age: u64,
    pub store: Arc<dyn TokenRecordStore>,
}

impl ProviderState {
    pub fn new(
        config: &AccountProviderConfig,
        config_max_age: u64,
        store: Arc<dyn TokenRecordStore>,
    ) -> CoreResult<Self> {
        Ok(Self {
            config_json: config.to_json()?,
            config_max_age,
            store,
        })
    }
}

#[derive(Clone)]
pub struct Handler {
    pub http_host: String,
    pub listener_port: u16,
    pub socket_addr: SocketAddr,
    pub request_timeout: Duration,
    state: Arc<ProviderState>,
}

pub const DEFAULT_HTTP_HOST: &str = "0.0.0.0";
pub const DEFAULT_LISTENER_PORT: u16 = 8443;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

impl Handler {
    pub fn new(
        http_host: &str,
        listener_port: u16,
        request_timeout: Duration,
        state: Arc<ProviderState>,
    ) -> Self {
        let url = format!("{http_host}:{listener_port}");

        info!("parsing URL '{}' to socket address", url);
        let socket_addr: SocketAddr = url.parse().unwrap_or_else(|_| {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), listener_port)
        });
        info!(
            "handler with socket {:?} (request timeout {:?})",
            socket_addr, request_timeout,
        );

        Self {
            http_host: String::from(http_host),
            listener_port,
            socket_addr,
            request_timeout,
            state,
        }
    }

    pub async fn start(self) -> Result<(), Box<dyn Error>> {
        info!("starting server");

        let state = self.state.clone();
        let svc = make_service_fn(move |socket: &AddrStream| {
            let remote_addr = socket.remote_addr();
            let state = state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    handle_request(state.clone(), remote_addr, req).or_else(
                        |(status, body)| async move {
                            warn!("request failed: {}", body);
                            Ok::<_, Infallible>(plain_response(status, body))
                        },
                    )
                }))
            }
        });
        let server = Server::try_bind(&self.socket_addr)?
            .serve(svc)
            .with_graceful_shutdown(handle_sigint());

        info!("listener start {}", self.socket_addr);
        server.await?;
        info!("listener done {}", self.socket_addr);

        Ok(())
    }
}

/// Builds a response carrying the security headers every response must
/// have. Non-configuration responses are never cacheable.
fn base_response(status: StatusCode, cache_control: &str) -> http::response::Builder {
    Response::builder()
        .status(status)
        .header(header::STRICT_TRANSPORT_SECURITY, HSTS_VALUE)
        .header(header::X_FRAME_OPTIONS, "DENY")
        .header(header::CACHE_CONTROL, cache_control)
}

fn plain_response(status: StatusCode, body: String) -> Response<Body> {
    base_response(status, NO_STORE_VALUE)
        .body(Body::from(body))
        .unwrap()
}

pub async fn handle_request(
    state: Arc<ProviderState>,
    remote_addr: SocketAddr,
    req: Request<Body>,
) -> Result<Response<Body>, (http::StatusCode, String)> {
    let http_version = req.version();
    let method = req.method().clone();
    let uri_path = req.uri().path().to_string();
    debug!(
        "version {:?}, method {}, uri path {}, remote addr {}",
        http_version, method, uri_path, remote_addr,
    );

    let resp = match uri_path.as_str() {
        WELL_KNOWN_CONFIGURATION_PATH => match method {
            Method::GET => base_response(StatusCode::OK, &format!("max-age={}", state.config_max_age))
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
                .body(Body::from(state.config_json.clone()))
                .map_err(|e| {
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("failed to build response {}", e),
                    )
                })?,
            _ => Err((
                StatusCode::NOT_FOUND,
                format!("unknown method '{method}' for '{uri_path}'"),
            ))?,
        },

        WELL_KNOWN_TOKEN_STATUS_PATH => match method {
            Method::POST => {
                let body = req
                    .into_body()
                    .try_fold(Vec::new(), |mut data, chunk| async move {
                        data.extend_from_slice(&chunk);
                        Ok(data)
                    })
                    .await
                    .map_err(|e| {
                        (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            format!("failed to read request body {}", e),
                        )
                    })?;
                debug!("read request body {}", body.len());
                apply_token_status(state.as_ref(), &body);

                // always an empty 200, so the endpoint cannot be probed
                // for which ids exist
                base_response(StatusCode::OK, NO_STORE_VALUE)
                    .body(Body::empty())
                    .map_err(|e| {
                        (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            format!("failed to build response {}", e),
                        )
                    })?
            }
            _ => Err((
                StatusCode::NOT_FOUND,
                format!("unknown method '{method}' for '{uri_path}'"),
            ))?,
        },

        SAVE_TOKEN_RETURN_PATH => match method {
            Method::GET => {
                let query = req.uri().query().unwrap_or("");
                apply_save_token_return(state.as_ref(), query).map_err(|reason| {
                    (StatusCode::BAD_REQUEST, format!("reason: {}", reason))
                })?;
                base_response(StatusCode::OK, NO_STORE_VALUE)
                    .body(Body::empty())
                    .map_err(|e| {
                        (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            format!("failed to build response {}", e),
                        )
                    })?
            }
            _ => Err((
                StatusCode::NOT_FOUND,
                format!("unknown method '{method}' for '{uri_path}'"),
            ))?,
        },

        _ => Err((StatusCode::NOT_FOUND, format!("unknown path '{uri_path}'")))?,
    };

    Ok(resp)
}

/// Parses the form-encoded token-status callback and applies it. Unknown
/// ids and malformed fields are ignored; the reply is the same either
/// way.
fn apply_token_status(state: &ProviderState, body: &[u8]) {
    let mut id = None;
    let mut status = None;
    for (k, v) in url::form_urlencoded::parse(body) {
        match k.as_ref() {
            "id" => id = ids::Id::from_str(&v).ok(),
            "status" => status = CallbackStatus::from_str(&v).ok(),
            _ => {}
        }
    }

    match (id, status) {
        (Some(id), Some(status)) => {
            record::apply_status_callback(state.store.as_ref(), &id, status)
        }
        _ => debug!("ignoring token-status callback with missing or malformed fields"),
    }
}

/// Parses the save-token-return query string and applies it. The reply
/// carries only the machine-readable reason on failure.
fn apply_save_token_return(state: &ProviderState, query: &str) -> Result<(), &'static str> {
    let mut state_param = None;
    let mut status = None;
    for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
        match k.as_ref() {
            "state" => state_param = Some(v.to_string()),
            "status" => status = CallbackStatus::from_str(&v).ok(),
            _ => {}
        }
    }

    let (state_param, status) = match (state_param, status) {
        (Some(s), Some(st)) => (s, st),
        _ => return Err("malformed-token"),
    };

    record::apply_save_token_return(state.store.as_ref(), &state_param, status)
        .map_err(|e| e.reason())
}

async fn handle_sigint() {
    signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
}

#[cfg(test)]
mod tests {
    use super::*;
    use delegated_recovery::record::{MemoryTokenRecordStore, RecordStatus, TokenRecord};

    fn test_state() -> (Arc<ProviderState>, Arc<MemoryTokenRecordStore>) {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .is_test(true)
            .try_init();

        let config = AccountProviderConfig {
            issuer: "https://ap.example".to_string(),
            save_token_return: "https://ap.example/save-token-return".to_string(),
            recover_account_return: "https://ap.example/recover-account-return".to_string(),
            privacy_policy: "https://ap.example/privacy".to_string(),
            icon_152px: None,
            tokensign_pubkeys_secp256r1: vec!["dGVzdA==".to_string()],
            expires_at: None,
        };
        let store = Arc::new(MemoryTokenRecordStore::new());
        let state = ProviderState::new(&config, 3600, store.clone()).unwrap();
        (Arc::new(state), store)
    }

    fn remote() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 40000)
    }

    fn insert_record(store: &MemoryTokenRecordStore, id_hex: &str) -> ids::Id {
        let id = ids::Id::from_str(id_hex).unwrap();
        store.insert(TokenRecord::provisional(
            id,
            "https://ap.example",
            "alice",
            b"token bytes",
        ));
        id
    }

    /// RUST_LOG=debug cargo test --package server --lib -- handler::tests::test_configuration_endpoint --exact --show-output
    #[tokio::test]
    async fn test_configuration_endpoint() {
        let (state, _) = test_state();

        let req = Request::builder()
            .method(Method::GET)
            .uri(WELL_KNOWN_CONFIGURATION_PATH)
            .body(Body::empty())
            .unwrap();
        let resp = handle_request(state, remote(), req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CACHE_CONTROL).unwrap(),
            "max-age=3600"
        );
        assert_eq!(
            resp.headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
        assert_eq!(
            resp.headers()
                .get(header::STRICT_TRANSPORT_SECURITY)
                .unwrap(),
            HSTS_VALUE
        );
        assert_eq!(resp.headers().get(header::X_FRAME_OPTIONS).unwrap(), "DENY");

        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert!(std::str::from_utf8(&body)
            .unwrap()
            .contains("\"save-token-return\""));
    }

    /// RUST_LOG=debug cargo test --package server --lib -- handler::tests::test_token_status_endpoint --exact --show-output
    #[tokio::test]
    async fn test_token_status_endpoint() {
        let (state, store) = test_state();
        let id = insert_record(&store, "00112233445566778899aabbccddeeff");

        let req = Request::builder()
            .method(Method::POST)
            .uri(WELL_KNOWN_TOKEN_STATUS_PATH)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(
                "id=00112233445566778899aabbccddeeff&status=save-success",
            ))
            .unwrap();
        let resp = handle_request(state.clone(), remote(), req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CACHE_CONTROL).unwrap(),
            NO_STORE_VALUE
        );
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert!(body.is_empty());
        assert_eq!(store.get(&id).unwrap().status, RecordStatus::Confirmed);

        // unknown ids still get an empty 200
        let req = Request::builder()
            .method(Method::POST)
            .uri(WELL_KNOWN_TOKEN_STATUS_PATH)
            .body(Body::from(
                "id=ffeeddccbbaa99887766554433221100&status=token-repudiated",
            ))
            .unwrap();
        let resp = handle_request(state.clone(), remote(), req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        // so do malformed callbacks
        let req = Request::builder()
            .method(Method::POST)
            .uri(WELL_KNOWN_TOKEN_STATUS_PATH)
            .body(Body::from("id=zz&status=bogus"))
            .unwrap();
        let resp = handle_request(state, remote(), req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    /// RUST_LOG=debug cargo test --package server --lib -- handler::tests::test_save_token_return_endpoint --exact --show-output
    #[tokio::test]
    async fn test_save_token_return_endpoint() {
        let (state, store) = test_state();
        let old_id = insert_record(&store, "00112233445566778899aabbccddeeff");
        let new_id = insert_record(&store, "ffeeddccbbaa99887766554433221100");

        let uri = format!(
            "{}?state={},{}&status=save-success",
            SAVE_TOKEN_RETURN_PATH, new_id, old_id
        );
        let req = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let resp = handle_request(state, remote(), req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(store.get(&new_id).unwrap().status, RecordStatus::Confirmed);
        assert_eq!(store.get(&old_id).unwrap().status, RecordStatus::Invalid);
    }

    /// RUST_LOG=debug cargo test --package server --lib -- handler::tests::test_unknown_path --exact --show-output
    #[tokio::test]
    async fn test_unknown_path() {
        let (state, _) = test_state();

        let req = Request::builder()
            .method(Method::GET)
            .uri("/nope")
            .body(Body::empty())
            .unwrap();
        let err = handle_request(state.clone(), remote(), req).await.unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);

        // wrong method on a known path
        let req = Request::builder()
            .method(Method::POST)
            .uri(WELL_KNOWN_CONFIGURATION_PATH)
            .body(Body::empty())
            .unwrap();
        let err = handle_request(state, remote(), req).await.unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }
}
