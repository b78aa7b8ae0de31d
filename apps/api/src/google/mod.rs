//! Google Workspace and Cloud REST wrappers: Gmail, Drive, Calendar, Chat and
//! Pub/Sub.
//!
//! Every service goes through `GoogleClient`, which attaches an OAuth bearer
//! token from a `TokenProvider` and retries transient failures.

pub mod calendar;
pub mod chat;
pub mod drive;
pub mod gmail;
pub mod pubsub;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
/// Refresh a cached token this long before it expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum GoogleApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Google API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl GoogleApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GoogleApiError::Api { status: 404, .. })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Retry
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

fn is_retryable(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

// ────────────────────────────────────────────────────────────────────────────
// Tokens
// ────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, GoogleApiError>;
}

/// A fixed token, e.g. from `GOOGLE_ACCESS_TOKEN` during local runs.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String, GoogleApiError> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

/// Service-account token from the GCE / Cloud Run metadata server.
pub struct MetadataTokenProvider {
    client: Client,
    cached: Mutex<Option<(String, Instant)>>,
}

impl MetadataTokenProvider {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TokenProvider for MetadataTokenProvider {
    async fn access_token(&self) -> Result<String, GoogleApiError> {
        let mut cached = self.cached.lock().await;
        if let Some((token, expires_at)) = cached.as_ref() {
            if Instant::now() + TOKEN_EXPIRY_MARGIN < *expires_at {
                return Ok(token.clone());
            }
        }

        let response = self
            .client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| GoogleApiError::Auth(format!("metadata server unreachable: {e}")))?;
        if !response.status().is_success() {
            return Err(GoogleApiError::Auth(format!(
                "metadata server returned {}",
                response.status()
            )));
        }
        let token: MetadataToken = response
            .json()
            .await
            .map_err(|e| GoogleApiError::Auth(e.to_string()))?;
        debug!(expires_in = token.expires_in, "Fetched access token from metadata server");

        let expires_at = Instant::now() + Duration::from_secs(token.expires_in);
        *cached = Some((token.access_token.clone(), expires_at));
        Ok(token.access_token)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Client
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct GoogleClient {
    http: Client,
    tokens: Arc<dyn TokenProvider>,
    retry: RetryPolicy,
    api_root: Option<String>,
}

impl GoogleClient {
    pub fn new(http: Client, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            http,
            tokens,
            retry: RetryPolicy::default(),
            api_root: None,
        }
    }

    /// Sends every API call to `root` instead of the Google hosts, keeping
    /// the request path. Used with local emulators.
    pub fn with_api_root(mut self, root: impl Into<String>) -> Self {
        self.api_root = Some(root.into().trim_end_matches('/').to_string());
        self
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Resolves a service base URL against the configured API root.
    /// `https://gmail.googleapis.com/gmail/v1` becomes `{root}/gmail/v1`.
    pub fn endpoint(&self, base: &str) -> String {
        let Some(root) = &self.api_root else {
            return base.to_string();
        };
        let path = base
            .split_once("://")
            .and_then(|(_, rest)| rest.find('/').map(|i| &rest[i..]))
            .unwrap_or("");
        format!("{root}{path}")
    }

    /// Sends with auth and retry, returning the successful raw response.
    /// Retries 429, 5xx and transport errors per the retry policy.
    pub async fn send_with_retry(&self, request: RequestBuilder) -> Result<Response, GoogleApiError> {
        let mut last_error: Option<GoogleApiError> = None;

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                let delay = self.retry.backoff(attempt);
                warn!(
                    "Google API attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let token = self.tokens.access_token().await?;
            let Some(builder) = request.try_clone() else {
                return check_status(request.bearer_auth(&token).send().await?).await;
            };

            let response = match builder.bearer_auth(&token).send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(GoogleApiError::Http(e));
                    continue;
                }
            };

            let status = response.status().as_u16();
            if is_retryable(status) {
                let body = response.text().await.unwrap_or_default();
                warn!("Google API returned {}: {}", status, body);
                last_error = Some(GoogleApiError::Api {
                    status,
                    message: body,
                });
                continue;
            }
            return check_status(response).await;
        }

        Err(last_error.unwrap_or(GoogleApiError::Api {
            status: 429,
            message: "retries exhausted".to_string(),
        }))
    }

    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GoogleApiError> {
        let response = self.send_with_retry(request).await?;
        let body = response.text().await?;
        let body = if body.trim().is_empty() { "null" } else { body.as_str() };
        Ok(serde_json::from_str(body)?)
    }

    /// For endpoints that answer 204 No Content.
    pub async fn send_empty(&self, request: RequestBuilder) -> Result<(), GoogleApiError> {
        self.send_with_retry(request).await?;
        Ok(())
    }
}

/// The Workspace services the agents and workflows act through.
#[derive(Clone)]
pub struct GoogleServices {
    pub gmail: gmail::GmailService,
    pub drive: drive::DriveService,
    pub calendar: calendar::CalendarService,
    pub chat: chat::ChatService,
}

impl GoogleServices {
    pub fn new(google: GoogleClient, audit: crate::audit::AuditLogger, calendar_id: &str) -> Self {
        Self {
            gmail: gmail::GmailService::new(google.clone(), audit.clone()),
            drive: drive::DriveService::new(google.clone(), audit.clone()),
            calendar: calendar::CalendarService::new(google.clone(), audit.clone(), calendar_id),
            chat: chat::ChatService::new(google, audit),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoogleErrorEnvelope {
    error: GoogleErrorBody,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    message: String,
}

async fn check_status(response: Response) -> Result<Response, GoogleApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<GoogleErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);
    if status.as_u16() == 401 {
        return Err(GoogleApiError::Auth(message));
    }
    Err(GoogleApiError::Api {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::audit::AuditLogger;

    struct NoCredentials;

    #[async_trait]
    impl TokenProvider for NoCredentials {
        async fn access_token(&self) -> Result<String, GoogleApiError> {
            Err(GoogleApiError::Auth("no credentials in tests".to_string()))
        }
    }

    /// Services whose every call fails with `Auth` before touching the
    /// network.
    pub fn offline_services() -> GoogleServices {
        let google = GoogleClient::new(Client::new(), Arc::new(NoCredentials));
        GoogleServices::new(google, AuditLogger::tracing_only(), "primary")
    }

    // ── Local Google API server ────────────────────────────────────────────

    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::{header, Method, StatusCode, Uri};
    use axum::response::{IntoResponse, Response as AxumResponse};
    use axum::Router;
    use serde_json::{json, Value};
    use std::sync::Mutex as StdMutex;

    /// A request the stub received. `body` is the JSON body, or a string for
    /// non-JSON payloads such as multipart uploads.
    #[derive(Debug, Clone)]
    pub struct StubRequest {
        pub method: Method,
        pub path: String,
        pub query: String,
        pub body: Value,
    }

    struct StubRoute {
        method: Method,
        path: String,
        query: Option<String>,
        status: StatusCode,
        content_type: &'static str,
        body: Bytes,
    }

    #[derive(Clone, Default)]
    struct StubShared {
        routes: Arc<StdMutex<Vec<StubRoute>>>,
        requests: Arc<StdMutex<Vec<StubRequest>>>,
    }

    /// An axum server on a loopback port answering canned Google API
    /// responses by method and path. Later routes win over earlier ones;
    /// unmatched requests get a Google-shaped 404.
    pub struct GoogleStub {
        base_url: String,
        shared: StubShared,
    }

    impl GoogleStub {
        pub async fn start() -> Self {
            let shared = StubShared::default();
            let app = Router::new().fallback(stub_handler).with_state(shared.clone());
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            Self {
                base_url: format!("http://{addr}"),
                shared,
            }
        }

        fn route(&self, route: StubRoute) -> &Self {
            self.shared.routes.lock().unwrap().push(route);
            self
        }

        /// Answers `method path` with 200 and `body`.
        pub fn on(&self, method: Method, path: &str, body: Value) -> &Self {
            self.on_status(method, path, 200, body)
        }

        pub fn on_status(&self, method: Method, path: &str, status: u16, body: Value) -> &Self {
            self.route(StubRoute {
                method,
                path: path.to_string(),
                query: None,
                status: StatusCode::from_u16(status).unwrap(),
                content_type: "application/json",
                body: Bytes::from(body.to_string()),
            })
        }

        /// Answers with raw bytes when the query string contains `query`.
        pub fn on_bytes(&self, method: Method, path: &str, query: &str, bytes: Vec<u8>) -> &Self {
            self.route(StubRoute {
                method,
                path: path.to_string(),
                query: Some(query.to_string()),
                status: StatusCode::OK,
                content_type: "application/octet-stream",
                body: Bytes::from(bytes),
            })
        }

        pub fn client(&self) -> GoogleClient {
            GoogleClient::new(Client::new(), Arc::new(StaticTokenProvider::new("test-token")))
                .with_api_root(self.base_url.clone())
        }

        pub fn services(&self) -> GoogleServices {
            GoogleServices::new(self.client(), AuditLogger::tracing_only(), "primary")
        }

        pub fn requests(&self) -> Vec<StubRequest> {
            self.shared.requests.lock().unwrap().clone()
        }

        pub fn requests_to(&self, method: Method, path: &str) -> Vec<StubRequest> {
            self.requests()
                .into_iter()
                .filter(|r| r.method == method && r.path == path)
                .collect()
        }
    }

    async fn stub_handler(State(shared): State<StubShared>, method: Method, uri: Uri, body: Bytes) -> AxumResponse {
        let query = uri.query().unwrap_or_default().to_string();
        let parsed = serde_json::from_slice(&body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));
        shared.requests.lock().unwrap().push(StubRequest {
            method: method.clone(),
            path: uri.path().to_string(),
            query: query.clone(),
            body: if body.is_empty() { Value::Null } else { parsed },
        });

        let routes = shared.routes.lock().unwrap();
        let found = routes.iter().rev().find(|r| {
            r.method == method
                && r.path == uri.path()
                && r.query.as_deref().map_or(true, |q| query.contains(q))
        });
        match found {
            Some(route) => (
                route.status,
                [(header::CONTENT_TYPE, route.content_type)],
                route.body.clone(),
            )
                .into_response(),
            None => (
                StatusCode::NOT_FOUND,
                axum::Json(json!({"error": {"code": 404, "message": format!("no stub for {method} {}", uri.path())}})),
            )
                .into_response(),
        }
    }
}
