//! Authenticated API calls.
//!
//! [`AuthenticatedInvoker`] attaches the current access token to every
//! request. An unauthorized response triggers one shared refresh and one
//! retry with the new token; nothing else is retried.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::auth::AuthError;
use crate::config::ApiConfig;
use crate::refresh::{RefreshFailure, TokenRefresher};
use crate::secrets::AccessToken;
use crate::session::{SessionState, Transition};

/// Retries after an unauthorized response.
pub const MAX_AUTH_RETRIES: u32 = 1;

/// Request tag header sent when enabled in [`ApiConfig`].
pub const SYSTEM_KEY_HEADER: &str = "X-System-Key";

/// Transport errors.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failure or unreadable response.
    #[error("Network error: {0}")]
    Network(String),

    /// Request exceeded its timeout.
    #[error("Request timed out")]
    Timeout,
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<TransportError> for AuthError {
    fn from(err: TransportError) -> Self {
        Self::Unreachable(err.to_string())
    }
}

/// An API request, independent of the credential attached to it.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the API base URL.
    pub path: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    /// Create a request.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// GET request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// POST request.
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// PUT request.
    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// DELETE request.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Add a query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set the JSON body.
    #[must_use]
    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Raw API response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: String,
}

impl ApiResponse {
    /// Create a response.
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 2xx status.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// 401 status.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Protocol` if the body does not decode as `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, AuthError> {
        serde_json::from_str(&self.body).map_err(|e| AuthError::Protocol(e.to_string()))
    }
}

/// Sends a request with a given access token.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` authorized by `access`.
    async fn send(
        &self,
        request: &ApiRequest,
        access: &AccessToken,
    ) -> Result<ApiResponse, TransportError>;
}

/// HTTP transport over reqwest.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    system_key: bool,
}

impl HttpTransport {
    /// Create a transport from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: &ApiConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            system_key: config.system_key_header,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Request tag: base64 of `<unix millis>_<random hex>`.
fn system_key() -> String {
    let nonce: [u8; 6] = rand::random();
    let tag = format!("{}_{}", chrono::Utc::now().timestamp_millis(), hex::encode(nonce));
    STANDARD.encode(tag)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &ApiRequest,
        access: &AccessToken,
    ) -> Result<ApiResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path))
            .bearer_auth(access.expose());

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if self.system_key {
            builder = builder.header(SYSTEM_KEY_HEADER, system_key());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        tracing::debug!(method = %request.method, path = %request.path, status, "API call");
        Ok(ApiResponse { status, body })
    }
}

/// Attaches credentials and recovers from access token expiry.
#[derive(Clone)]
pub struct AuthenticatedInvoker {
    session: SessionState,
    refresher: TokenRefresher,
    transport: Arc<dyn Transport>,
}

impl AuthenticatedInvoker {
    /// Create an invoker.
    #[must_use]
    pub fn new(
        session: SessionState,
        refresher: TokenRefresher,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            session,
            refresher,
            transport,
        }
    }

    /// Send `request` with the current access token.
    ///
    /// # Errors
    ///
    /// - `NotAuthenticated` when there is no access token.
    /// - `CredentialExpired` when the access token was rejected and the
    ///   session holds no refresh token.
    /// - `AuthenticationExpired` when the refresh fails, or the retry is
    ///   still unauthorized.
    ///
    /// The session has ended in all three cases.
    /// - `Unreachable` on transport failure.
    /// - `Api` for any other non-2xx response, unmodified.
    pub async fn invoke(&self, request: &ApiRequest) -> Result<ApiResponse, AuthError> {
        let mut access = self
            .session
            .access_token()
            .ok_or(AuthError::NotAuthenticated)?;
        let mut retries = 0;

        loop {
            let response = self.transport.send(request, &access).await?;

            if response.is_success() {
                return Ok(response);
            }
            if !response.is_unauthorized() {
                return Err(AuthError::Api {
                    status: response.status,
                    body: response.body,
                });
            }

            if retries >= MAX_AUTH_RETRIES {
                tracing::warn!(path = %request.path, "Refreshed token rejected, ending session");
                if let Err(e) = self.session.transition(Transition::Unauthenticated) {
                    tracing::warn!(error = %e, "Failed to clear credentials");
                }
                return Err(AuthError::AuthenticationExpired);
            }
            retries += 1;

            tracing::debug!(path = %request.path, "Unauthorized, refreshing access token");
            access = self.refresher.refresh_stale(&access).await.map_err(|e| {
                tracing::debug!(reason = %e, "Refresh failed");
                match e {
                    RefreshFailure::MissingRefreshToken => AuthError::CredentialExpired,
                    _ => AuthError::AuthenticationExpired,
                }
            })?;
        }
    }
}

impl std::fmt::Debug for AuthenticatedInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedInvoker")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_request_builder() {
        let request = ApiRequest::get("/journal")
            .with_query("day", "2026-10-19")
            .with_json(serde_json::json!({ "a": 1 }));
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.query, vec![("day".to_string(), "2026-10-19".to_string())]);
        assert!(request.body.is_some());
    }

    #[test]
    fn test_response_json() {
        #[derive(serde::Deserialize)]
        struct Entry {
            id: u32,
        }

        let response = ApiResponse::new(200, r#"{"id":7}"#);
        assert!(response.is_success());
        assert_eq!(response.json::<Entry>().unwrap().id, 7);
        assert!(matches!(
            ApiResponse::new(200, "nope").json::<Entry>(),
            Err(AuthError::Protocol(_))
        ));
    }

    #[test]
    fn test_system_key_shape() {
        let key = system_key();
        let tag = String::from_utf8(STANDARD.decode(&key).unwrap()).unwrap();
        let (millis, nonce) = tag.split_once('_').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(nonce.len(), 12);
        assert!(hex::decode(nonce).is_ok());
    }

    #[tokio::test]
    async fn test_http_transport_sends_bearer_and_tag() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/journal/entries"))
            .and(header("authorization", "Bearer a-1"))
            .and(header_exists("x-system-key"))
            .and(query_param("draft", "true"))
            .and(body_json(serde_json::json!({ "text": "hello" })))
            .respond_with(ResponseTemplate::new(201).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&ApiConfig::with_base_url(server.uri())).unwrap();
        let request = ApiRequest::post("/journal/entries")
            .with_query("draft", "true")
            .with_json(serde_json::json!({ "text": "hello" }));

        let response = transport
            .send(&request, &AccessToken::new("a-1"))
            .await
            .unwrap();
        assert_eq!(response.status, 201);
    }

    #[tokio::test]
    async fn test_http_transport_without_tag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut config = ApiConfig::with_base_url(format!("{}/", server.uri()));
        config.system_key_header = false;
        let transport = HttpTransport::new(&config).unwrap();

        transport
            .send(&ApiRequest::get("ping"), &AccessToken::new("a-1"))
            .await
            .unwrap();

        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 1);
        assert!(!received[0].headers.contains_key("x-system-key"));
    }

    #[tokio::test]
    async fn test_http_transport_unreachable() {
        let transport = HttpTransport::new(&ApiConfig::with_base_url("http://127.0.0.1:9")).unwrap();
        let err = transport
            .send(&ApiRequest::get("/ping"), &AccessToken::new("a-1"))
            .await
            .unwrap_err();
        assert!(matches!(AuthError::from(err), AuthError::Unreachable(_)));
    }
}
