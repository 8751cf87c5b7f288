//! HTTP identity provider speaking the `{success, data, message}` envelope.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{IdentityProvider, LoginGrant, ProviderError, RefreshGrant};
use crate::auth::CredentialPair;
use crate::config::ProviderConfig;
use crate::secrets::{AccessToken, COMMON_SECRET_PATTERNS, RefreshToken, scrub_secrets};
use crate::types::Identity;

/// Longest server message carried into an error.
const MAX_MESSAGE_LEN: usize = 200;

/// Identity provider over HTTP.
pub struct HttpIdentityProvider {
    client: Client,
    config: ProviderConfig,
}

impl HttpIdentityProvider {
    /// Create a provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Unreachable` if the HTTP client cannot be built.
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { client, config })
    }

    /// Create a provider for a base URL with default paths.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Unreachable` if the HTTP client cannot be built.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new(ProviderConfig::with_base_url(base_url))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Reply, ProviderError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_server_error() {
            return Err(ProviderError::Unreachable(format!(
                "server returned {status}: {}",
                server_message(&body)
            )));
        }
        Ok(Reply { status, body })
    }
}

struct Reply {
    status: StatusCode,
    body: String,
}

impl Reply {
    /// Unwrap the envelope's `data`. `success: false` maps through `refused`.
    fn data<T: DeserializeOwned>(
        &self,
        refused: impl FnOnce(String) -> ProviderError,
    ) -> Result<T, ProviderError> {
        let envelope: Envelope<T> = serde_json::from_str(&self.body)
            .map_err(|e| ProviderError::Protocol(format!("malformed response: {e}")))?;

        if envelope.success == Some(false) {
            return Err(refused(
                envelope
                    .message
                    .map_or_else(|| "request refused".to_string(), |m| scrub(&m)),
            ));
        }

        envelope
            .data
            .ok_or_else(|| ProviderError::Protocol("response has no data".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: Option<bool>,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageOnly {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    #[serde(alias = "token", alias = "accessToken")]
    access_token: String,
    #[serde(default, alias = "refreshToken")]
    refresh_token: Option<String>,
    #[serde(alias = "identity")]
    user: Identity,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    #[serde(alias = "identity")]
    user: Identity,
}

#[derive(Debug, Deserialize)]
struct RefreshData {
    #[serde(alias = "token", alias = "accessToken")]
    access_token: String,
    #[serde(default, alias = "refreshToken")]
    refresh_token: Option<String>,
}

fn scrub(message: &str) -> String {
    let mut scrubbed = scrub_secrets(message, COMMON_SECRET_PATTERNS);
    if scrubbed.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN;
        while !scrubbed.is_char_boundary(cut) {
            cut -= 1;
        }
        scrubbed.truncate(cut);
    }
    scrubbed
}

/// Best human-readable message in an error body.
fn server_message(body: &str) -> String {
    match serde_json::from_str::<MessageOnly>(body) {
        Ok(MessageOnly { message: Some(m) }) => scrub(&m),
        _ if body.trim().is_empty() => "no message".to_string(),
        _ => scrub(body.trim()),
    }
}

fn non_empty(token: Option<String>) -> Option<String> {
    token.filter(|t| !t.is_empty())
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn login(&self, identifier: &str, secret: &str) -> Result<LoginGrant, ProviderError> {
        let request = self
            .client
            .post(self.url(&self.config.login_path))
            .json(&serde_json::json!({ "email": identifier, "password": secret }));
        let reply = self.send(request).await?;

        if reply.status.is_client_error() {
            return Err(ProviderError::Rejected(server_message(&reply.body)));
        }

        let data: LoginData = reply.data(ProviderError::Rejected)?;
        if data.access_token.is_empty() {
            return Err(ProviderError::Protocol("empty access token".to_string()));
        }

        tracing::debug!(user = %data.user.id, role = %data.user.role, "Login accepted");
        Ok(LoginGrant {
            credentials: CredentialPair::new(
                AccessToken::new(data.access_token),
                non_empty(data.refresh_token).map(RefreshToken::new),
            ),
            identity: data.user,
        })
    }

    async fn verify(&self, access: &AccessToken) -> Result<Identity, ProviderError> {
        let request = self
            .client
            .get(self.url(&self.config.verify_path))
            .bearer_auth(access.expose());
        let reply = self.send(request).await?;

        match reply.status {
            StatusCode::UNAUTHORIZED => Err(ProviderError::Expired),
            status if status.is_client_error() => {
                Err(ProviderError::Invalid(server_message(&reply.body)))
            }
            _ => {
                let data: VerifyData = reply.data(ProviderError::Invalid)?;
                Ok(data.user)
            }
        }
    }

    async fn refresh(&self, refresh: &RefreshToken) -> Result<RefreshGrant, ProviderError> {
        let request = self
            .client
            .post(self.url(&self.config.refresh_path))
            .json(&serde_json::json!({ "refresh_token": refresh.expose() }));
        let reply = self.send(request).await?;

        if reply.status.is_client_error() {
            return Err(ProviderError::Rejected(server_message(&reply.body)));
        }

        let data: RefreshData = reply.data(ProviderError::Rejected)?;
        if data.access_token.is_empty() {
            return Err(ProviderError::Protocol("empty access token".to_string()));
        }

        Ok(RefreshGrant {
            access: AccessToken::new(data.access_token),
            refresh: non_empty(data.refresh_token).map(RefreshToken::new),
        })
    }

    async fn logout(&self, access: &AccessToken) -> Result<(), ProviderError> {
        let request = self
            .client
            .post(self.url(&self.config.logout_path))
            .bearer_auth(access.expose());
        let reply = self.send(request).await?;

        if !reply.status.is_success() {
            tracing::debug!(status = %reply.status, "Logout notification not accepted");
        }
        Ok(())
    }
}
