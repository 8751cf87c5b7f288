//! Identity provider abstraction.
//!
//! The provider is the remote authority that issues, verifies, refreshes
//! and revokes credentials. Everything above this module talks to it only
//! through [`IdentityProvider`].

mod http;

pub use http::HttpIdentityProvider;

use async_trait::async_trait;
use thiserror::Error;

use crate::auth::CredentialPair;
use crate::secrets::{AccessToken, RefreshToken};
use crate::types::Identity;

/// Identity provider errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Credentials or refresh token rejected.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Access token no longer accepted; a refresh may recover it.
    #[error("Credential expired")]
    Expired,

    /// Access token definitively invalid (revoked, malformed).
    #[error("Credential invalid: {0}")]
    Invalid(String),

    /// Network failure, timeout or server-side error.
    #[error("Unreachable: {0}")]
    Unreachable(String),

    /// Response could not be understood.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Protocol(err.to_string())
        } else {
            Self::Unreachable(err.to_string())
        }
    }
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginGrant {
    /// Issued credentials.
    pub credentials: CredentialPair,
    /// Identity the credentials belong to.
    pub identity: Identity,
}

/// Result of a successful refresh.
#[derive(Debug, Clone)]
pub struct RefreshGrant {
    /// New access token.
    pub access: AccessToken,
    /// Rotated refresh token. `None` keeps the current one.
    pub refresh: Option<RefreshToken>,
}

/// Remote authority for credentials.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange an identifier and secret for credentials.
    async fn login(&self, identifier: &str, secret: &str) -> Result<LoginGrant, ProviderError>;

    /// Confirm an access token and return the authoritative identity.
    async fn verify(&self, access: &AccessToken) -> Result<Identity, ProviderError>;

    /// Exchange a refresh token for a new access token.
    async fn refresh(&self, refresh: &RefreshToken) -> Result<RefreshGrant, ProviderError>;

    /// Tell the provider the session ended.
    async fn logout(&self, access: &AccessToken) -> Result<(), ProviderError>;
}
