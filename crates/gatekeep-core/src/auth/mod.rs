//! Authentication error taxonomy and credential types.
//!
//! Errors are resolved as low as possible: an expired access token is
//! recovered by the refresher and only surfaces here when the refresh
//! itself fails.

use thiserror::Error;

use crate::refresh::RefreshFailure;
use crate::secrets::{AccessToken, RefreshToken};
use crate::session::SessionError;
use crate::validation::ValidationError;

/// Authentication errors surfaced to callers of the session core.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Login rejected by the identity provider. No state change.
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Access token rejected and no refresh token to renew it; the session
    /// has been ended.
    #[error("Credential expired")]
    CredentialExpired,

    /// Refresh token rejected or absent; the session has been ended.
    #[error("Refresh failed: {0}")]
    RefreshFailed(#[from] RefreshFailure),

    /// The session ended while a call was in flight; sign in again.
    #[error("Authentication expired")]
    AuthenticationExpired,

    /// Server could not be reached. Stored credentials are untouched.
    #[error("Unreachable: {0}")]
    Unreachable(String),

    /// An operation that needs credentials was called without any.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Stored credentials have not been loaded yet; call `initialize` first.
    #[error("Session not initialized")]
    NotInitialized,

    /// Another login attempt is already in flight.
    #[error("Login already in progress")]
    LoginInProgress,

    /// A session is already active; log out first.
    #[error("Already authenticated")]
    AlreadyAuthenticated,

    /// Non-auth API failure, returned unmodified.
    #[error("API error: {status} - {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Server response could not be understood.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Login input failed validation.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Session state or store failure.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

impl AuthError {
    /// Whether the caller may retry the same operation later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }

    /// Whether the UI should send the user back to the login view.
    #[must_use]
    pub const fn requires_login(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationExpired
                | Self::CredentialExpired
                | Self::RefreshFailed(_)
                | Self::NotAuthenticated
        )
    }
}

/// Access token plus optional refresh token.
#[derive(Debug, Clone)]
pub struct CredentialPair {
    /// Short-lived access token.
    pub access: AccessToken,
    /// Longer-lived refresh token.
    pub refresh: Option<RefreshToken>,
}

impl CredentialPair {
    /// Create a credential pair.
    #[must_use]
    pub const fn new(access: AccessToken, refresh: Option<RefreshToken>) -> Self {
        Self { access, refresh }
    }
}
