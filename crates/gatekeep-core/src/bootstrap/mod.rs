//! Startup session restore and verification.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{AuthError, CredentialPair};
use crate::provider::{IdentityProvider, ProviderError};
use crate::refresh::TokenRefresher;
use crate::session::{SessionError, SessionState, Transition};

/// How startup verification ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Nothing stored; the session is `Unauthenticated`.
    NoSession,
    /// The server confirmed the stored session.
    Verified,
    /// The stored access token had expired and was refreshed.
    Refreshed,
    /// The server could not be reached; the cached session stays active
    /// and is verified again on the next guarded navigation.
    Deferred,
    /// The server rejected the stored session; it has been cleared.
    Cleared,
}

/// Restores a persisted session and confirms it with the identity provider.
#[derive(Clone)]
pub struct SessionBootstrapper {
    session: SessionState,
    provider: Arc<dyn IdentityProvider>,
    refresher: TokenRefresher,
    verify_timeout: Duration,
}

impl SessionBootstrapper {
    /// Create a bootstrapper.
    #[must_use]
    pub fn new(
        session: SessionState,
        provider: Arc<dyn IdentityProvider>,
        refresher: TokenRefresher,
        verify_timeout: Duration,
    ) -> Self {
        Self {
            session,
            provider,
            refresher,
            verify_timeout,
        }
    }

    /// Restore then verify.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Session` if the session cannot be restored or
    /// the verified identity cannot be persisted.
    pub async fn initialize(&self) -> Result<BootstrapOutcome, AuthError> {
        if !self.restore()? {
            return Ok(BootstrapOutcome::NoSession);
        }
        self.verify().await
    }

    /// Load the stored session and optimistically activate it.
    ///
    /// Returns whether a session was restored. An unreadable store is
    /// cleared and treated as empty.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Session` if called after startup.
    pub fn restore(&self) -> Result<bool, AuthError> {
        let stored = match self.session.load_persisted() {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(error = %e, "Stored credentials unreadable, discarding");
                None
            }
        };

        let Some(stored) = stored else {
            self.session.transition(Transition::Unauthenticated)?;
            return Ok(false);
        };

        tracing::debug!(user = %stored.identity.id, "Restoring stored session");
        self.session.transition(Transition::Restored {
            identity: stored.identity,
            credentials: CredentialPair::new(stored.access, stored.refresh),
        })?;
        Ok(true)
    }

    /// Confirm the active session with the identity provider.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Session` on credential store failure.
    pub async fn verify(&self) -> Result<BootstrapOutcome, AuthError> {
        let Some(access) = self.session.access_token() else {
            return Ok(BootstrapOutcome::NoSession);
        };

        let result = tokio::time::timeout(self.verify_timeout, self.provider.verify(&access)).await;
        match result {
            Ok(Ok(identity)) => match self.session.transition(Transition::Verified(identity)) {
                Ok(_) => {
                    tracing::info!("Stored session verified");
                    Ok(BootstrapOutcome::Verified)
                }
                Err(SessionError::Rejected { .. }) => Ok(BootstrapOutcome::NoSession),
                Err(e) => Err(e.into()),
            },

            Ok(Err(ProviderError::Expired)) if self.session.refresh_token().is_some() => {
                match self.refresher.refresh_stale(&access).await {
                    Ok(_) => Ok(BootstrapOutcome::Refreshed),
                    Err(e) => {
                        tracing::info!(reason = %e, "Stored session could not be refreshed");
                        Ok(BootstrapOutcome::Cleared)
                    }
                }
            }

            Ok(Err(
                e @ (ProviderError::Expired | ProviderError::Invalid(_) | ProviderError::Rejected(_)),
            )) => {
                tracing::info!(reason = %e, "Stored session rejected, clearing");
                self.session.transition(Transition::Unauthenticated)?;
                Ok(BootstrapOutcome::Cleared)
            }

            Ok(Err(e @ (ProviderError::Unreachable(_) | ProviderError::Protocol(_)))) => {
                tracing::warn!(reason = %e, "Could not verify stored session, keeping it");
                self.defer()
            }

            Err(_) => {
                tracing::warn!(timeout = ?self.verify_timeout, "Session verification timed out, keeping it");
                self.defer()
            }
        }
    }

    /// Verify again if the last verification was deferred.
    ///
    /// Returns `None` when no verification was needed.
    ///
    /// # Errors
    ///
    /// Same as [`SessionBootstrapper::verify`].
    pub async fn reverify(&self) -> Result<Option<BootstrapOutcome>, AuthError> {
        let snapshot = self.session.snapshot();
        if !snapshot.needs_reverify || !snapshot.state.has_session() {
            return Ok(None);
        }
        self.verify().await.map(Some)
    }

    fn defer(&self) -> Result<BootstrapOutcome, AuthError> {
        match self.session.transition(Transition::VerifyDeferred) {
            Ok(_) => Ok(BootstrapOutcome::Deferred),
            Err(SessionError::Rejected { .. }) => Ok(BootstrapOutcome::NoSession),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for SessionBootstrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBootstrapper")
            .field("verify_timeout", &self.verify_timeout)
            .finish_non_exhaustive()
    }
}
