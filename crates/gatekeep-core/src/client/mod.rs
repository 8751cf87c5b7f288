//! The presentation-facing entry point.
//!
//! [`AuthClient`] owns one session and wires the store, identity provider,
//! refresher, invoker, bootstrapper and guard around it. Everything a UI
//! needs goes through this type.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::auth::AuthError;
use crate::bootstrap::{BootstrapOutcome, SessionBootstrapper};
use crate::config::{Config, SessionConfig};
use crate::guard::{AccessGuard, GuardDecision, GuardError, RouteTable};
use crate::invoker::{
    ApiRequest, ApiResponse, AuthenticatedInvoker, HttpTransport, Transport, TransportError,
};
use crate::provider::{HttpIdentityProvider, IdentityProvider, ProviderError};
use crate::refresh::TokenRefresher;
use crate::secrets::AccessToken;
use crate::session::{AuthState, SessionError, SessionSnapshot, SessionState, Transition};
use crate::store::{CredentialStore, MemoryCredentialStore};
use crate::types::{Identity, Role, View};
use crate::validation::{validate_identifier, validate_secret};

/// Errors building a client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Identity provider could not be created.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// API transport could not be created.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Route table is invalid.
    #[error("Route error: {0}")]
    Routes(#[from] GuardError),
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    /// The signed-in identity.
    pub identity: Identity,
    /// Where to navigate next: the role's default view.
    pub landing: View,
}

/// Builder for [`AuthClient`].
pub struct AuthClientBuilder {
    provider: Arc<dyn IdentityProvider>,
    transport: Arc<dyn Transport>,
    store: Option<Arc<dyn CredentialStore>>,
    routes: RouteTable,
    session: SessionConfig,
}

impl AuthClientBuilder {
    /// Start a builder. The store defaults to an in-memory store.
    #[must_use]
    pub fn new(provider: Arc<dyn IdentityProvider>, transport: Arc<dyn Transport>) -> Self {
        Self {
            provider,
            transport,
            store: None,
            routes: RouteTable::default(),
            session: SessionConfig::default(),
        }
    }

    /// Use a credential store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a route table.
    #[must_use]
    pub fn routes(mut self, routes: RouteTable) -> Self {
        self.routes = routes;
        self
    }

    /// Use session timeouts.
    #[must_use]
    pub fn session_config(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Build the client. The session starts in `Initializing`; call
    /// [`AuthClient::initialize`] next.
    ///
    /// # Errors
    ///
    /// Returns `GuardError` if the route table is invalid.
    pub fn build(self) -> Result<AuthClient, GuardError> {
        self.routes.validate()?;

        let store: Arc<dyn CredentialStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryCredentialStore::new()),
        };
        let session = SessionState::new(store);
        let refresher = TokenRefresher::new(
            session.clone(),
            Arc::clone(&self.provider),
            self.session.refresh_timeout(),
        );
        let invoker = AuthenticatedInvoker::new(session.clone(), refresher.clone(), self.transport);
        let bootstrapper = SessionBootstrapper::new(
            session.clone(),
            Arc::clone(&self.provider),
            refresher.clone(),
            self.session.verify_timeout(),
        );

        Ok(AuthClient {
            session,
            provider: self.provider,
            refresher,
            invoker,
            bootstrapper,
            guard: AccessGuard::new(self.routes),
            logout_timeout: self.session.logout_timeout(),
        })
    }
}

/// Session, credential refresh and access decisions for one user.
#[derive(Clone)]
pub struct AuthClient {
    session: SessionState,
    provider: Arc<dyn IdentityProvider>,
    refresher: TokenRefresher,
    invoker: AuthenticatedInvoker,
    bootstrapper: SessionBootstrapper,
    guard: AccessGuard,
    logout_timeout: Duration,
}

impl AuthClient {
    /// Start a builder.
    #[must_use]
    pub fn builder(
        provider: Arc<dyn IdentityProvider>,
        transport: Arc<dyn Transport>,
    ) -> AuthClientBuilder {
        AuthClientBuilder::new(provider, transport)
    }

    /// Build an HTTP client from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the provider, transport or route table cannot be
    /// created.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, ClientError> {
        let provider = Arc::new(HttpIdentityProvider::new(config.provider.clone())?);
        let transport = Arc::new(HttpTransport::new(&config.api)?);
        let routes = RouteTable::from_config(&config.routes)?;

        Ok(Self::builder(provider, transport)
            .store(store)
            .routes(routes)
            .session_config(config.session.clone())
            .build()?)
    }

    /// Restore and verify the stored session.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Session` on credential store failure.
    pub async fn initialize(&self) -> Result<BootstrapOutcome, AuthError> {
        let outcome = self.bootstrapper.initialize().await?;
        tracing::debug!(?outcome, "Session initialized");
        Ok(outcome)
    }

    /// Sign in.
    ///
    /// # Errors
    ///
    /// - `Validation` for malformed input (no state change).
    /// - `NotInitialized` before [`AuthClient::initialize`] has run.
    /// - `LoginInProgress` / `AlreadyAuthenticated` when a login is in
    ///   flight or a session is active.
    /// - `InvalidCredentials` when the provider rejects the credentials.
    /// - `Unreachable` when the provider cannot be reached.
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<LoginOutcome, AuthError> {
        let identifier = validate_identifier(identifier)?;
        validate_secret(secret)?;

        match self.session.state() {
            AuthState::Initializing => return Err(AuthError::NotInitialized),
            AuthState::Authenticating => return Err(AuthError::LoginInProgress),
            state if state.has_session() => return Err(AuthError::AlreadyAuthenticated),
            _ => {}
        }

        self.session
            .transition(Transition::Authenticating)
            .map_err(|e| match e {
                SessionError::Rejected {
                    from: AuthState::Initializing,
                    ..
                } => AuthError::NotInitialized,
                SessionError::Rejected {
                    from: AuthState::Authenticating,
                    ..
                } => AuthError::LoginInProgress,
                SessionError::Rejected { from, .. } if from.has_session() => {
                    AuthError::AlreadyAuthenticated
                }
                other => AuthError::Session(other),
            })?;

        let grant = match self.provider.login(&identifier, secret).await {
            Ok(grant) => grant,
            Err(e) => {
                self.abandon_login();
                tracing::info!(reason = %e, "Login failed");
                return Err(match e {
                    ProviderError::Rejected(msg) | ProviderError::Invalid(msg) => {
                        AuthError::InvalidCredentials(msg)
                    }
                    ProviderError::Expired => {
                        AuthError::InvalidCredentials("credential expired".to_string())
                    }
                    ProviderError::Unreachable(msg) => AuthError::Unreachable(msg),
                    ProviderError::Protocol(msg) => AuthError::Protocol(msg),
                });
            }
        };

        let identity = grant.identity.clone();
        if let Err(e) = self.session.transition(Transition::LoggedIn {
            identity: grant.identity,
            credentials: grant.credentials,
        }) {
            self.abandon_login();
            return Err(e.into());
        }

        tracing::info!(user = %identity.id, role = %identity.role, "Logged in");
        Ok(LoginOutcome {
            landing: identity.role.default_view(),
            identity,
        })
    }

    fn abandon_login(&self) {
        if self.session.state() == AuthState::Authenticating {
            if let Err(e) = self.session.transition(Transition::Unauthenticated) {
                tracing::warn!(error = %e, "Failed to reset session after login");
            }
        }
    }

    /// Sign out. Local state is cleared first; the provider is then told on
    /// a best-effort basis. A no-op when already signed out.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Session` if the credential store could not be
    /// cleared. Memory is reset regardless.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let snapshot = self.session.snapshot();
        if snapshot.state == AuthState::Unauthenticated {
            return Ok(());
        }

        let cleared = self.session.transition(Transition::Unauthenticated);

        if let Some(access) = snapshot.access_token() {
            match tokio::time::timeout(self.logout_timeout, self.provider.logout(access)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Logout notification failed"),
                Err(_) => tracing::warn!("Logout notification timed out"),
            }
        }

        tracing::info!("Logged out");
        cleared.map(|_| ()).map_err(AuthError::from)
    }

    /// Send an authenticated API request.
    ///
    /// # Errors
    ///
    /// See [`AuthenticatedInvoker::invoke`].
    pub async fn invoke(&self, request: &ApiRequest) -> Result<ApiResponse, AuthError> {
        self.invoker.invoke(request).await
    }

    /// Force a refresh of the access token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::RefreshFailed`; the session has ended unless
    /// there was none to begin with.
    pub async fn refresh(&self) -> Result<AccessToken, AuthError> {
        Ok(self.refresher.refresh().await?)
    }

    /// Decide what `view` renders, verifying a deferred session first.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Session` on credential store failure.
    pub async fn navigate(&self, view: &View) -> Result<GuardDecision, AuthError> {
        if !self.guard.routes().is_public(view) {
            if let Some(outcome) = self.bootstrapper.reverify().await? {
                tracing::debug!(?outcome, %view, "Re-verified session before navigation");
            }
        }
        Ok(self.evaluate(view))
    }

    /// Decide what `view` renders from the current snapshot.
    #[must_use]
    pub fn evaluate(&self, view: &View) -> GuardDecision {
        self.guard.evaluate(&self.session.snapshot(), view)
    }

    /// Active identity.
    #[must_use]
    pub fn current_identity(&self) -> Option<Identity> {
        self.session.identity()
    }

    /// Role of the active identity.
    #[must_use]
    pub fn current_role(&self) -> Option<Role> {
        self.session.identity().map(|i| i.role)
    }

    /// Whether a session is active.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.session.state().has_session()
    }

    /// Current state tag.
    #[must_use]
    pub fn state(&self) -> AuthState {
        self.session.state()
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    /// Subscribe to session changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.session.subscribe()
    }

    /// The session handle.
    #[must_use]
    pub const fn session(&self) -> &SessionState {
        &self.session
    }

    /// The refresher.
    #[must_use]
    pub const fn refresher(&self) -> &TokenRefresher {
        &self.refresher
    }

    /// The access guard.
    #[must_use]
    pub const fn guard(&self) -> &AccessGuard {
        &self.guard
    }
}

impl std::fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthClient")
            .field("session", &self.session)
            .field("refresher", &self.refresher)
            .finish_non_exhaustive()
    }
}
