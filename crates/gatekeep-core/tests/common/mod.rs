//! Scripted identity provider and transport shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gatekeep_core::auth::CredentialPair;
use gatekeep_core::config::SessionConfig;
use gatekeep_core::invoker::{ApiRequest, ApiResponse, Transport, TransportError};
use gatekeep_core::provider::{IdentityProvider, LoginGrant, ProviderError, RefreshGrant};
use gatekeep_core::store::{CredentialStore, StoredSession};
use gatekeep_core::{AccessToken, AuthClient, Identity, RefreshToken, Role};

/// What a scripted call does.
#[derive(Clone)]
pub enum Step<T> {
    /// Succeed with a value.
    Ok(T),
    /// Fail.
    Err(ProviderError),
    /// Never complete.
    Hang,
}

impl<T: Clone> Step<T> {
    async fn play(&self) -> Result<T, ProviderError> {
        match self {
            Self::Ok(value) => Ok(value.clone()),
            Self::Err(e) => Err(e.clone()),
            Self::Hang => std::future::pending().await,
        }
    }
}

pub fn participant() -> Identity {
    Identity::new("u-1", "Ahmad", Role::Participant)
}

pub fn mentor() -> Identity {
    Identity::new("u-2", "Bilal", Role::Mentor)
}

pub fn stored(access: &str, refresh: Option<&str>, identity: Identity) -> StoredSession {
    StoredSession {
        access: AccessToken::new(access),
        refresh: refresh.map(RefreshToken::new),
        identity,
    }
}

pub fn grant(access: &str, refresh: Option<&str>) -> RefreshGrant {
    RefreshGrant {
        access: AccessToken::new(access),
        refresh: refresh.map(RefreshToken::new),
    }
}

/// Identity provider with scripted verify, refresh and logout.
///
/// Login accepts `ahmad@example.com` (Participant) and `bilal@example.com`
/// (Mentor) with `secret123`, issuing `a-1` / `r-1`.
pub struct ScriptedProvider {
    pub verify: Mutex<Step<Identity>>,
    pub refresh: Mutex<Step<RefreshGrant>>,
    pub logout: Mutex<Step<()>>,
    pub refresh_delay: Mutex<Duration>,
    pub login_calls: AtomicUsize,
    pub verify_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            verify: Mutex::new(Step::Ok(participant())),
            refresh: Mutex::new(Step::Ok(grant("a-2", None))),
            logout: Mutex::new(Step::Ok(())),
            refresh_delay: Mutex::new(Duration::ZERO),
            login_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
        })
    }

    pub fn on_verify(&self, step: Step<Identity>) {
        *self.verify.lock().unwrap() = step;
    }

    pub fn on_refresh(&self, step: Step<RefreshGrant>) {
        *self.refresh.lock().unwrap() = step;
    }

    pub fn on_logout(&self, step: Step<()>) {
        *self.logout.lock().unwrap() = step;
    }

    pub fn delay_refresh(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    pub fn refreshes(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn verifies(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for ScriptedProvider {
    async fn login(&self, identifier: &str, secret: &str) -> Result<LoginGrant, ProviderError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        let identity = match (identifier, secret) {
            ("ahmad@example.com", "secret123") => participant(),
            ("bilal@example.com", "secret123") => mentor(),
            ("offline@example.com", _) => {
                return Err(ProviderError::Unreachable("connection refused".into()));
            }
            _ => return Err(ProviderError::Rejected("Invalid email or password".into())),
        };
        Ok(LoginGrant {
            credentials: CredentialPair::new(AccessToken::new("a-1"), Some(RefreshToken::new("r-1"))),
            identity,
        })
    }

    async fn verify(&self, _access: &AccessToken) -> Result<Identity, ProviderError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let step = self.verify.lock().unwrap().clone();
        step.play().await
    }

    async fn refresh(&self, _refresh: &RefreshToken) -> Result<RefreshGrant, ProviderError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.refresh_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let step = self.refresh.lock().unwrap().clone();
        step.play().await
    }

    async fn logout(&self, _access: &AccessToken) -> Result<(), ProviderError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        let step = self.logout.lock().unwrap().clone();
        step.play().await
    }
}

/// API transport that accepts a set of access tokens.
///
/// `/boom` answers 500, `/offline` fails at the network level, anything
/// else answers 200 for an accepted token and 401 otherwise.
pub struct ScriptedTransport {
    accepted: Mutex<HashSet<String>>,
    calls: Mutex<Vec<(String, String)>>,
    latency: Duration,
}

impl ScriptedTransport {
    pub fn accepting(tokens: &[&str]) -> Arc<Self> {
        Self::with_latency(tokens, Duration::ZERO)
    }

    pub fn with_latency(tokens: &[&str], latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            accepted: Mutex::new(tokens.iter().map(ToString::to_string).collect()),
            calls: Mutex::new(Vec::new()),
            latency,
        })
    }

    /// `(path, token)` of every call so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn tokens_used(&self) -> Vec<String> {
        self.calls().into_iter().map(|(_, token)| token).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        request: &ApiRequest,
        access: &AccessToken,
    ) -> Result<ApiResponse, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.path.clone(), access.expose().to_string()));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match request.path.as_str() {
            "/boom" => Ok(ApiResponse::new(500, "boom")),
            "/offline" => Err(TransportError::Network("connection reset".into())),
            path if self.accepted.lock().unwrap().contains(access.expose()) => {
                Ok(ApiResponse::new(200, format!(r#"{{"path":"{path}"}}"#)))
            }
            _ => Ok(ApiResponse::new(401, "unauthorized")),
        }
    }
}

pub fn session_config() -> SessionConfig {
    SessionConfig {
        verify_timeout_secs: 2,
        refresh_timeout_secs: 2,
        logout_timeout_secs: 1,
    }
}

pub fn client(
    provider: &Arc<ScriptedProvider>,
    transport: &Arc<ScriptedTransport>,
    store: Arc<dyn CredentialStore>,
) -> AuthClient {
    AuthClient::builder(provider.clone(), transport.clone())
        .store(store)
        .session_config(session_config())
        .build()
        .unwrap()
}

/// A client that has initialized with an empty store and logged in as
/// the participant (`a-1` / `r-1`).
pub async fn logged_in_client(
    provider: &Arc<ScriptedProvider>,
    transport: &Arc<ScriptedTransport>,
    store: Arc<dyn CredentialStore>,
) -> AuthClient {
    let client = client(provider, transport, store);
    client.initialize().await.unwrap();
    client.login("ahmad@example.com", "secret123").await.unwrap();
    client
}
