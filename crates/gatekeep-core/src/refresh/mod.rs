//! Single-flight access token refresh.
//!
//! At most one refresh is in flight per session. The first caller that
//! needs a new access token starts it on a spawned task; every caller that
//! arrives before it resolves awaits the same shared future. A failed
//! refresh ends the session. A refresh belongs to the session epoch it
//! started in and never touches a later session.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use thiserror::Error;

use crate::provider::{IdentityProvider, ProviderError};
use crate::secrets::{AccessToken, RefreshToken};
use crate::session::{AuthState, SessionError, SessionState, Transition};

/// Why a refresh did not produce a new access token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    /// The provider rejected the refresh token.
    #[error("refresh token rejected: {0}")]
    Rejected(String),

    /// The session holds no refresh token.
    #[error("no refresh token")]
    MissingRefreshToken,

    /// There is no session to refresh.
    #[error("no active session")]
    NoSession,

    /// The provider could not be reached.
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    /// The provider did not answer within the refresh timeout.
    #[error("refresh timed out")]
    TimedOut,

    /// The session ended while the refresh was in flight.
    #[error("session ended during refresh")]
    Superseded,

    /// The refresh task did not complete.
    #[error("refresh aborted")]
    Aborted,

    /// The new credentials could not be persisted.
    #[error("store error: {0}")]
    Store(String),
}

impl From<ProviderError> for RefreshFailure {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Rejected(msg) | ProviderError::Invalid(msg) => Self::Rejected(msg),
            ProviderError::Expired => Self::Rejected("refresh token expired".to_string()),
            ProviderError::Unreachable(msg) | ProviderError::Protocol(msg) => {
                Self::Unreachable(msg)
            }
        }
    }
}

type SharedRefresh = Shared<BoxFuture<'static, Result<AccessToken, RefreshFailure>>>;

struct Pending {
    generation: u64,
    epoch: u64,
    future: SharedRefresh,
}

struct RefresherInner {
    session: SessionState,
    provider: Arc<dyn IdentityProvider>,
    timeout: Duration,
    pending: Mutex<Option<Pending>>,
    generation: AtomicU64,
    started: AtomicUsize,
}

impl RefresherInner {
    fn pending(&self) -> MutexGuard<'_, Option<Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Coordinates access token refreshes for one session. Cloning is cheap;
/// clones share the pending refresh.
#[derive(Clone)]
pub struct TokenRefresher {
    inner: Arc<RefresherInner>,
}

impl TokenRefresher {
    /// Create a refresher. `timeout` bounds each remote refresh call.
    #[must_use]
    pub fn new(
        session: SessionState,
        provider: Arc<dyn IdentityProvider>,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(RefresherInner {
                session,
                provider,
                timeout,
                pending: Mutex::new(None),
                generation: AtomicU64::new(0),
                started: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of remote refresh calls started so far.
    #[must_use]
    pub fn refreshes_started(&self) -> usize {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Whether a refresh is currently in flight.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner.pending().is_some()
    }

    /// The pending refresh, if it belongs to the current session.
    fn joinable(&self, pending: Option<&Pending>) -> Option<SharedRefresh> {
        let epoch = self.inner.session.epoch();
        pending
            .filter(|p| p.epoch == epoch)
            .map(|p| p.future.clone())
    }

    /// Obtain a new access token, joining the in-flight refresh if there is
    /// one.
    ///
    /// # Errors
    ///
    /// Returns the `RefreshFailure` shared by every waiter. Any failure
    /// other than `NoSession` and `Superseded` has ended the session the
    /// refresh started in.
    pub async fn refresh(&self) -> Result<AccessToken, RefreshFailure> {
        let future = {
            let mut pending = self.inner.pending();
            match self.joinable(pending.as_ref()) {
                Some(future) => future,
                None => self.start(&mut pending)?,
            }
        };
        future.await
    }

    /// Obtain an access token newer than `used`.
    ///
    /// When no refresh is pending and the session already holds a token
    /// other than `used`, that token is returned without a remote call.
    ///
    /// # Errors
    ///
    /// Same as [`TokenRefresher::refresh`].
    pub async fn refresh_stale(&self, used: &AccessToken) -> Result<AccessToken, RefreshFailure> {
        let future = {
            let mut pending = self.inner.pending();
            if let Some(future) = self.joinable(pending.as_ref()) {
                future
            } else {
                let snapshot = self.inner.session.snapshot();
                match snapshot.access_token() {
                    Some(current)
                        if snapshot.state == AuthState::Authenticated
                            && !current.same_as(used) =>
                    {
                        return Ok(current.clone());
                    }
                    _ => self.start(&mut pending)?,
                }
            }
        };
        future.await
    }

    /// Start a refresh. Called with the pending slot locked and holding
    /// nothing for the current session; a refresh left over from an earlier
    /// session is replaced.
    fn start(&self, pending: &mut Option<Pending>) -> Result<SharedRefresh, RefreshFailure> {
        let session = &self.inner.session;
        let snapshot = session.snapshot();
        if snapshot.state != AuthState::Authenticated {
            return Err(RefreshFailure::NoSession);
        }
        let epoch = snapshot.epoch;

        let Some(refresh_token) = snapshot.credentials.and_then(|c| c.refresh) else {
            return Err(fail(session, epoch, RefreshFailure::MissingRefreshToken));
        };

        session
            .transition(Transition::Refreshing { epoch })
            .map_err(|e| match e {
                SessionError::Rejected { .. } => RefreshFailure::NoSession,
                SessionError::Store(e) => RefreshFailure::Store(e.to_string()),
            })?;

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.started.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(generation, epoch, "Refresh started");

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let outcome = run(&inner, epoch, &refresh_token).await;
            let mut pending = inner.pending();
            if pending.as_ref().is_some_and(|p| p.generation == generation) {
                *pending = None;
            }
            outcome
        });

        let future = async move {
            task.await.unwrap_or_else(|e| {
                tracing::error!(error = %e, "Refresh task failed");
                Err(RefreshFailure::Aborted)
            })
        }
        .boxed()
        .shared();

        *pending = Some(Pending {
            generation,
            epoch,
            future: future.clone(),
        });
        Ok(future)
    }
}

impl std::fmt::Debug for TokenRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRefresher")
            .field("timeout", &self.inner.timeout)
            .field("pending", &self.is_pending())
            .finish_non_exhaustive()
    }
}

async fn run(
    inner: &RefresherInner,
    epoch: u64,
    refresh_token: &RefreshToken,
) -> Result<AccessToken, RefreshFailure> {
    let grant = match tokio::time::timeout(inner.timeout, inner.provider.refresh(refresh_token)).await
    {
        Ok(Ok(grant)) => grant,
        Ok(Err(e)) => return Err(fail(&inner.session, epoch, RefreshFailure::from(e))),
        Err(_) => return Err(fail(&inner.session, epoch, RefreshFailure::TimedOut)),
    };

    let access = grant.access.clone();
    match inner.session.transition(Transition::Refreshed {
        epoch,
        access: grant.access,
        refresh: grant.refresh,
    }) {
        Ok(_) => {
            tracing::info!("Access token refreshed");
            Ok(access)
        }
        Err(SessionError::Rejected { from, .. }) => {
            tracing::info!(state = %from, "Session ended during refresh, discarding new token");
            Err(RefreshFailure::Superseded)
        }
        Err(SessionError::Store(e)) => Err(fail(
            &inner.session,
            epoch,
            RefreshFailure::Store(e.to_string()),
        )),
    }
}

/// End the session of `epoch`; a later session is left alone.
fn fail(session: &SessionState, epoch: u64, failure: RefreshFailure) -> RefreshFailure {
    match session.transition(Transition::RefreshFailed { epoch }) {
        Ok(_) => tracing::info!(reason = %failure, "Refresh failed, session ended"),
        Err(SessionError::Rejected { from, .. }) => {
            tracing::debug!(reason = %failure, state = %from, "Refresh failed after session changed");
        }
        Err(e) => tracing::warn!(error = %e, "Failed to clear credentials after refresh failure"),
    }
    failure
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CredentialPair;
    use crate::provider::{LoginGrant, RefreshGrant};
    use crate::store::{CredentialStore, MemoryCredentialStore};
    use crate::types::{Identity, Role};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tokio::sync::Notify;

    struct GatedProvider {
        gate: Notify,
        calls: AtomicUsize,
        result: Result<&'static str, ProviderError>,
    }

    impl GatedProvider {
        fn new(result: Result<&'static str, ProviderError>) -> Arc<Self> {
            Arc::new(Self {
                gate: Notify::new(),
                calls: AtomicUsize::new(0),
                result,
            })
        }
    }

    #[async_trait]
    impl IdentityProvider for GatedProvider {
        async fn login(&self, _: &str, _: &str) -> Result<LoginGrant, ProviderError> {
            unreachable!()
        }

        async fn verify(&self, _: &AccessToken) -> Result<Identity, ProviderError> {
            unreachable!()
        }

        async fn refresh(&self, refresh: &RefreshToken) -> Result<RefreshGrant, ProviderError> {
            assert_eq!(refresh.expose(), "r-1");
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            self.result.clone().map(|access| RefreshGrant {
                access: AccessToken::new(access),
                refresh: None,
            })
        }

        async fn logout(&self, _: &AccessToken) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    fn session(refresh: Option<&str>) -> (SessionState, Arc<MemoryCredentialStore>) {
        let store = Arc::new(MemoryCredentialStore::new());
        let session = SessionState::new(store.clone());
        session.transition(Transition::Unauthenticated).unwrap();
        session.transition(Transition::Authenticating).unwrap();
        session
            .transition(Transition::LoggedIn {
                identity: Identity::new("u-1", "Ahmad", Role::Participant),
                credentials: CredentialPair::new(
                    AccessToken::new("a-1"),
                    refresh.map(RefreshToken::new),
                ),
            })
            .unwrap();
        (session, store)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let (session, store) = session(Some("r-1"));
        let provider = GatedProvider::new(Ok("a-2"));
        let refresher = TokenRefresher::new(session.clone(), provider.clone(), Duration::from_secs(5));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let refresher = refresher.clone();
                tokio::spawn(async move { refresher.refresh().await })
            })
            .collect();

        settle().await;
        assert_eq!(session.state(), AuthState::Refreshing);
        provider.gate.notify_one();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().expose(), "a-2");
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(refresher.refreshes_started(), 1);
        assert!(!refresher.is_pending());
        assert_eq!(session.state(), AuthState::Authenticated);
        assert_eq!(store.load().unwrap().unwrap().access.expose(), "a-2");
    }

    #[tokio::test]
    async fn test_refresh_stale_returns_newer_token_without_call() {
        let (session, _store) = session(Some("r-1"));
        let provider = GatedProvider::new(Ok("a-2"));
        let refresher = TokenRefresher::new(session, provider.clone(), Duration::from_secs(5));

        let token = refresher
            .refresh_stale(&AccessToken::new("a-0"))
            .await
            .unwrap();

        assert_eq!(token.expose(), "a-1");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejected_refresh_ends_session() {
        let (session, store) = session(Some("r-1"));
        let provider = GatedProvider::new(Err(ProviderError::Rejected("expired".into())));
        provider.gate.notify_one();
        let refresher = TokenRefresher::new(session.clone(), provider, Duration::from_secs(5));

        let err = refresher.refresh().await.unwrap_err();

        assert_eq!(err, RefreshFailure::Rejected("expired".into()));
        assert_eq!(session.state(), AuthState::Unauthenticated);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_missing_refresh_token_ends_session() {
        let (session, store) = session(None);
        let provider = GatedProvider::new(Ok("a-2"));
        let refresher = TokenRefresher::new(session.clone(), provider.clone(), Duration::from_secs(5));

        let err = refresher.refresh().await.unwrap_err();

        assert_eq!(err, RefreshFailure::MissingRefreshToken);
        assert_eq!(session.state(), AuthState::Unauthenticated);
        assert!(store.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_ends_session() {
        let (session, store) = session(Some("r-1"));
        let provider = GatedProvider::new(Ok("a-2"));
        let refresher = TokenRefresher::new(session.clone(), provider, Duration::from_secs(5));

        let err = refresher.refresh().await.unwrap_err();

        assert_eq!(err, RefreshFailure::TimedOut);
        assert_eq!(session.state(), AuthState::Unauthenticated);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_logout_during_refresh_is_not_undone() {
        let (session, store) = session(Some("r-1"));
        let provider = GatedProvider::new(Ok("a-2"));
        let refresher = TokenRefresher::new(session.clone(), provider.clone(), Duration::from_secs(5));

        let handle = tokio::spawn({
            let refresher = refresher.clone();
            async move { refresher.refresh().await }
        });
        settle().await;

        session.transition(Transition::Unauthenticated).unwrap();
        provider.gate.notify_one();

        assert_eq!(handle.await.unwrap().unwrap_err(), RefreshFailure::Superseded);
        assert_eq!(session.state(), AuthState::Unauthenticated);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_new_session_does_not_join_previous_refresh() {
        let (session, store) = session(Some("r-1"));
        let provider = GatedProvider::new(Ok("a-2"));
        let refresher = TokenRefresher::new(session.clone(), provider.clone(), Duration::from_secs(5));

        let previous = tokio::spawn({
            let refresher = refresher.clone();
            async move { refresher.refresh().await }
        });
        settle().await;

        session.transition(Transition::Unauthenticated).unwrap();
        session.transition(Transition::Authenticating).unwrap();
        session
            .transition(Transition::LoggedIn {
                identity: Identity::new("u-1", "Ahmad", Role::Participant),
                credentials: CredentialPair::new(
                    AccessToken::new("b-1"),
                    Some(RefreshToken::new("r-1")),
                ),
            })
            .unwrap();

        let current = tokio::spawn({
            let refresher = refresher.clone();
            async move { refresher.refresh().await }
        });
        settle().await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        provider.gate.notify_waiters();

        assert_eq!(previous.await.unwrap().unwrap_err(), RefreshFailure::Superseded);
        assert_eq!(current.await.unwrap().unwrap().expose(), "a-2");
        assert_eq!(refresher.refreshes_started(), 2);
        assert!(!refresher.is_pending());
        assert_eq!(session.state(), AuthState::Authenticated);
        assert_eq!(store.load().unwrap().unwrap().access.expose(), "a-2");
    }

    #[tokio::test]
    async fn test_failure_of_previous_refresh_keeps_new_session() {
        let (session, store) = session(Some("r-1"));
        let provider = GatedProvider::new(Err(ProviderError::Rejected("revoked".into())));
        let refresher = TokenRefresher::new(session.clone(), provider.clone(), Duration::from_secs(5));

        let previous = tokio::spawn({
            let refresher = refresher.clone();
            async move { refresher.refresh().await }
        });
        settle().await;

        session.transition(Transition::Unauthenticated).unwrap();
        session.transition(Transition::Authenticating).unwrap();
        session
            .transition(Transition::LoggedIn {
                identity: Identity::new("u-1", "Ahmad", Role::Participant),
                credentials: CredentialPair::new(AccessToken::new("b-1"), None),
            })
            .unwrap();
        provider.gate.notify_waiters();

        assert_eq!(
            previous.await.unwrap().unwrap_err(),
            RefreshFailure::Rejected("revoked".into())
        );
        assert_eq!(session.state(), AuthState::Authenticated);
        assert_eq!(session.access_token().unwrap().expose(), "b-1");
        assert_eq!(store.load().unwrap().unwrap().access.expose(), "b-1");
    }

    #[tokio::test]
    async fn test_refresh_without_session() {
        let session = SessionState::new(Arc::new(MemoryCredentialStore::new()));
        let provider = GatedProvider::new(Ok("a-2"));
        let refresher = TokenRefresher::new(session, provider, Duration::from_secs(5));

        assert_eq!(refresher.refresh().await.unwrap_err(), RefreshFailure::NoSession);
    }
}
