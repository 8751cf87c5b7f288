//! In-memory session state.
//!
//! `SessionState` is the single owner of the current identity and
//! credentials. Every change goes through [`SessionState::transition`],
//! which writes the credential store and publishes the new snapshot while
//! holding the watch channel's write lock, so no reader ever sees memory
//! and store disagree.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::watch;

use crate::auth::CredentialPair;
use crate::secrets::{AccessToken, RefreshToken};
use crate::store::{CredentialStore, StoreError, StoredSession};
use crate::types::{Identity, Role};

/// Session state errors.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Transition is not legal from the current state.
    #[error("Transition '{transition}' not allowed from state {from}")]
    Rejected {
        /// State the session was in.
        from: AuthState,
        /// Transition that was attempted.
        transition: &'static str,
    },

    /// Credential store failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Authentication state tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthState {
    /// Stored credentials have not been read yet.
    Initializing,
    /// No identity, no credentials.
    Unauthenticated,
    /// A login attempt is in flight.
    Authenticating,
    /// Identity and credentials present and presumed valid.
    Authenticated,
    /// Identity present, a refresh of the access token is in flight.
    Refreshing,
}

impl AuthState {
    /// Whether an identity and access token are present.
    #[must_use]
    pub const fn has_session(self) -> bool {
        matches!(self, Self::Authenticated | Self::Refreshing)
    }

    /// Whether the state is transient and views should wait.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Initializing | Self::Authenticating)
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Refreshing => "refreshing",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of the session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Current state.
    pub state: AuthState,
    /// Active identity (`Authenticated` / `Refreshing` only).
    pub identity: Option<Identity>,
    /// Active credentials (`Authenticated` / `Refreshing` only).
    pub credentials: Option<CredentialPair>,
    /// Verification could not reach the server; re-verify on next navigation.
    pub needs_reverify: bool,
    /// When the state last changed.
    pub changed_at: DateTime<Utc>,
    /// Incremented each time a session starts, by login or restore.
    pub epoch: u64,
}

impl SessionSnapshot {
    fn empty(state: AuthState, epoch: u64) -> Self {
        Self {
            state,
            identity: None,
            credentials: None,
            needs_reverify: false,
            changed_at: Utc::now(),
            epoch,
        }
    }

    fn authenticated(identity: Identity, credentials: CredentialPair, epoch: u64) -> Self {
        Self {
            state: AuthState::Authenticated,
            identity: Some(identity),
            credentials: Some(credentials),
            needs_reverify: false,
            changed_at: Utc::now(),
            epoch,
        }
    }

    /// Role of the active identity.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.identity.as_ref().map(|i| i.role)
    }

    /// Current access token.
    #[must_use]
    pub fn access_token(&self) -> Option<&AccessToken> {
        self.credentials.as_ref().map(|c| &c.access)
    }
}

/// A legal move of the session state machine.
#[derive(Debug)]
pub enum Transition {
    /// Login started.
    Authenticating,
    /// Login succeeded; credentials are persisted.
    LoggedIn {
        /// Identity returned by the provider.
        identity: Identity,
        /// Issued credentials.
        credentials: CredentialPair,
    },
    /// Session restored from the store at startup (already persisted).
    Restored {
        /// Cached identity.
        identity: Identity,
        /// Stored credentials.
        credentials: CredentialPair,
    },
    /// Refresh started for the session of `epoch`.
    Refreshing {
        /// Session epoch the refresh belongs to.
        epoch: u64,
    },
    /// Refresh succeeded; a missing refresh token keeps the current one.
    Refreshed {
        /// Session epoch the refresh belongs to.
        epoch: u64,
        /// New access token.
        access: AccessToken,
        /// Rotated refresh token, if any.
        refresh: Option<RefreshToken>,
    },
    /// Refresh failed; ends the session of `epoch` and clears the store.
    RefreshFailed {
        /// Session epoch the refresh belongs to.
        epoch: u64,
    },
    /// Server confirmed the session and returned the authoritative identity.
    Verified(Identity),
    /// Verification could not reach the server.
    VerifyDeferred,
    /// Session ended; the store is cleared.
    Unauthenticated,
}

impl Transition {
    /// Short name for logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Authenticating => "authenticating",
            Self::LoggedIn { .. } => "logged_in",
            Self::Restored { .. } => "restored",
            Self::Refreshing { .. } => "refreshing",
            Self::Refreshed { .. } => "refreshed",
            Self::RefreshFailed { .. } => "refresh_failed",
            Self::Verified(_) => "verified",
            Self::VerifyDeferred => "verify_deferred",
            Self::Unauthenticated => "unauthenticated",
        }
    }
}

struct SessionInner {
    tx: watch::Sender<SessionSnapshot>,
    store: Arc<dyn CredentialStore>,
}

/// Shared handle to the session state. Cloning is cheap.
#[derive(Clone)]
pub struct SessionState {
    inner: Arc<SessionInner>,
}

impl SessionState {
    /// Create a session in the `Initializing` state over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        let (tx, _rx) = watch::channel(SessionSnapshot::empty(AuthState::Initializing, 0));
        Self {
            inner: Arc::new(SessionInner { tx, store }),
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.tx.borrow().clone()
    }

    /// Current state tag.
    #[must_use]
    pub fn state(&self) -> AuthState {
        self.inner.tx.borrow().state
    }

    /// Active identity.
    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.inner.tx.borrow().identity.clone()
    }

    /// Current access token.
    #[must_use]
    pub fn access_token(&self) -> Option<AccessToken> {
        self.inner.tx.borrow().access_token().cloned()
    }

    /// Current refresh token.
    #[must_use]
    pub fn refresh_token(&self) -> Option<RefreshToken> {
        self.inner
            .tx
            .borrow()
            .credentials
            .as_ref()
            .and_then(|c| c.refresh.clone())
    }

    /// Subscribe to snapshots. The receiver sees every transition as soon
    /// as `transition` returns.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.tx.subscribe()
    }

    /// Current session epoch.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.inner.tx.borrow().epoch
    }

    /// Read the persisted session without changing state.
    pub(crate) fn load_persisted(&self) -> Result<Option<StoredSession>, StoreError> {
        self.inner.store.load()
    }

    /// Apply a transition. This is the only way session state changes.
    ///
    /// Returns the resulting state. A rejected transition or failed store
    /// write leaves memory and store untouched, except `Unauthenticated`
    /// and `RefreshFailed`, which always reset memory.
    pub(crate) fn transition(&self, transition: Transition) -> Result<AuthState, SessionError> {
        let name = transition.name();
        let store = self.inner.store.as_ref();
        let mut result = Ok(AuthState::Unauthenticated);

        self.inner.tx.send_if_modified(|snapshot| {
            let from = snapshot.state;
            let (changed, outcome) = apply(store, snapshot, transition);
            if changed {
                tracing::debug!(%from, to = %snapshot.state, transition = name, "Session transition");
            }
            result = outcome.map(|()| snapshot.state);
            changed
        });

        if let Err(e) = &result {
            tracing::warn!(transition = name, error = %e, "Session transition failed");
        }
        result
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn stored(identity: &Identity, credentials: &CredentialPair) -> StoredSession {
    StoredSession {
        access: credentials.access.clone(),
        refresh: credentials.refresh.clone(),
        identity: identity.clone(),
    }
}

/// Apply `transition` to `snapshot`. Returns whether the snapshot changed
/// and the outcome to report.
fn apply(
    store: &dyn CredentialStore,
    snapshot: &mut SessionSnapshot,
    transition: Transition,
) -> (bool, Result<(), SessionError>) {
    use AuthState as S;

    let from = snapshot.state;
    let rejected = |transition: &'static str| {
        (false, Err(SessionError::Rejected { from, transition }))
    };

    match transition {
        Transition::Authenticating => {
            if from != S::Unauthenticated {
                return rejected("authenticating");
            }
            *snapshot = SessionSnapshot::empty(S::Authenticating, snapshot.epoch);
            (true, Ok(()))
        }

        Transition::LoggedIn {
            identity,
            credentials,
        } => {
            if from != S::Authenticating {
                return rejected("logged_in");
            }
            if let Err(e) = store.save(&stored(&identity, &credentials)) {
                return (false, Err(e.into()));
            }
            *snapshot = SessionSnapshot::authenticated(identity, credentials, snapshot.epoch + 1);
            (true, Ok(()))
        }

        Transition::Restored {
            identity,
            credentials,
        } => {
            if from != S::Initializing {
                return rejected("restored");
            }
            *snapshot = SessionSnapshot::authenticated(identity, credentials, snapshot.epoch + 1);
            (true, Ok(()))
        }

        Transition::Refreshing { epoch } => {
            if from != S::Authenticated || epoch != snapshot.epoch {
                return rejected("refreshing");
            }
            snapshot.state = S::Refreshing;
            snapshot.changed_at = Utc::now();
            (true, Ok(()))
        }

        Transition::Refreshed {
            epoch,
            access,
            refresh,
        } => {
            let (Some(identity), Some(current)) = (&snapshot.identity, &snapshot.credentials)
            else {
                return rejected("refreshed");
            };
            if from != S::Refreshing || epoch != snapshot.epoch {
                return rejected("refreshed");
            }

            let credentials = CredentialPair::new(access, refresh.or_else(|| current.refresh.clone()));
            if let Err(e) = store.save(&stored(identity, &credentials)) {
                return (false, Err(e.into()));
            }
            snapshot.state = S::Authenticated;
            snapshot.credentials = Some(credentials);
            snapshot.changed_at = Utc::now();
            (true, Ok(()))
        }

        Transition::RefreshFailed { epoch } => {
            if !from.has_session() || epoch != snapshot.epoch {
                return rejected("refresh_failed");
            }
            let outcome = store.clear().map_err(SessionError::from);
            *snapshot = SessionSnapshot::empty(S::Unauthenticated, snapshot.epoch);
            (true, outcome)
        }

        Transition::Verified(identity) => {
            if !from.has_session() {
                return rejected("verified");
            }
            let Some(credentials) = &snapshot.credentials else {
                return rejected("verified");
            };
            if let Err(e) = store.save(&stored(&identity, credentials)) {
                return (false, Err(e.into()));
            }
            snapshot.identity = Some(identity);
            snapshot.needs_reverify = false;
            (true, Ok(()))
        }

        Transition::VerifyDeferred => {
            if !from.has_session() {
                return rejected("verify_deferred");
            }
            if snapshot.needs_reverify {
                return (false, Ok(()));
            }
            snapshot.needs_reverify = true;
            (true, Ok(()))
        }

        Transition::Unauthenticated => {
            if from == S::Unauthenticated {
                return (false, Ok(()));
            }
            // Authenticating is only entered from an empty store
            let outcome = if from == S::Authenticating {
                Ok(())
            } else {
                store.clear().map_err(SessionError::from)
            };
            *snapshot = SessionSnapshot::empty(S::Unauthenticated, snapshot.epoch);
            (true, outcome)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCredentialStore;
    use pretty_assertions::assert_eq;

    fn identity(role: Role) -> Identity {
        Identity::new("u-1", "Ahmad", role)
    }

    fn pair(access: &str, refresh: Option<&str>) -> CredentialPair {
        CredentialPair::new(AccessToken::new(access), refresh.map(RefreshToken::new))
    }

    fn logged_in(store: &Arc<MemoryCredentialStore>) -> SessionState {
        let session = SessionState::new(store.clone());
        session.transition(Transition::Unauthenticated).unwrap();
        session.transition(Transition::Authenticating).unwrap();
        session
            .transition(Transition::LoggedIn {
                identity: identity(Role::Participant),
                credentials: pair("a-1", Some("r-1")),
            })
            .unwrap();
        session
    }

    #[test]
    fn test_starts_initializing() {
        let session = SessionState::new(Arc::new(MemoryCredentialStore::new()));
        assert_eq!(session.state(), AuthState::Initializing);
        assert!(session.identity().is_none());
    }

    #[test]
    fn test_login_persists_credentials() {
        let store = Arc::new(MemoryCredentialStore::new());
        let session = logged_in(&store);

        assert_eq!(session.state(), AuthState::Authenticated);
        let stored = store.load().unwrap().unwrap();
        assert_eq!(stored.access.expose(), "a-1");
        assert_eq!(stored.identity.role, Role::Participant);
    }

    #[test]
    fn test_logged_in_requires_authenticating() {
        let store = Arc::new(MemoryCredentialStore::new());
        let session = SessionState::new(store.clone());

        let result = session.transition(Transition::LoggedIn {
            identity: identity(Role::Mentor),
            credentials: pair("a-1", None),
        });

        assert!(matches!(
            result,
            Err(SessionError::Rejected {
                from: AuthState::Initializing,
                ..
            })
        ));
        assert_eq!(store.writes(), 0);
    }

    #[test]
    fn test_refresh_keeps_refresh_token_when_not_rotated() {
        let store = Arc::new(MemoryCredentialStore::new());
        let session = logged_in(&store);

        session.transition(Transition::Refreshing { epoch: 1 }).unwrap();
        assert_eq!(session.state(), AuthState::Refreshing);

        session
            .transition(Transition::Refreshed {
                epoch: 1,
                access: AccessToken::new("a-2"),
                refresh: None,
            })
            .unwrap();

        assert_eq!(session.state(), AuthState::Authenticated);
        assert_eq!(session.access_token().unwrap().expose(), "a-2");
        assert_eq!(session.refresh_token().unwrap().expose(), "r-1");
        assert_eq!(store.load().unwrap().unwrap().access.expose(), "a-2");
    }

    #[test]
    fn test_refreshed_after_logout_is_rejected() {
        let store = Arc::new(MemoryCredentialStore::new());
        let session = logged_in(&store);
        session.transition(Transition::Refreshing { epoch: 1 }).unwrap();
        session.transition(Transition::Unauthenticated).unwrap();

        let result = session.transition(Transition::Refreshed {
            epoch: 1,
            access: AccessToken::new("a-2"),
            refresh: None,
        });

        assert!(result.is_err());
        assert_eq!(session.state(), AuthState::Unauthenticated);
        assert!(store.is_empty());
    }

    #[test]
    fn test_unauthenticated_clears_store() {
        let store = Arc::new(MemoryCredentialStore::new());
        let session = logged_in(&store);

        session.transition(Transition::Unauthenticated).unwrap();

        assert_eq!(session.state(), AuthState::Unauthenticated);
        assert!(session.access_token().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_unauthenticated_twice_writes_once() {
        let store = Arc::new(MemoryCredentialStore::new());
        let session = logged_in(&store);
        let writes = store.writes();

        session.transition(Transition::Unauthenticated).unwrap();
        session.transition(Transition::Unauthenticated).unwrap();

        assert_eq!(store.writes(), writes + 1);
    }

    #[test]
    fn test_subscribers_see_transition_immediately() {
        let store = Arc::new(MemoryCredentialStore::new());
        let session = SessionState::new(store);
        session.transition(Transition::Unauthenticated).unwrap();
        let mut rx = session.subscribe();

        session.transition(Transition::Authenticating).unwrap();

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().state, AuthState::Authenticating);
    }

    #[test]
    fn test_verified_replaces_identity_and_clears_flag() {
        let store = Arc::new(MemoryCredentialStore::new());
        let session = logged_in(&store);
        session.transition(Transition::VerifyDeferred).unwrap();
        assert!(session.snapshot().needs_reverify);

        session
            .transition(Transition::Verified(identity(Role::Mentor)))
            .unwrap();

        let snapshot = session.snapshot();
        assert!(!snapshot.needs_reverify);
        assert_eq!(snapshot.role(), Some(Role::Mentor));
        assert_eq!(store.load().unwrap().unwrap().identity.role, Role::Mentor);
    }

    #[test]
    fn test_refresh_of_previous_session_is_rejected() {
        let store = Arc::new(MemoryCredentialStore::new());
        let session = logged_in(&store);
        session.transition(Transition::Unauthenticated).unwrap();
        session.transition(Transition::Authenticating).unwrap();
        session
            .transition(Transition::LoggedIn {
                identity: identity(Role::Mentor),
                credentials: pair("b-1", Some("r-2")),
            })
            .unwrap();
        session.transition(Transition::Refreshing { epoch: 2 }).unwrap();

        let stale = session.transition(Transition::Refreshed {
            epoch: 1,
            access: AccessToken::new("a-2"),
            refresh: None,
        });
        assert!(stale.is_err());
        assert!(session.transition(Transition::RefreshFailed { epoch: 1 }).is_err());

        assert_eq!(session.state(), AuthState::Refreshing);
        assert_eq!(session.access_token().unwrap().expose(), "b-1");
        assert_eq!(store.load().unwrap().unwrap().access.expose(), "b-1");

        session.transition(Transition::RefreshFailed { epoch: 2 }).unwrap();
        assert_eq!(session.state(), AuthState::Unauthenticated);
        assert!(store.is_empty());
    }

    #[test]
    fn test_authenticating_requires_settled_startup() {
        let store = Arc::new(MemoryCredentialStore::new());
        let session = SessionState::new(store.clone());

        let result = session.transition(Transition::Authenticating);

        assert!(matches!(
            result,
            Err(SessionError::Rejected {
                from: AuthState::Initializing,
                transition: "authenticating",
            })
        ));
        assert_eq!(session.state(), AuthState::Initializing);
        assert_eq!(store.writes(), 0);
    }

    #[test]
    fn test_epoch_advances_per_session() {
        let store = Arc::new(MemoryCredentialStore::new());
        let session = logged_in(&store);
        assert_eq!(session.epoch(), 1);

        session.transition(Transition::Refreshing { epoch: 1 }).unwrap();
        session
            .transition(Transition::Refreshed {
                epoch: 1,
                access: AccessToken::new("a-2"),
                refresh: None,
            })
            .unwrap();
        assert_eq!(session.epoch(), 1);

        session.transition(Transition::Unauthenticated).unwrap();
        assert_eq!(session.epoch(), 1);
        session.transition(Transition::Authenticating).unwrap();
        session
            .transition(Transition::LoggedIn {
                identity: identity(Role::Mentor),
                credentials: pair("b-1", None),
            })
            .unwrap();
        assert_eq!(session.epoch(), 2);
    }

    #[test]
    fn test_restored_does_not_write() {
        let store = Arc::new(MemoryCredentialStore::new());
        let session = SessionState::new(store.clone());

        session
            .transition(Transition::Restored {
                identity: identity(Role::Participant),
                credentials: pair("a-1", None),
            })
            .unwrap();

        assert_eq!(session.state(), AuthState::Authenticated);
        assert_eq!(store.writes(), 0);
    }
}
