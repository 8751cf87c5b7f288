//! Durable credential storage.
//!
//! The store holds exactly three slots: access token, refresh token and the
//! identity snapshot. They are written and cleared as one unit, so `load`
//! never observes a mix of two sessions.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use crate::secrets::{AccessToken, RefreshToken, SecretError, Sealer, StoreKey};
use crate::types::Identity;

const TREE_NAME: &str = "session";
const ACCESS_SLOT: &[u8] = b"access_token";
const REFRESH_SLOT: &[u8] = b"refresh_token";
const IDENTITY_SLOT: &[u8] = b"identity";

/// Credential store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Sealing or unsealing a slot failed.
    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    /// Slots are inconsistent (e.g. access token without identity).
    #[error("Corrupt credential store: {0}")]
    Corrupt(String),
}

/// Everything the store persists for one session.
#[derive(Debug, Clone)]
pub struct StoredSession {
    /// Access token.
    pub access: AccessToken,
    /// Refresh token, if the provider issued one.
    pub refresh: Option<RefreshToken>,
    /// Identity snapshot taken at login or last verification.
    pub identity: Identity,
}

/// Synchronous, durable persistence of the current session.
pub trait CredentialStore: Send + Sync {
    /// Persist all three slots as one logical unit.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails; a failed save leaves the previous
    /// contents intact.
    fn save(&self, session: &StoredSession) -> Result<(), StoreError>;

    /// Load the persisted session, if any.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read or is inconsistent.
    fn load(&self) -> Result<Option<StoredSession>, StoreError>;

    /// Remove all three slots.
    ///
    /// # Errors
    ///
    /// Returns error if the removal fails.
    fn clear(&self) -> Result<(), StoreError>;
}

/// Credential store backed by sled, with every slot sealed by AES-256-GCM.
pub struct SledCredentialStore {
    tree: sled::Tree,
    sealer: Sealer,
}

impl SledCredentialStore {
    /// Open or create a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened.
    pub fn open(path: &Path, key: StoreKey) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::with_db(db, key)
    }

    /// Create a store over an existing sled database.
    ///
    /// # Errors
    ///
    /// Returns error if the tree cannot be opened.
    pub fn with_db(db: sled::Db, key: StoreKey) -> Result<Self, StoreError> {
        let tree = db.open_tree(TREE_NAME)?;
        Ok(Self {
            tree,
            sealer: Sealer::new(key),
        })
    }

    fn read_slot(&self, slot: &[u8]) -> Result<Option<String>, StoreError> {
        match self.tree.get(slot)? {
            Some(sealed) => Ok(Some(self.sealer.open_string(&sealed)?)),
            None => Ok(None),
        }
    }
}

impl CredentialStore for SledCredentialStore {
    fn save(&self, session: &StoredSession) -> Result<(), StoreError> {
        let identity = serde_json::to_vec(&session.identity)?;

        let mut batch = sled::Batch::default();
        batch.insert(ACCESS_SLOT, self.sealer.seal(session.access.expose().as_bytes())?);
        match &session.refresh {
            Some(refresh) => batch.insert(REFRESH_SLOT, self.sealer.seal(refresh.expose().as_bytes())?),
            None => batch.remove(REFRESH_SLOT),
        }
        batch.insert(IDENTITY_SLOT, self.sealer.seal(&identity)?);

        self.tree.apply_batch(batch)?;
        self.tree.flush()?;

        tracing::debug!(user = %session.identity.id, "Credentials persisted");
        Ok(())
    }

    fn load(&self) -> Result<Option<StoredSession>, StoreError> {
        let Some(access) = self.read_slot(ACCESS_SLOT)? else {
            return Ok(None);
        };

        let identity = self
            .read_slot(IDENTITY_SLOT)?
            .ok_or_else(|| StoreError::Corrupt("access token without identity".to_string()))?;
        let identity: Identity = serde_json::from_str(&identity)?;

        let refresh = self.read_slot(REFRESH_SLOT)?.map(RefreshToken::new);

        Ok(Some(StoredSession {
            access: AccessToken::new(access),
            refresh,
            identity,
        }))
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut batch = sled::Batch::default();
        batch.remove(ACCESS_SLOT);
        batch.remove(REFRESH_SLOT);
        batch.remove(IDENTITY_SLOT);

        self.tree.apply_batch(batch)?;
        self.tree.flush()?;

        tracing::debug!("Credentials cleared");
        Ok(())
    }
}

/// In-process credential store.
///
/// Counts every `save`/`clear` so callers can assert that an operation
/// did not touch the store.
#[derive(Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<StoredSession>>,
    writes: AtomicUsize,
}

impl MemoryCredentialStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds a session.
    #[must_use]
    pub fn with_session(session: StoredSession) -> Self {
        Self {
            slot: Mutex::new(Some(session)),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of `save` and `clear` calls so far.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Whether the store currently holds an access token.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn save(&self, session: &StoredSession) -> Result<(), StoreError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load(&self) -> Result<Option<StoredSession>, StoreError> {
        Ok(self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
