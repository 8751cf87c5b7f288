//! CLI command implementations.

pub mod call;
pub mod check;
pub mod config;
pub mod session;
pub mod status;

pub use call::run_call;
pub use check::run_check;
pub use config::run_config;
pub use session::{run_login, run_logout, run_whoami};
pub use status::run_status;

use std::sync::Arc;

use anyhow::{Context, Result};
use gatekeep_core::{AuthClient, BootstrapOutcome, Config, SledCredentialStore, StoreKey};

/// Open the encrypted session store and restore the stored session.
///
/// The store key is created on first use.
pub async fn open_client(config: &Config) -> Result<(AuthClient, BootstrapOutcome)> {
    let key_path = Config::store_key_path();
    let key = StoreKey::load_or_generate(&key_path)
        .with_context(|| format!("Failed to load store key from {}", key_path.display()))?;

    let store_dir = Config::store_dir();
    let store = SledCredentialStore::open(&store_dir, key)
        .with_context(|| format!("Failed to open session store at {}", store_dir.display()))?;

    let client = AuthClient::from_config(config, Arc::new(store))?;
    let outcome = client.initialize().await?;
    tracing::debug!(?outcome, "Session restored");

    Ok((client, outcome))
}
