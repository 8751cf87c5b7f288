//! Status command - show configuration, store and session health.

use std::path::Path;

use anyhow::Result;
use gatekeep_core::{AuthState, BootstrapOutcome, Config};

use super::open_client;
use crate::ui::{self, HealthStatus};

/// Health of the configuration file the command was started with.
fn config_health(path: &Path) -> (HealthStatus, &'static str) {
    if path.is_file() {
        (HealthStatus::Ok, "loaded")
    } else {
        (HealthStatus::Warning, "using defaults")
    }
}

/// Run the status command. `config_path` is the file `config` was loaded
/// from, or would have been.
pub async fn run_status(config: &Config, config_path: &Path) -> Result<()> {
    ui::header("Gatekeep Status");

    println!();
    ui::info("Configuration");
    let (status, detail) = config_health(config_path);
    ui::health_check("Config", status, Some(detail));
    ui::kv("  File", &config_path.display().to_string());
    ui::kv("  Provider", &config.provider.base_url);
    ui::kv("  API", &config.api.base_url);

    println!();
    ui::info("Session");
    let (client, outcome) = match open_client(config).await {
        Ok(opened) => opened,
        Err(e) => {
            ui::health_check("Store", HealthStatus::Error, Some(&e.to_string()));
            return Err(e);
        }
    };
    ui::health_check("Store", HealthStatus::Ok, Some(&Config::store_dir().display().to_string()));

    let (status, detail) = match outcome {
        BootstrapOutcome::NoSession => (HealthStatus::Warning, "not signed in"),
        BootstrapOutcome::Verified => (HealthStatus::Ok, "verified"),
        BootstrapOutcome::Refreshed => (HealthStatus::Ok, "verified after refresh"),
        BootstrapOutcome::Deferred => (HealthStatus::Unknown, "provider unreachable, using cached identity"),
        BootstrapOutcome::Cleared => (HealthStatus::Error, "stored session was rejected and removed"),
    };
    ui::health_check("Verification", status, Some(detail));

    let snapshot = client.snapshot();
    ui::kv("  State", &snapshot.state.to_string());
    if let Some(identity) = &snapshot.identity {
        ui::identity(identity);
        ui::kv("  Since", &snapshot.changed_at.to_rfc3339());
    }

    if snapshot.state == AuthState::Unauthenticated {
        ui::info("  Run 'gatekeep login' to sign in");
    }

    Ok(())
}
