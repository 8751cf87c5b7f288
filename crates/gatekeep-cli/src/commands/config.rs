//! Config show/validate/path command.

use std::path::{Path, PathBuf};

use anyhow::Result;
use gatekeep_core::config::Config;
use gatekeep_core::guard::RouteTable;

use crate::ui::{self, HealthStatus};

/// What to do with the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigAction {
    /// Print the effective configuration.
    Show,
    /// Validate the file and the route table.
    Validate,
    /// Print file and state locations.
    Path,
}

/// Config command arguments.
#[derive(Debug, Clone)]
pub struct ConfigArgs {
    /// What to do.
    pub action: ConfigAction,
    /// Explicit config file.
    pub path: Option<PathBuf>,
}

/// Run the config command.
pub fn run_config(args: &ConfigArgs) -> Result<()> {
    let config_path = args.path.clone().unwrap_or_else(Config::default_path);

    match args.action {
        ConfigAction::Show => show_config(&config_path),
        ConfigAction::Validate => validate_config(&config_path),
        ConfigAction::Path => {
            ui::kv("Config", &config_path.display().to_string());
            ui::kv("State", &Config::state_dir().display().to_string());
            ui::kv("Session store", &Config::store_dir().display().to_string());
            ui::kv("Store key", &Config::store_key_path().display().to_string());
            Ok(())
        }
    }
}

/// Show the effective configuration (file, defaults and environment).
fn show_config(config_path: &Path) -> Result<()> {
    let config = if config_path.exists() {
        Config::load(config_path)?.with_env_overrides()
    } else {
        ui::warning(&format!(
            "Config file not found: {} (showing defaults)",
            config_path.display()
        ));
        Config::default().with_env_overrides()
    };

    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Validate configuration and the route table it describes.
fn validate_config(config_path: &Path) -> Result<()> {
    if !config_path.exists() {
        ui::health_check("Config file", HealthStatus::Warning, Some("not found, defaults apply"));
    }

    let config = if config_path.exists() {
        match Config::load(config_path) {
            Ok(config) => {
                ui::health_check("Config file", HealthStatus::Ok, Some("parsed"));
                config
            }
            Err(e) => {
                ui::health_check("Config file", HealthStatus::Error, Some(&e.to_string()));
                anyhow::bail!("Configuration is invalid");
            }
        }
    } else {
        Config::default()
    };

    match RouteTable::from_config(&config.routes) {
        Ok(routes) => {
            let detail = format!("login view {}", routes.login_view().path());
            ui::health_check("Routes", HealthStatus::Ok, Some(&detail));
        }
        Err(e) => {
            ui::health_check("Routes", HealthStatus::Error, Some(&e.to_string()));
            anyhow::bail!("Configuration is invalid");
        }
    }

    ui::success("Configuration is valid");
    Ok(())
}
