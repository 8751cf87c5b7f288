//! Configuration loading and validation.
//!
//! JSON5 format. Config location: `~/.gatekeep/gatekeep.json`, or
//! `$GATEKEEP_STATE_DIR/gatekeep.json` when the variable is set.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::types::Role;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON5 parsing error.
    #[error("Parse error: {0}")]
    Parse(#[from] json5::Error),

    /// Config validation error.
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Identity provider endpoints.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// API the authenticated invoker talks to.
    #[serde(default)]
    pub api: ApiConfig,

    /// Session timeouts.
    #[serde(default)]
    pub session: SessionConfig,

    /// View classification for the access guard.
    #[serde(default)]
    pub routes: RoutesConfig,

    /// Global settings.
    #[serde(default)]
    pub settings: GlobalSettings,
}

impl Config {
    /// Load configuration from the default location, falling back to
    /// defaults when no file exists. Environment overrides are applied.
    ///
    /// # Errors
    ///
    /// Returns error if config cannot be loaded or parsed.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        let config = if path.exists() {
            Self::load(&path)?
        } else {
            Self::default()
        };
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a path.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or file write fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        Self::state_dir().join("gatekeep.json")
    }

    /// Get the Gatekeep state directory.
    ///
    /// Uses `GATEKEEP_STATE_DIR` env var if set, otherwise `~/.gatekeep`.
    #[must_use]
    pub fn state_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("GATEKEEP_STATE_DIR") {
            PathBuf::from(dir)
        } else if let Some(home) = dirs::home_dir() {
            home.join(".gatekeep")
        } else {
            PathBuf::from(".gatekeep")
        }
    }

    /// Directory of the credential store database.
    #[must_use]
    pub fn store_dir() -> PathBuf {
        Self::state_dir().join("session")
    }

    /// Path of the credential store key.
    #[must_use]
    pub fn store_key_path() -> PathBuf {
        Self::state_dir().join("store.key")
    }

    /// Apply environment overrides (`GATEKEEP_PROVIDER_URL`, `GATEKEEP_API_URL`).
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("GATEKEEP_PROVIDER_URL") {
            self.provider.base_url = url;
        }
        if let Ok(url) = std::env::var("GATEKEEP_API_URL") {
            self.api.base_url = url;
        }
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` naming the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.base_url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "provider.baseUrl cannot be empty".to_string(),
            ));
        }
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "api.baseUrl cannot be empty".to_string(),
            ));
        }

        let timeouts = [
            ("provider.requestTimeoutSecs", self.provider.request_timeout_secs),
            ("api.requestTimeoutSecs", self.api.request_timeout_secs),
            ("session.verifyTimeoutSecs", self.session.verify_timeout_secs),
            ("session.refreshTimeoutSecs", self.session.refresh_timeout_secs),
            ("session.logoutTimeoutSecs", self.session.logout_timeout_secs),
        ];
        for (name, secs) in timeouts {
            if secs == 0 {
                return Err(ConfigError::Validation(format!("{name} cannot be 0")));
            }
        }

        for (view, roles) in &self.routes.guarded {
            for role in roles {
                role.parse::<Role>().map_err(|e| {
                    ConfigError::Validation(format!("routes.guarded['{view}']: {e}"))
                })?;
            }
        }

        Ok(())
    }
}

/// Identity provider endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Base URL, e.g. `https://id.example.com/v1`.
    #[serde(default = "default_provider_url")]
    pub base_url: String,

    /// Login path.
    #[serde(default = "default_login_path")]
    pub login_path: String,

    /// Verify path.
    #[serde(default = "default_verify_path")]
    pub verify_path: String,

    /// Refresh path.
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,

    /// Logout path.
    #[serde(default = "default_logout_path")]
    pub logout_path: String,

    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_url(),
            login_path: default_login_path(),
            verify_path: default_verify_path(),
            refresh_path: default_refresh_path(),
            logout_path: default_logout_path(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ProviderConfig {
    /// Provider config for a base URL with default paths.
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Request timeout as Duration.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_provider_url() -> String {
    "http://localhost:5000/v1".to_string()
}

fn default_login_path() -> String {
    "/auth/login".to_string()
}

fn default_verify_path() -> String {
    "/auth/verify".to_string()
}

fn default_refresh_path() -> String {
    "/auth/refresh".to_string()
}

fn default_logout_path() -> String {
    "/auth/logout".to_string()
}

const fn default_request_timeout() -> u64 {
    30
}

/// API endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Base URL that request paths are joined to.
    #[serde(default = "default_api_url")]
    pub base_url: String,

    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Send an `X-System-Key` request tag with every call.
    #[serde(default = "default_true")]
    pub system_key_header: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_url(),
            request_timeout_secs: default_request_timeout(),
            system_key_header: true,
        }
    }
}

impl ApiConfig {
    /// API config for a base URL.
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Request timeout as Duration.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_api_url() -> String {
    "http://localhost:5000".to_string()
}

const fn default_true() -> bool {
    true
}

/// Bounds on the session's network waits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Startup verification timeout. Expiry is non-destructive.
    #[serde(default = "default_verify_timeout")]
    pub verify_timeout_secs: u64,

    /// Refresh timeout. Expiry ends the session.
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,

    /// Best-effort logout notification timeout.
    #[serde(default = "default_logout_timeout")]
    pub logout_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            verify_timeout_secs: default_verify_timeout(),
            refresh_timeout_secs: default_refresh_timeout(),
            logout_timeout_secs: default_logout_timeout(),
        }
    }
}

impl SessionConfig {
    /// Verify timeout as Duration.
    #[must_use]
    pub const fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }

    /// Refresh timeout as Duration.
    #[must_use]
    pub const fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    /// Logout timeout as Duration.
    #[must_use]
    pub const fn logout_timeout(&self) -> Duration {
        Duration::from_secs(self.logout_timeout_secs)
    }
}

const fn default_verify_timeout() -> u64 {
    10
}

const fn default_refresh_timeout() -> u64 {
    15
}

const fn default_logout_timeout() -> u64 {
    5
}

/// View classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutesConfig {
    /// Where unauthenticated users are sent.
    #[serde(default = "default_login_view")]
    pub login_view: String,

    /// Views that render without a session.
    #[serde(default = "default_public_views")]
    pub public_views: Vec<String>,

    /// Public views that signed-in users are redirected away from.
    #[serde(default = "default_login_only_views")]
    pub login_only_views: Vec<String>,

    /// Guarded views with required role names (empty = any signed-in user).
    #[serde(default = "default_guarded")]
    pub guarded: BTreeMap<String, Vec<String>>,
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            login_view: default_login_view(),
            public_views: default_public_views(),
            login_only_views: default_login_only_views(),
            guarded: default_guarded(),
        }
    }
}

fn default_login_view() -> String {
    "/login".to_string()
}

fn default_public_views() -> Vec<String> {
    vec![
        "/login".to_string(),
        "/register".to_string(),
        "/forgot-password".to_string(),
    ]
}

fn default_login_only_views() -> Vec<String> {
    vec!["/login".to_string(), "/register".to_string()]
}

fn default_guarded() -> BTreeMap<String, Vec<String>> {
    let mut guarded: BTreeMap<String, Vec<String>> = Role::ALL
        .iter()
        .map(|role| (role.default_view().0, vec![role.to_string()]))
        .collect();
    guarded.insert("/dashboard".to_string(), vec![]);
    guarded
}

/// Global settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    /// Enable debug logging.
    #[serde(default)]
    pub debug: bool,

    /// Log format.
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Pretty,
    /// JSON format.
    Json,
}
