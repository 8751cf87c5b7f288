//! Login, logout and whoami commands.

use anyhow::{Context, Result};
use gatekeep_core::{AuthError, Config};

use super::open_client;
use crate::ui::{self, prompts};

/// Login command arguments.
#[derive(Debug, Clone, Default)]
pub struct LoginArgs {
    /// E-mail address; prompted when absent.
    pub identifier: Option<String>,
    /// Password; prompted when absent.
    pub secret: Option<String>,
}

/// Run the login command.
pub async fn run_login(config: &Config, args: LoginArgs) -> Result<()> {
    let (client, _) = open_client(config).await?;

    if let Some(identity) = client.current_identity() {
        ui::warning(&format!(
            "Already signed in as {} ({})",
            identity.display_name, identity.role
        ));
        ui::info("Run 'gatekeep logout' first to switch accounts");
        return Ok(());
    }

    let (identifier, secret) = prompts::login_credentials(args.identifier, args.secret)
        .context("Failed to read credentials")?;

    match client.login(&identifier, &secret).await {
        Ok(outcome) => {
            ui::success(&format!("Signed in as {}", outcome.identity.display_name));
            ui::identity(&outcome.identity);
            ui::kv("Landing view", outcome.landing.path());
            Ok(())
        }
        Err(AuthError::InvalidCredentials(msg)) => {
            ui::error(&msg);
            anyhow::bail!("Login rejected")
        }
        Err(e) if e.is_retryable() => {
            ui::error(&format!("Provider unreachable at {}", config.provider.base_url));
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Run the logout command.
pub async fn run_logout(config: &Config) -> Result<()> {
    let (client, _) = open_client(config).await?;

    let Some(identity) = client.current_identity() else {
        ui::info("Not signed in");
        return Ok(());
    };

    client.logout().await?;
    ui::success(&format!("Signed out {}", identity.display_name));
    Ok(())
}

/// Run the whoami command.
pub async fn run_whoami(config: &Config) -> Result<()> {
    let (client, _) = open_client(config).await?;

    match client.current_identity() {
        Some(identity) => {
            println!("{}", serde_json::to_string_pretty(&identity)?);
            Ok(())
        }
        None => {
            ui::info("Run 'gatekeep login' to sign in");
            anyhow::bail!(AuthError::NotAuthenticated)
        }
    }
}
