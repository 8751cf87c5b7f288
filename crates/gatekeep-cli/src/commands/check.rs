//! Check command - evaluate view access for the current session.

use anyhow::Result;
use gatekeep_core::{Config, GuardDecision, View};

use super::open_client;
use crate::ui;

/// Run the check command.
pub async fn run_check(config: &Config, view: &str) -> Result<()> {
    let view = View::new(view);
    let (client, _) = open_client(config).await?;

    let decision = client.navigate(&view).await?;
    ui::decision(&view, &decision);

    let roles = client.guard().routes().required_roles(&view);
    if matches!(decision, GuardDecision::Redirect(_)) && !roles.is_empty() {
        let names: Vec<_> = roles.iter().map(ToString::to_string).collect();
        ui::kv("  Requires", &names.join(", "));
    }

    Ok(())
}
