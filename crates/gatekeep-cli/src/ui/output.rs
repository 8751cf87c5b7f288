//! Formatted output utilities.

use console::{Style, style};
use gatekeep_core::{GuardDecision, Identity, View};

/// Print a success message with checkmark.
pub fn success(msg: &str) {
    println!("{} {}", style("✓").green().bold(), msg);
}

/// Print an error message with X.
pub fn error(msg: &str) {
    eprintln!("{} {}", style("✗").red().bold(), msg);
}

/// Print a warning message.
pub fn warning(msg: &str) {
    println!("{} {}", style("⚠").yellow().bold(), msg);
}

/// Print an info message.
pub fn info(msg: &str) {
    println!("{} {}", style("ℹ").blue().bold(), msg);
}

/// Print a header/section title.
pub fn header(msg: &str) {
    println!("\n{}", style(msg).bold().underlined());
}

/// Print a key-value pair.
pub fn kv(key: &str, value: &str) {
    println!("{}: {}", style(key).dim(), value);
}

/// Health check result display.
pub fn health_check(name: &str, status: HealthStatus, detail: Option<&str>) {
    let (icon, status_style) = match status {
        HealthStatus::Ok => (style("✓").green(), Style::new().green()),
        HealthStatus::Warning => (style("⚠").yellow(), Style::new().yellow()),
        HealthStatus::Error => (style("✗").red(), Style::new().red()),
        HealthStatus::Unknown => (style("?").dim(), Style::new().dim()),
    };

    let status_text = match status {
        HealthStatus::Ok => "OK",
        HealthStatus::Warning => "WARNING",
        HealthStatus::Error => "ERROR",
        HealthStatus::Unknown => "UNKNOWN",
    };

    print!("  {icon} {name}: ");
    print!("{}", status_style.apply_to(status_text));

    if let Some(d) = detail {
        print!(" - {}", style(d).dim());
    }
    println!();
}

/// Health check status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Ok,
    Warning,
    Error,
    Unknown,
}

/// Print the signed-in identity.
pub fn identity(identity: &Identity) {
    kv("  User", &format!("{} ({})", identity.display_name, identity.id.0));
    kv("  Role", identity.role.as_str());
    if let Some(email) = &identity.email {
        kv("  E-mail", email);
    }
    if let Some(progression) = &identity.progression {
        kv("  Progression", &progression.to_string());
    }
}

/// Print an access decision for a view.
pub fn decision(view: &View, decision: &GuardDecision) {
    match decision {
        GuardDecision::Allow => success(&format!("{} is allowed", view.path())),
        GuardDecision::Redirect(target) => warning(&format!(
            "{} redirects to {}",
            view.path(),
            style(target.path()).bold()
        )),
        GuardDecision::Pending => info(&format!("{} is waiting for the session", view.path())),
    }
}
