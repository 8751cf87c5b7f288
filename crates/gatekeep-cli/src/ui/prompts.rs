//! Interactive prompt utilities.

use dialoguer::{Input, Password, theme::ColorfulTheme};
use gatekeep_core::validation::{validate_identifier, validate_secret};

/// Get the default colorful theme.
fn theme() -> ColorfulTheme {
    ColorfulTheme::default()
}

/// Prompt for an e-mail, re-asking until it passes login validation.
pub fn identifier(prompt: &str) -> Result<String, dialoguer::Error> {
    Input::with_theme(&theme())
        .with_prompt(prompt)
        .validate_with(|input: &String| validate_identifier(input).map(|_| ()))
        .interact_text()
}

/// Prompt for a password (hidden input), re-asking while it is empty or
/// too long.
pub fn password(prompt: &str) -> Result<String, dialoguer::Error> {
    Password::with_theme(&theme())
        .with_prompt(prompt)
        .validate_with(|input: &String| validate_secret(input))
        .interact()
}

/// Fill in whichever login fields were not given on the command line.
pub fn login_credentials(
    identifier: Option<String>,
    secret: Option<String>,
) -> Result<(String, String), dialoguer::Error> {
    let identifier = match identifier {
        Some(identifier) => identifier,
        None => self::identifier("E-mail")?,
    };
    let secret = match secret {
        Some(secret) => secret,
        None => password("Password")?,
    };
    Ok((identifier, secret))
}
