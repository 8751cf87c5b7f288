//! Login input validation and sanitization.
//!
//! Runs before any network call, so malformed input never reaches the
//! identity provider and never changes session state.

use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Validation error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Input exceeds maximum allowed length.
    #[error("{field} exceeds maximum length ({max} bytes, got {actual})")]
    TooLong {
        /// Field that failed.
        field: &'static str,
        /// Maximum allowed length.
        max: usize,
        /// Actual input length.
        actual: usize,
    },

    /// Required input is empty.
    #[error("{0} is required")]
    Empty(&'static str),

    /// Disallowed characters in input.
    #[error("Disallowed characters in {0}")]
    DisallowedChars(&'static str),

    /// Looks like an e-mail address but is not a valid one.
    #[error("Malformed e-mail address")]
    MalformedEmail,
}

/// Size limits per input type.
pub mod limits {
    /// Maximum identifier length (RFC 5321 path limit).
    pub const MAX_IDENTIFIER_LENGTH: usize = 254;

    /// Maximum secret length.
    pub const MAX_SECRET_LENGTH: usize = 1024;
}

/// Validate and normalize a login identifier.
///
/// Performs:
/// 1. Trim surrounding whitespace, reject empty input
/// 2. Reject control characters
/// 3. Unicode normalization (NFKC)
/// 4. Lower-case e-mail addresses and check their basic shape
/// 5. Length check on the normalized result
///
/// # Errors
///
/// Returns a `ValidationError` describing the first failed check.
pub fn validate_identifier(input: &str) -> Result<String, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty("identifier"));
    }

    if trimmed.chars().any(char::is_control) {
        return Err(ValidationError::DisallowedChars("identifier"));
    }

    let normalized: String = trimmed.nfkc().collect();
    let identifier = if normalized.contains('@') {
        normalized.to_lowercase()
    } else {
        normalized
    };

    if identifier.len() > limits::MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::TooLong {
            field: "identifier",
            max: limits::MAX_IDENTIFIER_LENGTH,
            actual: identifier.len(),
        });
    }

    if identifier.contains('@') {
        check_email_shape(&identifier)?;
    }
    Ok(identifier)
}

/// Validate a login secret. The secret is never normalized or trimmed.
///
/// # Errors
///
/// Returns `ValidationError::Empty` or `ValidationError::TooLong`.
pub fn validate_secret(secret: &str) -> Result<(), ValidationError> {
    if secret.is_empty() {
        return Err(ValidationError::Empty("secret"));
    }

    if secret.len() > limits::MAX_SECRET_LENGTH {
        return Err(ValidationError::TooLong {
            field: "secret",
            max: limits::MAX_SECRET_LENGTH,
            actual: secret.len(),
        });
    }

    Ok(())
}

fn check_email_shape(email: &str) -> Result<(), ValidationError> {
    let mut parts = email.splitn(2, '@');
    let local = parts.next().unwrap_or_default();
    let domain = parts.next().unwrap_or_default();

    let domain_ok = !domain.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.');

    if local.is_empty() || !domain_ok || email.chars().any(char::is_whitespace) {
        return Err(ValidationError::MalformedEmail);
    }

    Ok(())
}
