//! Secrets handling.
//!
//! - `AccessToken` / `RefreshToken`: wrappers that prevent accidental logging
//! - `Sealer`: AES-256-GCM sealing of values at rest
//! - `StoreKey`: per-installation key for the credential store
//! - `scrub_secrets`: Redact secrets from error messages

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use secrecy::{ExposeSecret, SecretBox};
use std::io::Write;
use std::path::Path;
use thiserror::Error;
use zeroize::Zeroize;

/// Length of the AES-GCM nonce prepended to every sealed value.
const NONCE_LEN: usize = 12;

/// Errors from secret handling.
#[derive(Error, Debug)]
pub enum SecretError {
    /// IO error reading/writing the key file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Encryption/decryption failed.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Invalid UTF-8 in decrypted data.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Key file exists but does not hold a 32-byte hex key.
    #[error("Invalid store key: {0}")]
    InvalidKey(String),
}

macro_rules! secret_token {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name(SecretBox<str>);

        impl $name {
            /// Wrap a raw credential.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(SecretBox::new(value.into().into_boxed_str()))
            }

            /// Expose the secret for actual API calls.
            ///
            /// Use sparingly - only when actually sending to a server or store.
            #[must_use]
            pub fn expose(&self) -> &str {
                self.0.expose_secret()
            }

            /// Compare two credentials by value.
            #[must_use]
            pub fn same_as(&self, other: &Self) -> bool {
                self.expose() == other.expose()
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!(stringify!($name), "([REDACTED])"))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "[REDACTED]")
            }
        }
    };
}

secret_token!(
    /// Short-lived credential attached to every API call.
    AccessToken
);

secret_token!(
    /// Longer-lived credential used only to obtain a new access token.
    RefreshToken
);

/// 32-byte key used to seal credential store values.
pub struct StoreKey(SecretBox<[u8; 32]>);

impl StoreKey {
    /// Wrap raw key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(SecretBox::new(Box::new(bytes)))
    }

    /// Generate a random key.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_bytes(rand::random())
    }

    /// Parse a hex-encoded key.
    ///
    /// # Errors
    ///
    /// Returns error if the input is not 64 hex characters.
    pub fn from_hex(hex_key: &str) -> Result<Self, SecretError> {
        let mut decoded =
            hex::decode(hex_key.trim()).map_err(|e| SecretError::InvalidKey(e.to_string()))?;
        if decoded.len() != 32 {
            let len = decoded.len();
            decoded.zeroize();
            return Err(SecretError::InvalidKey(format!("expected 32 bytes, got {len}")));
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self::from_bytes(bytes))
    }

    /// Load the key at `path`, creating it with a fresh random key if absent.
    ///
    /// The file is created with restrictive permissions (0600 on Unix) and
    /// is never replaced if it appears concurrently.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read/written or holds an invalid key.
    pub fn load_or_generate(path: &Path) -> Result<Self, SecretError> {
        if path.exists() {
            let mut content = std::fs::read_to_string(path)?;
            let key = Self::from_hex(&content);
            content.zeroize();
            return key;
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let key = Self::generate();
        let mut encoded = hex::encode(key.0.expose_secret());
        let written = write_private(path, encoded.as_bytes());
        encoded.zeroize();
        written?;

        tracing::info!(path = %path.display(), "Generated new credential store key");
        Ok(key)
    }
}

/// Create `path` readable by the owner only and write `contents` to it.
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

impl std::fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StoreKey([REDACTED])")
    }
}

/// Authenticated encryption of values at rest.
///
/// Uses AES-256-GCM; the random nonce is prepended to the ciphertext.
pub struct Sealer {
    key: StoreKey,
}

impl Sealer {
    /// Create a sealer for the given key.
    #[must_use]
    pub const fn new(key: StoreKey) -> Self {
        Self { key }
    }

    /// Encrypt data with AES-256-GCM.
    ///
    /// # Errors
    ///
    /// Returns error if encryption fails.
    pub fn seal(&self, data: &[u8]) -> Result<Vec<u8>, SecretError> {
        let cipher = Aes256Gcm::new(self.key.0.expose_secret().into());

        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, data)
            .map_err(|e| SecretError::Crypto(e.to_string()))?;

        Ok([nonce_bytes.as_slice(), &ciphertext].concat())
    }

    /// Decrypt data produced by [`Sealer::seal`].
    ///
    /// # Errors
    ///
    /// Returns error if the data is truncated or fails authentication.
    pub fn open(&self, data: &[u8]) -> Result<Vec<u8>, SecretError> {
        if data.len() < NONCE_LEN {
            return Err(SecretError::Crypto("Data too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(self.key.0.expose_secret().into());
        let nonce = Nonce::from_slice(nonce_bytes);

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| SecretError::Crypto(e.to_string()))
    }

    /// Decrypt into a string, clearing the intermediate buffer.
    ///
    /// # Errors
    ///
    /// Returns error if decryption fails or the plaintext is not UTF-8.
    pub fn open_string(&self, data: &[u8]) -> Result<String, SecretError> {
        let mut decrypted = self.open(data)?;
        let text = String::from_utf8(decrypted.clone());
        decrypted.zeroize();
        Ok(text?)
    }
}

impl std::fmt::Debug for Sealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sealer").finish_non_exhaustive()
    }
}

/// Scrub secrets from error messages and logs.
///
/// Replaces values after known secret patterns with `[REDACTED]`.
#[must_use]
pub fn scrub_secrets(text: &str, patterns: &[&str]) -> String {
    let mut result = text.to_string();

    for pattern in patterns {
        let mut search_start = 0;
        while let Some(start) = result[search_start..].find(pattern) {
            let abs_start = search_start + start + pattern.len();

            // Value ends at whitespace, a quote, or a separator
            let end = result[abs_start..]
                .find(|c: char| c.is_whitespace() || c == '"' || c == '\'' || c == '&' || c == ',')
                .map_or(result.len(), |e| abs_start + e);

            result.replace_range(abs_start..end, "[REDACTED]");

            search_start = abs_start + "[REDACTED]".len();
        }
    }

    result
}

/// Secret patterns that show up in identity-provider responses.
pub const COMMON_SECRET_PATTERNS: &[&str] = &[
    "token=",
    "password=",
    "secret=",
    "\"token\":\"",
    "\"access_token\":\"",
    "\"refresh_token\":\"",
    "\"password\":\"",
    "Authorization: Bearer ",
];
