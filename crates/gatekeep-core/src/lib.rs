//! # Gatekeep Core
//!
//! Client-side session and authorization core.
//!
//! This crate provides:
//! - An observable session state machine with durable, encrypted credential storage
//! - Startup restore and verification of a stored session
//! - Single-flight access token refresh shared by all concurrent callers
//! - Authenticated API calls with one refresh-and-retry on 401
//! - Role-based view access decisions
//! - Configuration loading and validation (JSON5 format)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod bootstrap;
pub mod client;
pub mod config;
pub mod guard;
pub mod invoker;
pub mod provider;
pub mod refresh;
pub mod secrets;
pub mod session;
pub mod store;
pub mod types;
pub mod validation;

pub use auth::{AuthError, CredentialPair};
pub use bootstrap::{BootstrapOutcome, SessionBootstrapper};
pub use client::{AuthClient, AuthClientBuilder, ClientError, LoginOutcome};
pub use config::{Config, ConfigError};
pub use guard::{AccessGuard, GuardDecision, GuardError, RouteTable};
pub use invoker::{
    ApiRequest, ApiResponse, AuthenticatedInvoker, HttpTransport, Transport, TransportError,
};
pub use provider::{HttpIdentityProvider, IdentityProvider, LoginGrant, ProviderError, RefreshGrant};
pub use refresh::{RefreshFailure, TokenRefresher};
pub use secrets::{AccessToken, RefreshToken, StoreKey, scrub_secrets};
pub use session::{AuthState, SessionSnapshot, SessionState};
pub use store::{CredentialStore, MemoryCredentialStore, SledCredentialStore, StoredSession};
pub use types::{Identity, Role, UserId, View};
pub use validation::ValidationError;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::auth::AuthError;
    pub use crate::client::{AuthClient, LoginOutcome};
    pub use crate::config::Config;
    pub use crate::guard::GuardDecision;
    pub use crate::invoker::{ApiRequest, ApiResponse};
    pub use crate::session::AuthState;
    pub use crate::types::*;
}
