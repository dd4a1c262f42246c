//! StreamTweaks Auth - Twitch OAuth implicit grant.
//!
//! Provides:
//! - A local redirect listener that captures query and fragment redirects
//! - Token validation against the provider (client identity and scopes)
//! - A file-backed credential cache

pub mod credentials;
pub mod listener;
pub mod oauth;

pub use credentials::{CredentialStore, FileCredentialStore, StoredCredentials};
pub use listener::{CallbackHandler, CallbackListener};
pub use oauth::{AuthResult, OAuthClient, TokenValidation, ValidateResult};
