//! Authentication module for the Kite API.
//!
//! This module provides:
//! - The session credential (web token or exchanged access token) with secure secret storage
//! - Injectable login input providers
//! - The token exchange checksum
//! - On-disk persistence of web sessions
//! - The [`SessionManager`] that ties them together

mod checksum;
mod credentials;
mod session;
mod store;

pub use checksum::exchange_checksum;
pub use credentials::{
    ConsolePrompt, Credential, CredentialProvider, EnvCredentialProvider,
    StaticCredentialProvider,
};
pub use session::{SessionManager, SessionManagerBuilder, SessionState};
pub use store::{SessionStore, StoredSession};
