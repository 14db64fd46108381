//! # Kite Client
//!
//! An async Rust client for the Zerodha Kite Connect REST API.
//!
//! ## Features
//!
//! - Per-category rate limiting with simultaneous per-second and per-minute ceilings
//! - Automatic retry of rate limit rejections, bounded by a session-wide penalty threshold
//! - Session management for both login paths (web login and token exchange)
//! - Saved web sessions, so a restarted process can skip the interactive login
//! - Typed errors for every failure class
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use kite_api_client::auth::{ConsolePrompt, SessionManager, SessionStore};
//! use kite_api_client::rest::KiteClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Arc::new(
//!         SessionManager::builder()
//!             .user_id("AB1234")
//!             .store(SessionStore::new(".kite"))
//!             .provider(Arc::new(ConsolePrompt))
//!             .build()?,
//!     );
//!     session.ensure_authenticated().await?;
//!
//!     let client = KiteClient::builder(session).build()?;
//!     let ltp = client.ltp(&["NSE:INFY"]).await?;
//!     println!("LTP: {:?}", ltp);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod error;
pub mod rate_limit;
pub mod rest;

// Re-export commonly used types at crate root
pub use error::ClientError;

/// Result type alias using ClientError
pub type Result<T> = std::result::Result<T, ClientError>;
