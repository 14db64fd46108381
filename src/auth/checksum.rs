//! Checksum for the Kite token exchange.
//!
//! Kite's `POST /session/token` expects:
//! ```text
//! hex(SHA256(api_key + request_token + api_secret))
//! ```
//!
//! The API secret never leaves the client; only the checksum is sent.

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

/// Compute the token exchange checksum.
///
/// # Example
///
/// ```rust
/// use kite_api_client::auth::exchange_checksum;
/// use secrecy::SecretString;
///
/// let secret = SecretString::from("api_secret");
/// let checksum = exchange_checksum("api_key", "request_token", &secret);
/// assert_eq!(checksum.len(), 64);
/// ```
pub fn exchange_checksum(api_key: &str, request_token: &str, api_secret: &SecretString) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hasher.update(request_token.as_bytes());
    hasher.update(api_secret.expose_secret().as_bytes());
    hex::encode(hasher.finalize())
}
