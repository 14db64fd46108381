//! Kite REST API access.
//!
//! [`RequestExecutor`] is the single path to the network: it applies the
//! endpoint throttle, attaches the session credential, classifies responses
//! and retries rate limit rejections until the penalty threshold. [`KiteClient`]
//! is a thin layer of endpoint wrappers on top of it.
//!
//! ```rust,ignore
//! use kite_api_client::rest::{KiteClient, Request};
//!
//! // Typed wrapper
//! let holdings = client.holdings().await?;
//!
//! // Any endpoint through the executor
//! let payload = client
//!     .executor()
//!     .execute("default", &Request::get("/portfolio/holdings"))
//!     .await?;
//! ```

mod client;
pub mod constants;
pub mod endpoints;
pub(crate) mod executor;
pub(crate) mod transport;

pub use client::{KiteClient, KiteClientBuilder};
pub use executor::{
    DEFAULT_PENALTY_BACKOFF, Payload, Request, RequestExecutor, RequestExecutorBuilder,
    ResponseClass,
};
pub use transport::{DEFAULT_TIMEOUT, DEFAULT_TRANSPORT_RETRIES, GatewayRetryStrategy};
