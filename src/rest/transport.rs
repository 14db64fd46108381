//! HTTP transport shared by every request.
//!
//! `reqwest` wrapped in middleware with a tracing span per request, plus the
//! retry rules for failures that never reached the API logic (gateway
//! errors, refused connections, read timeouts). The executor applies those
//! rules itself so every attempt passes through the throttle. Rate limit
//! rejections are not transport failures; the penalty loop owns them.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{
    RetryError, Retryable, RetryableStrategy, default_on_request_failure,
    policies::ExponentialBackoff,
};
use reqwest_tracing::TracingMiddleware;

use crate::error::ClientError;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default number of transport-level retries.
pub const DEFAULT_TRANSPORT_RETRIES: u32 = 3;

/// Retries only gateway failures and connection-level errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct GatewayRetryStrategy;

impl RetryableStrategy for GatewayRetryStrategy {
    fn handle(
        &self,
        res: &Result<reqwest::Response, reqwest_middleware::Error>,
    ) -> Option<Retryable> {
        match res {
            Ok(response) => match response.status() {
                StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT => Some(Retryable::Transient),
                _ => None,
            },
            Err(error) => default_on_request_failure(error),
        }
    }
}

/// Build a plain `reqwest` client with the crate's defaults.
pub(crate) fn build_reqwest(
    timeout: Duration,
    user_agent: Option<&str>,
) -> Result<reqwest::Client, ClientError> {
    let mut headers = HeaderMap::new();
    let user_agent = user_agent
        .map(str::to_string)
        .unwrap_or_else(|| format!("kite-api-client/{}", env!("CARGO_PKG_VERSION")));
    let header_value = HeaderValue::from_str(&user_agent)
        .unwrap_or_else(|_| HeaderValue::from_static("kite-api-client"));
    headers.insert(USER_AGENT, header_value);

    let client = reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    Ok(client)
}

/// Build the middleware client used by the request executor.
pub(crate) fn build_http_client(
    timeout: Duration,
    user_agent: Option<&str>,
) -> Result<ClientWithMiddleware, ClientError> {
    let reqwest_client = build_reqwest(timeout, user_agent)?;

    Ok(ClientBuilder::new(reqwest_client)
        .with(TracingMiddleware::default())
        .build())
}

/// Back-off schedule for transport retries.
pub(crate) fn retry_policy(max_retries: u32) -> ExponentialBackoff {
    ExponentialBackoff::builder()
        .retry_bounds(Duration::from_millis(100), Duration::from_secs(2))
        .build_with_max_retries(max_retries)
}

/// Map a transport failure to the crate's error surface.
pub(crate) fn transport_error(error: reqwest::Error) -> ClientError {
    if error.is_timeout() {
        ClientError::Timeout
    } else if error.is_connect() || error.is_request() || error.is_body() {
        ClientError::NetworkError(error.to_string())
    } else {
        ClientError::Http(error)
    }
}

/// Same as [`transport_error`], looking through the retry layer's wrapper.
pub(crate) fn middleware_error(error: reqwest_middleware::Error) -> ClientError {
    match error {
        reqwest_middleware::Error::Reqwest(error) => transport_error(error),
        other => match inner_reqwest(&other) {
            Some(e) if e.is_timeout() => ClientError::Timeout,
            Some(e) if e.is_connect() || e.is_request() || e.is_body() => {
                ClientError::NetworkError(other.to_string())
            }
            _ => ClientError::HttpMiddleware(other),
        },
    }
}

fn inner_reqwest(error: &reqwest_middleware::Error) -> Option<&reqwest::Error> {
    match error {
        reqwest_middleware::Error::Reqwest(e) => Some(e),
        reqwest_middleware::Error::Middleware(e) => match e.downcast_ref::<RetryError>()? {
            RetryError::WithRetries { err, .. } | RetryError::Error(err) => inner_reqwest(err),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_respects_max_retries() {
        use reqwest_retry::{RetryDecision, RetryPolicy};

        let policy = retry_policy(2);
        let start = std::time::SystemTime::now();
        assert!(matches!(policy.should_retry(start, 0), RetryDecision::Retry { .. }));
        assert!(matches!(policy.should_retry(start, 1), RetryDecision::Retry { .. }));
        assert!(matches!(policy.should_retry(start, 2), RetryDecision::DoNotRetry));
        assert!(matches!(retry_policy(0).should_retry(start, 0), RetryDecision::DoNotRetry));
    }

    #[test]
    fn test_non_transport_middleware_error_is_kept() {
        let error = reqwest_middleware::Error::middleware(std::io::Error::other("boom"));
        assert!(matches!(
            middleware_error(error),
            ClientError::HttpMiddleware(_)
        ));
    }
}
