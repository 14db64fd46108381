//! The request executor: throttle, authenticate, send, classify.
//!
//! Every API call goes through [`RequestExecutor::execute`]:
//!
//! 1. Refuse immediately if the penalty breaker has tripped.
//! 2. Wait for a slot in the endpoint category's throttle, then check the
//!    breaker again.
//! 3. Attach the session credential.
//! 4. Send with a finite timeout. Gateway errors and connection failures go
//!    back to step 1 after an exponential back-off, up to the transport
//!    retry limit.
//! 5. Classify the response. A 429 is recorded as a penalty and the call
//!    goes back to step 1 after a short back-off; everything else is
//!    returned to the caller.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use kite_api_client::auth::SessionManager;
//! use kite_api_client::rest::{Request, RequestExecutor};
//!
//! # async fn run() -> kite_api_client::Result<()> {
//! let session = Arc::new(SessionManager::builder().web_token("enctoken").build()?);
//! let executor = RequestExecutor::builder(session).build()?;
//!
//! let payload = executor
//!     .execute("default", &Request::get("/user/profile"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use reqwest_retry::{RetryDecision, RetryPolicy, Retryable, RetryableStrategy};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::auth::{Credential, SessionManager};
use crate::error::{ApiError, ClientError, error_types};
use crate::rate_limit::{EndpointThrottle, PenaltyTracker, ThrottleConfig};
use crate::rest::endpoints::{API_VERSION, KITE_API_URL, VERSION_HEADER};
use crate::rest::transport::{
    DEFAULT_TIMEOUT, DEFAULT_TRANSPORT_RETRIES, GatewayRetryStrategy, build_http_client,
    middleware_error, retry_policy, transport_error,
};

/// Default pause after a 429 before going back to the throttle.
pub const DEFAULT_PENALTY_BACKOFF: Duration = Duration::from_secs(1);

/// An outbound API request. The body is opaque to the executor.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    form: Vec<(String, String)>,
}

impl Request {
    /// Create a request for `path` (relative to the API base URL).
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            form: Vec::new(),
        }
    }

    /// GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// POST request.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// PUT request.
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// DELETE request.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a query parameter. Repeated keys are kept.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Append a form field to the URL-encoded body.
    pub fn form(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.push((key.into(), value.into()));
        self
    }

    /// Append several form fields.
    pub fn form_pairs<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.form
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path relative to the base URL.
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Raw successful response body.
#[derive(Debug, Clone)]
pub struct Payload {
    status: StatusCode,
    body: Vec<u8>,
}

impl Payload {
    /// HTTP status of the response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Raw body bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    /// Take ownership of the body.
    pub fn into_bytes(self) -> Vec<u8> {
        self.body
    }

    /// Body as UTF-8 text.
    pub fn text(&self) -> Result<&str, ClientError> {
        std::str::from_utf8(&self.body)
            .map_err(|e| ClientError::InvalidResponse(format!("Body is not UTF-8: {e}")))
    }

    /// Decode the whole body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Decode the provider envelope `{"status": "success", "data": ...}` and return `data`.
    pub fn into_data<T: DeserializeOwned>(self) -> Result<T, ClientError> {
        let envelope: Envelope<T> = serde_json::from_slice(&self.body)?;
        envelope
            .data
            .ok_or_else(|| ClientError::InvalidResponse("Response missing 'data' field".into()))
    }
}

#[derive(Debug, serde::Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

/// HTTP-level classification of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// 2xx
    Success,
    /// 429
    RateLimited,
    /// 401, or 403 without a non-token exception type
    AuthExpired,
    /// Any other 4xx
    BadRequest,
    /// 5xx
    ServerError,
    /// Anything else (1xx, 3xx)
    Other,
}

impl ResponseClass {
    /// Classify a response from its status and body.
    ///
    /// The body is only consulted to tell a 403 for an expired session from
    /// a 403 for a forbidden operation.
    pub fn of(status: StatusCode, body: &[u8]) -> Self {
        match status.as_u16() {
            200..=299 => ResponseClass::Success,
            429 => ResponseClass::RateLimited,
            401 => ResponseClass::AuthExpired,
            403 => match ApiError::from_body(body).and_then(|e| e.error_type) {
                Some(kind) if kind != error_types::TOKEN => ResponseClass::BadRequest,
                _ => ResponseClass::AuthExpired,
            },
            400..=499 => ResponseClass::BadRequest,
            500..=599 => ResponseClass::ServerError,
            _ => ResponseClass::Other,
        }
    }
}

/// Provider message from an error body, falling back to the status reason.
pub(crate) fn error_message(status: StatusCode, body: &[u8]) -> String {
    ApiError::from_body(body)
        .map(|e| e.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            if status == StatusCode::BAD_REQUEST {
                "Missing or bad request parameters or values".to_string()
            } else {
                status.canonical_reason().unwrap_or("Unknown error").to_string()
            }
        })
}

/// Executes API calls under the throttle, penalty and session rules.
///
/// Cheap to clone; clones share the throttle, penalty tracker, session and
/// connection pool.
#[derive(Clone)]
pub struct RequestExecutor {
    http: ClientWithMiddleware,
    base_url: String,
    throttle: Arc<EndpointThrottle>,
    penalties: Arc<PenaltyTracker>,
    session: Arc<SessionManager>,
    penalty_backoff: Duration,
    max_transport_retries: u32,
}

impl RequestExecutor {
    /// Create a builder around an existing session.
    pub fn builder(session: Arc<SessionManager>) -> RequestExecutorBuilder {
        RequestExecutorBuilder::new(session)
    }

    /// Execute a request for an endpoint `category`.
    ///
    /// Returns `Ok(None)` for unrecognised status codes.
    pub async fn execute(
        &self,
        category: &str,
        request: &Request,
    ) -> Result<Option<Payload>, ClientError> {
        self.execute_or_cancel(category, request, std::future::pending())
            .await
    }

    /// Like [`execute`](Self::execute), giving up with [`ClientError::Cancelled`]
    /// if `cancel` completes while the call is waiting on the throttle or
    /// backing off before a retry.
    pub async fn execute_or_cancel<F>(
        &self,
        category: &str,
        request: &Request,
        cancel: F,
    ) -> Result<Option<Payload>, ClientError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(cancel);
        let policy = retry_policy(self.max_transport_retries);
        let started = SystemTime::now();
        let mut transport_retries = 0;

        loop {
            self.penalties.check_threshold()?;
            self.throttle
                .acquire_or_cancel(category, cancel.as_mut())
                .await?;
            // The breaker may have tripped while this call waited for a slot.
            self.penalties.check_threshold()?;

            let credential = self.session.current_credential().await?;
            let outcome = self.prepare(request, &credential)?.send().await;

            if matches!(
                GatewayRetryStrategy.handle(&outcome),
                Some(Retryable::Transient)
            ) {
                if let RetryDecision::Retry { execute_after } =
                    policy.should_retry(started, transport_retries)
                {
                    transport_retries += 1;
                    let delay = execute_after
                        .duration_since(SystemTime::now())
                        .unwrap_or_default();
                    debug!(
                        category,
                        path = request.path(),
                        attempt = transport_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Transient transport failure, retrying"
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.as_mut() => return Err(ClientError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            }

            let response = outcome.map_err(middleware_error)?;
            let status = response.status();
            let body = response.bytes().await.map_err(transport_error)?.to_vec();

            match ResponseClass::of(status, &body) {
                ResponseClass::Success => {
                    return Ok(Some(Payload { status, body }));
                }
                ResponseClass::RateLimited => {
                    let penalties = self.penalties.record_rejection();
                    self.penalties.check_threshold()?;
                    debug!(
                        category,
                        path = request.path(),
                        penalties,
                        "Rate limited, retrying"
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.as_mut() => return Err(ClientError::Cancelled),
                        _ = tokio::time::sleep(self.penalty_backoff) => {}
                    }
                }
                ResponseClass::AuthExpired => {
                    warn!(
                        path = request.path(),
                        status = status.as_u16(),
                        "Session expired or invalid, must log in again"
                    );
                    self.session.invalidate().await;
                    return Err(ClientError::SessionExpired);
                }
                ResponseClass::BadRequest => {
                    return Err(ClientError::BadRequest {
                        status,
                        message: format!("{} | {}", request.path(), error_message(status, &body)),
                    });
                }
                ResponseClass::ServerError => {
                    return Err(ClientError::ServerError {
                        status,
                        message: format!("{} | {}", request.path(), error_message(status, &body)),
                    });
                }
                ResponseClass::Other => {
                    warn!(
                        path = request.path(),
                        status = status.as_u16(),
                        "Unexpected response status, returning no data"
                    );
                    return Ok(None);
                }
            }
        }
    }

    /// The shared throttle.
    pub fn throttle(&self) -> &Arc<EndpointThrottle> {
        &self.throttle
    }

    /// The shared penalty tracker.
    pub fn penalties(&self) -> &Arc<PenaltyTracker> {
        &self.penalties
    }

    /// The shared session.
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, request: &Request) -> Result<String, ClientError> {
        let query_string = serde_urlencoded::to_string(&request.query)
            .map_err(|e| ClientError::InvalidInput(e.to_string()))?;
        Ok(if query_string.is_empty() {
            format!("{}{}", self.base_url, request.path)
        } else {
            format!("{}{}?{}", self.base_url, request.path, query_string)
        })
    }

    fn prepare(
        &self,
        request: &Request,
        credential: &Credential,
    ) -> Result<RequestBuilder, ClientError> {
        let url = self.url(request)?;
        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .header(AUTHORIZATION, credential.authorization()?)
            .header(VERSION_HEADER, API_VERSION);

        if !request.form.is_empty() {
            let body = serde_urlencoded::to_string(&request.form)
                .map_err(|e| ClientError::InvalidInput(e.to_string()))?;
            builder = builder
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(body);
        }

        Ok(builder)
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("base_url", &self.base_url)
            .field("penalties", &self.penalties.count())
            .field("penalty_backoff", &self.penalty_backoff)
            .field("max_transport_retries", &self.max_transport_retries)
            .finish()
    }
}

/// Builder for [`RequestExecutor`].
pub struct RequestExecutorBuilder {
    session: Arc<SessionManager>,
    base_url: String,
    throttle: ThrottleConfig,
    timeout: Duration,
    max_transport_retries: u32,
    penalty_backoff: Duration,
    user_agent: Option<String>,
}

impl RequestExecutorBuilder {
    /// Create a new builder with default settings.
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self {
            session,
            base_url: KITE_API_URL.to_string(),
            throttle: ThrottleConfig::default(),
            timeout: DEFAULT_TIMEOUT,
            max_transport_retries: DEFAULT_TRANSPORT_RETRIES,
            penalty_backoff: DEFAULT_PENALTY_BACKOFF,
            user_agent: None,
        }
    }

    /// Set the base URL (useful for testing with a mock server).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the throttle limits and penalty threshold.
    pub fn throttle(mut self, config: ThrottleConfig) -> Self {
        self.throttle = config;
        self
    }

    /// Set the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the maximum number of retries for gateway and connection failures.
    ///
    /// Each retry waits for its own throttle slot.
    pub fn max_transport_retries(mut self, retries: u32) -> Self {
        self.max_transport_retries = retries;
        self
    }

    /// Set the pause after a 429 before retrying.
    pub fn penalty_backoff(mut self, backoff: Duration) -> Self {
        self.penalty_backoff = backoff;
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Build the executor.
    pub fn build(self) -> Result<RequestExecutor, ClientError> {
        let base_url = url::Url::parse(&self.base_url)?
            .as_str()
            .trim_end_matches('/')
            .to_string();
        let throttle = EndpointThrottle::new(&self.throttle)?;
        let http = build_http_client(self.timeout, self.user_agent.as_deref())?;

        Ok(RequestExecutor {
            http,
            base_url,
            throttle: Arc::new(throttle),
            penalties: Arc::new(PenaltyTracker::new(self.throttle.max_penalty_count)),
            session: self.session,
            penalty_backoff: self.penalty_backoff,
            max_transport_retries: self.max_transport_retries,
        })
    }
}
