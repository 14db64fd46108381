//! Session management: login, token exchange, persistence and invalidation.
//!
//! A [`SessionManager`] owns the one credential used by every request of a
//! client. It moves through three states:
//!
//! ```text
//! Unauthenticated -> Authenticating -> Authenticated
//!        ^                                   |
//!        +---------- invalidate() -----------+
//! ```
//!
//! The manager never logs in again on its own after an invalidation. The
//! interactive login may need a human, so the caller decides when to call
//! [`SessionManager::login`] or [`SessionManager::ensure_authenticated`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use kite_api_client::auth::{ConsolePrompt, SessionManager, SessionStore};
//!
//! # async fn run() -> kite_api_client::Result<()> {
//! let session = SessionManager::builder()
//!     .user_id("AB1234")
//!     .store(SessionStore::new(".kite"))
//!     .provider(Arc::new(ConsolePrompt))
//!     .build()?;
//!
//! // Reuses the saved token when present, prompts otherwise.
//! session.ensure_authenticated().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::auth::{Credential, CredentialProvider, SessionStore, exchange_checksum};
use crate::error::ClientError;
use crate::rest::endpoints::{self, API_VERSION, KITE_API_URL, KITE_LOGIN_URL, VERSION_HEADER};
use crate::rest::executor::{ResponseClass, error_message};
use crate::rest::transport::{DEFAULT_TIMEOUT, build_reqwest, transport_error};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No usable credential.
    Unauthenticated,
    /// A login or token exchange is in progress and no credential is held.
    Authenticating,
    /// A credential is available.
    Authenticated,
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    credential: Option<Credential>,
    user_id: Option<String>,
}

/// Owner of the session credential.
///
/// Shared between tasks behind an `Arc`; all state changes happen under the
/// manager's own lock.
pub struct SessionManager {
    http: reqwest::Client,
    login_base_url: String,
    api_base_url: String,
    store: Option<SessionStore>,
    provider: Option<Arc<dyn CredentialProvider>>,
    inner: RwLock<Inner>,
    login_lock: Mutex<()>,
    invalidations: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    request_id: String,
    twofa_type: String,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    access_token: String,
    #[serde(default)]
    user_id: Option<String>,
}

impl SessionManager {
    /// Create a new session manager builder.
    pub fn builder() -> SessionManagerBuilder {
        SessionManagerBuilder::new()
    }

    /// The credential to attach to the next request.
    ///
    /// Fails with [`ClientError::SessionExpired`] while unauthenticated.
    pub async fn current_credential(&self) -> Result<Credential, ClientError> {
        self.inner
            .read()
            .await
            .credential
            .clone()
            .ok_or(ClientError::SessionExpired)
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SessionState {
        self.inner.read().await.state
    }

    /// Whether a credential is available.
    pub async fn is_authenticated(&self) -> bool {
        self.state().await == SessionState::Authenticated
    }

    /// The account the session belongs to, when known.
    pub async fn user_id(&self) -> Option<String> {
        self.inner.read().await.user_id.clone()
    }

    /// Number of times the session has been invalidated.
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::SeqCst)
    }

    /// Forget the credential and delete its saved copy.
    ///
    /// Every later [`current_credential`](Self::current_credential) call fails
    /// until a new login completes. Exchanged tokens are never persisted, so
    /// their invalidation leaves the store alone.
    pub async fn invalidate(&self) {
        let mut inner = self.inner.write().await;
        let cleared = inner.credential.take();
        inner.state = SessionState::Unauthenticated;
        self.invalidations.fetch_add(1, Ordering::SeqCst);

        let persisted = !matches!(cleared, Some(Credential::ExchangeToken { .. }));
        if let (true, Some(store), Some(user_id)) = (persisted, &self.store, &inner.user_id) {
            if let Err(e) = store.remove(user_id) {
                warn!(user_id = %user_id, error = %e, "Failed to remove saved session");
            }
        }

        info!("Session invalidated");
    }

    /// Return immediately if authenticated, otherwise run the interactive login.
    ///
    /// Concurrent callers share a single login.
    pub async fn ensure_authenticated(&self) -> Result<Credential, ClientError> {
        if let Ok(credential) = self.current_credential().await {
            return Ok(credential);
        }

        let _guard = self.login_lock.lock().await;
        if let Ok(credential) = self.current_credential().await {
            return Ok(credential);
        }
        self.login_locked().await
    }

    /// Run the interactive login, replacing any current credential.
    ///
    /// A failed login leaves the current credential in place.
    ///
    /// Input comes from the configured [`CredentialProvider`]. On success the
    /// web token is kept in memory and saved to the store when one is set.
    pub async fn login(&self) -> Result<Credential, ClientError> {
        let _guard = self.login_lock.lock().await;
        self.login_locked().await
    }

    /// Exchange a one-time request token for an access token.
    ///
    /// The resulting credential is held in memory only.
    pub async fn exchange_token(
        &self,
        api_key: &str,
        api_secret: &SecretString,
        request_token: &str,
    ) -> Result<Credential, ClientError> {
        let _guard = self.login_lock.lock().await;
        self.begin_authenticating().await;

        let result = self.request_access_token(api_key, api_secret, request_token).await;
        match result {
            Ok((credential, user_id)) => {
                let mut inner = self.inner.write().await;
                inner.credential = Some(credential.clone());
                inner.state = SessionState::Authenticated;
                if user_id.is_some() {
                    inner.user_id = user_id;
                }
                info!("Access token exchange succeeded");
                Ok(credential)
            }
            Err(e) => {
                self.abort_authenticating().await;
                Err(e)
            }
        }
    }

    /// A held credential stays usable, and reported, while a new one is fetched.
    async fn begin_authenticating(&self) {
        let mut inner = self.inner.write().await;
        if inner.credential.is_none() {
            inner.state = SessionState::Authenticating;
        }
    }

    /// Fall back to whatever credential is still held after a failed attempt.
    async fn abort_authenticating(&self) {
        let mut inner = self.inner.write().await;
        inner.state = if inner.credential.is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        };
    }

    /// Caller must hold `login_lock`.
    async fn login_locked(&self) -> Result<Credential, ClientError> {
        let provider = self.provider.clone().ok_or_else(|| {
            ClientError::Auth("No credential provider configured for interactive login".into())
        })?;

        self.begin_authenticating().await;

        match self.web_login(provider).await {
            Ok((user_id, token)) => {
                if let Some(store) = &self.store {
                    if let Err(e) = store.save(&user_id, &token) {
                        warn!(user_id = %user_id, error = %e, "Failed to save session");
                    }
                }

                let credential = Credential::WebToken(token);
                let mut inner = self.inner.write().await;
                inner.credential = Some(credential.clone());
                inner.user_id = Some(user_id.clone());
                inner.state = SessionState::Authenticated;
                info!(user_id = %user_id, "Authorization success");
                Ok(credential)
            }
            Err(e) => {
                warn!(error = %e, "Login failed");
                self.abort_authenticating().await;
                Err(e)
            }
        }
    }

    async fn web_login(
        &self,
        provider: Arc<dyn CredentialProvider>,
    ) -> Result<(String, SecretString), ClientError> {
        let user_id = match self.user_id().await {
            Some(user_id) => user_id,
            None => ask(&provider, |p| p.user_id()).await?,
        };
        let password = ask(&provider, |p| p.password()).await?;

        let url = format!("{}{}", self.login_base_url, endpoints::login::LOGIN);
        let response = self
            .http
            .post(&url)
            .form(&[
                ("user_id", user_id.as_str()),
                ("password", password.expose_secret()),
            ])
            .send()
            .await
            .map_err(transport_error)?;
        let body = check_login_response(response, "Login").await?;
        let login: DataEnvelope<LoginData> = serde_json::from_slice(&body)
            .map_err(|e| ClientError::Auth(format!("Login | unexpected response: {e}")))?;
        let LoginData {
            request_id,
            twofa_type,
            user_id: confirmed_user_id,
        } = login.data;
        let user_id = confirmed_user_id.unwrap_or(user_id);

        debug!(user_id = %user_id, twofa_type = %twofa_type, "Password accepted");
        let prompt_type = twofa_type.clone();
        let twofa = ask(&provider, move |p| p.twofa(&prompt_type)).await?;

        let url = format!("{}{}", self.login_base_url, endpoints::login::TWOFA);
        let response = self
            .http
            .post(&url)
            .form(&[
                ("user_id", user_id.as_str()),
                ("request_id", request_id.as_str()),
                ("twofa_value", twofa.as_str()),
                ("twofa_type", twofa_type.as_str()),
                ("skip_session", ""),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let enctoken = response
            .cookies()
            .find(|c| c.name() == endpoints::login::ENCTOKEN_COOKIE)
            .map(|c| c.value().to_string());
        check_login_response(response, "TwoFA").await?;

        let enctoken = enctoken
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ClientError::Auth("TwoFA | response did not set an enctoken".into()))?;
        Ok((user_id, SecretString::from(enctoken)))
    }

    async fn request_access_token(
        &self,
        api_key: &str,
        api_secret: &SecretString,
        request_token: &str,
    ) -> Result<(Credential, Option<String>), ClientError> {
        let checksum = exchange_checksum(api_key, request_token, api_secret);
        let url = format!("{}{}", self.api_base_url, endpoints::session::TOKEN);
        let response = self
            .http
            .post(&url)
            .header(VERSION_HEADER, API_VERSION)
            .form(&[
                ("api_key", api_key),
                ("request_token", request_token),
                ("checksum", checksum.as_str()),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let body = check_login_response(response, "Token exchange").await?;
        let token: DataEnvelope<TokenData> = serde_json::from_slice(&body).map_err(|e| {
            ClientError::Auth(format!("Token exchange | unexpected response: {e}"))
        })?;

        Ok((
            Credential::exchange_token(api_key, token.data.access_token),
            token.data.user_id,
        ))
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("login_base_url", &self.login_base_url)
            .field("api_base_url", &self.api_base_url)
            .field("store", &self.store)
            .field("has_provider", &self.provider.is_some())
            .finish()
    }
}

/// Run a provider call on the blocking pool.
async fn ask<T, F>(provider: &Arc<dyn CredentialProvider>, f: F) -> Result<T, ClientError>
where
    T: Send + 'static,
    F: FnOnce(&dyn CredentialProvider) -> Result<T, ClientError> + Send + 'static,
{
    let provider = provider.clone();
    tokio::task::spawn_blocking(move || f(provider.as_ref()))
        .await
        .map_err(|e| ClientError::Auth(format!("Credential provider failed: {e}")))?
}

/// Return the body of a successful login response, or the matching error.
async fn check_login_response(
    response: reqwest::Response,
    hint: &str,
) -> Result<Vec<u8>, ClientError> {
    let status = response.status();
    let body = response.bytes().await.map_err(transport_error)?.to_vec();

    match ResponseClass::of(status, &body) {
        ResponseClass::Success => Ok(body),
        ResponseClass::BadRequest | ResponseClass::AuthExpired => Err(ClientError::Auth(format!(
            "{hint} | {}: {}",
            status.as_u16(),
            error_message(status, &body)
        ))),
        ResponseClass::ServerError => Err(ClientError::ServerError {
            status,
            message: format!("{hint} | {}", error_message(status, &body)),
        }),
        ResponseClass::RateLimited | ResponseClass::Other => Err(ClientError::Auth(format!(
            "{hint} | {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("unexpected status")
        ))),
    }
}

/// Builder for [`SessionManager`].
pub struct SessionManagerBuilder {
    user_id: Option<String>,
    credential: Option<Credential>,
    store: Option<SessionStore>,
    provider: Option<Arc<dyn CredentialProvider>>,
    login_base_url: String,
    api_base_url: String,
    timeout: Duration,
}

impl SessionManagerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            user_id: None,
            credential: None,
            store: None,
            provider: None,
            login_base_url: KITE_LOGIN_URL.to_string(),
            api_base_url: KITE_API_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the account identity. Used to find the saved session and skip
    /// the user id prompt.
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Start authenticated with an existing web token.
    pub fn web_token(mut self, enctoken: impl Into<String>) -> Self {
        if !matches!(self.credential, Some(Credential::ExchangeToken { .. })) {
            self.credential = Some(Credential::web_token(enctoken));
        }
        self
    }

    /// Start authenticated with an existing exchanged access token.
    ///
    /// Takes precedence over [`web_token`](Self::web_token).
    pub fn exchange_token(
        mut self,
        api_key: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        self.credential = Some(Credential::exchange_token(api_key, access_token));
        self
    }

    /// Persist web tokens in `store`.
    pub fn store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the login input provider.
    pub fn provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the web login base URL (useful for testing with a mock server).
    pub fn login_base_url(mut self, url: impl Into<String>) -> Self {
        self.login_base_url = url.into();
        self
    }

    /// Set the API base URL used for the token exchange.
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Set the timeout for login requests.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the manager.
    ///
    /// An explicit token wins; otherwise a saved session for the configured
    /// user is loaded. Anything else starts unauthenticated.
    pub fn build(self) -> Result<SessionManager, ClientError> {
        let login_base_url = normalize_base(&self.login_base_url)?;
        let api_base_url = normalize_base(&self.api_base_url)?;

        let credential = match self.credential {
            Some(credential) => Some(credential),
            None => match (&self.store, &self.user_id) {
                (Some(store), Some(user_id)) => match store.load(user_id) {
                    Ok(Some(saved)) => {
                        debug!(user_id = %user_id, "Restored saved session");
                        Some(Credential::WebToken(saved.enctoken))
                    }
                    Ok(None) => None,
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "Ignoring unreadable saved session");
                        None
                    }
                },
                _ => None,
            },
        };

        let state = if credential.is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        };

        Ok(SessionManager {
            http: build_reqwest(self.timeout, None)?,
            login_base_url,
            api_base_url,
            store: self.store,
            provider: self.provider,
            inner: RwLock::new(Inner {
                state,
                credential,
                user_id: self.user_id,
            }),
            login_lock: Mutex::new(()),
            invalidations: AtomicU64::new(0),
        })
    }
}

impl Default for SessionManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_base(url: &str) -> Result<String, ClientError> {
    Ok(url::Url::parse(url)?.as_str().trim_end_matches('/').to_string())
}
