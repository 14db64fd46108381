//! Credentials and login input providers.

use std::io::{BufRead, Write};

use reqwest::header::HeaderValue;
use secrecy::{ExposeSecret, SecretString};

use crate::error::ClientError;

/// The active session credential.
///
/// Kite has two login paths and each produces its own token shape. Exactly
/// one is in use at a time.
#[derive(Clone)]
pub enum Credential {
    /// Web session token (`enctoken`) from the interactive login.
    WebToken(SecretString),
    /// Access token obtained by exchanging a request token for an app key.
    ExchangeToken {
        /// The application's API key
        api_key: String,
        /// The session access token
        access_token: SecretString,
    },
}

impl Credential {
    /// Create a web token credential.
    pub fn web_token(token: impl Into<String>) -> Self {
        Credential::WebToken(SecretString::from(token.into()))
    }

    /// Create an exchange token credential.
    pub fn exchange_token(api_key: impl Into<String>, access_token: impl Into<String>) -> Self {
        Credential::ExchangeToken {
            api_key: api_key.into(),
            access_token: SecretString::from(access_token.into()),
        }
    }

    /// Value of the `Authorization` header for this credential.
    ///
    /// This method exposes the secret - use carefully.
    pub fn authorization(&self) -> Result<HeaderValue, ClientError> {
        let value = match self {
            Credential::WebToken(token) => format!("enctoken {}", token.expose_secret()),
            Credential::ExchangeToken {
                api_key,
                access_token,
            } => format!("token {}:{}", api_key, access_token.expose_secret()),
        };

        let mut header = HeaderValue::from_str(&value)
            .map_err(|_| ClientError::Auth("Token contains invalid header characters".into()))?;
        header.set_sensitive(true);
        Ok(header)
    }

    /// Short name of the credential kind, safe to log.
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::WebToken(_) => "enctoken",
            Credential::ExchangeToken { .. } => "access_token",
        }
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Credential::WebToken(a), Credential::WebToken(b)) => {
                a.expose_secret() == b.expose_secret()
            }
            (
                Credential::ExchangeToken {
                    api_key: ka,
                    access_token: ta,
                },
                Credential::ExchangeToken {
                    api_key: kb,
                    access_token: tb,
                },
            ) => ka == kb && ta.expose_secret() == tb.expose_secret(),
            _ => false,
        }
    }
}

impl Eq for Credential {}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::WebToken(_) => f.debug_tuple("WebToken").field(&"[REDACTED]").finish(),
            Credential::ExchangeToken { api_key, .. } => f
                .debug_struct("ExchangeToken")
                .field("api_key", api_key)
                .field("access_token", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Supplies the interactive login input.
///
/// Implement this trait to script the login (tests, TOTP generators, secret
/// managers). Methods may block; the session manager calls them on the
/// blocking thread pool.
pub trait CredentialProvider: Send + Sync {
    /// The account identifier.
    fn user_id(&self) -> Result<String, ClientError>;

    /// The account password.
    fn password(&self) -> Result<SecretString, ClientError>;

    /// The one-time code for the given two-factor type (e.g. `totp`, `app_code`).
    fn twofa(&self, twofa_type: &str) -> Result<String, ClientError>;
}

/// Provider returning fixed values.
#[derive(Clone)]
pub struct StaticCredentialProvider {
    user_id: String,
    password: SecretString,
    twofa: String,
}

impl StaticCredentialProvider {
    /// Create a provider from fixed login values.
    pub fn new(
        user_id: impl Into<String>,
        password: impl Into<String>,
        twofa: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            password: SecretString::from(password.into()),
            twofa: twofa.into(),
        }
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn user_id(&self) -> Result<String, ClientError> {
        Ok(self.user_id.clone())
    }

    fn password(&self) -> Result<SecretString, ClientError> {
        Ok(self.password.clone())
    }

    fn twofa(&self, _twofa_type: &str) -> Result<String, ClientError> {
        Ok(self.twofa.clone())
    }
}

impl std::fmt::Debug for StaticCredentialProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentialProvider")
            .field("user_id", &self.user_id)
            .field("password", &"[REDACTED]")
            .field("twofa", &"[REDACTED]")
            .finish()
    }
}

/// Provider that reads login values from environment variables.
///
/// By default, reads `KITE_USER_ID`, `KITE_PASSWORD` and `KITE_TWOFA`.
/// Values are read on each call so a TOTP can be refreshed between logins.
#[derive(Debug, Clone)]
pub struct EnvCredentialProvider {
    user_id_var: String,
    password_var: String,
    twofa_var: String,
}

impl EnvCredentialProvider {
    /// Use the default environment variable names.
    pub fn new() -> Self {
        Self::from_env_vars("KITE_USER_ID", "KITE_PASSWORD", "KITE_TWOFA")
    }

    /// Use custom environment variable names.
    pub fn from_env_vars(user_id_var: &str, password_var: &str, twofa_var: &str) -> Self {
        Self {
            user_id_var: user_id_var.to_string(),
            password_var: password_var.to_string(),
            twofa_var: twofa_var.to_string(),
        }
    }

    fn read(var: &str) -> Result<String, ClientError> {
        std::env::var(var)
            .map_err(|_| ClientError::Auth(format!("Environment variable {var} not set")))
    }
}

impl Default for EnvCredentialProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialProvider for EnvCredentialProvider {
    fn user_id(&self) -> Result<String, ClientError> {
        Self::read(&self.user_id_var)
    }

    fn password(&self) -> Result<SecretString, ClientError> {
        Self::read(&self.password_var).map(SecretString::from)
    }

    fn twofa(&self, _twofa_type: &str) -> Result<String, ClientError> {
        Self::read(&self.twofa_var)
    }
}

/// Provider that prompts on the terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsolePrompt;

impl ConsolePrompt {
    fn prompt(message: &str) -> Result<String, ClientError> {
        let mut stdout = std::io::stdout();
        write!(stdout, "{message}\n> ")?;
        stdout.flush()?;

        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;

        let value = line.trim().to_string();
        if value.is_empty() {
            return Err(ClientError::Auth(format!("No input for: {message}")));
        }
        Ok(value)
    }
}

impl CredentialProvider for ConsolePrompt {
    fn user_id(&self) -> Result<String, ClientError> {
        Self::prompt("Enter User id")
    }

    fn password(&self) -> Result<SecretString, ClientError> {
        Self::prompt("Enter Password").map(SecretString::from)
    }

    fn twofa(&self, twofa_type: &str) -> Result<String, ClientError> {
        Self::prompt(&format!("Please enter {twofa_type} code"))
    }
}
