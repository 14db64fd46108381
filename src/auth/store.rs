//! On-disk persistence of web session tokens.
//!
//! One JSON file per user identity, so a restarted process can skip the
//! interactive login:
//!
//! ```text
//! <dir>/<user_id>.session.json
//! {"user_id": "AB1234", "enctoken": "...", "saved_at": 1700000000}
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::ClientError;

/// A persisted web session.
#[derive(Clone)]
pub struct StoredSession {
    /// The account the token belongs to.
    pub user_id: String,
    /// The `enctoken` value.
    pub enctoken: SecretString,
    /// When the token was written.
    pub saved_at: OffsetDateTime,
}

impl std::fmt::Debug for StoredSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredSession")
            .field("user_id", &self.user_id)
            .field("enctoken", &"[REDACTED]")
            .field("saved_at", &self.saved_at)
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
struct SessionFile {
    user_id: String,
    enctoken: String,
    #[serde(with = "time::serde::timestamp")]
    saved_at: OffsetDateTime,
}

/// Directory of persisted sessions keyed by user id.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Store sessions under `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory sessions are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the session file for `user_id`.
    pub fn path_for(&self, user_id: &str) -> Result<PathBuf, ClientError> {
        let valid = !user_id.is_empty()
            && user_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(ClientError::InvalidInput(format!(
                "user id `{user_id}` cannot be used as a file name"
            )));
        }
        Ok(self.dir.join(format!("{user_id}.session.json")))
    }

    /// Write the token for `user_id`, replacing any previous file.
    pub fn save(&self, user_id: &str, enctoken: &SecretString) -> Result<(), ClientError> {
        let path = self.path_for(user_id)?;
        fs::create_dir_all(&self.dir)?;

        let file = SessionFile {
            user_id: user_id.to_string(),
            enctoken: enctoken.expose_secret().to_string(),
            saved_at: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_vec_pretty(&file)?;

        // Replace atomically: temp file, then rename.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;

        debug!(user_id, path = %path.display(), "Saved session");
        Ok(())
    }

    /// Read the token for `user_id`. A missing file yields `Ok(None)`.
    pub fn load(&self, user_id: &str) -> Result<Option<StoredSession>, ClientError> {
        let path = self.path_for(user_id)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let file: SessionFile = serde_json::from_slice(&bytes)?;
        if file.user_id != user_id {
            warn!(
                user_id,
                stored = %file.user_id,
                "Session file belongs to a different user, ignoring"
            );
            return Ok(None);
        }

        Ok(Some(StoredSession {
            user_id: file.user_id,
            enctoken: SecretString::from(file.enctoken),
            saved_at: file.saved_at,
        }))
    }

    /// Delete the token for `user_id`. Returns whether a file was removed.
    pub fn remove(&self, user_id: &str) -> Result<bool, ClientError> {
        let path = self.path_for(user_id)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(user_id, "Removed saved session");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
