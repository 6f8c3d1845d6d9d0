//! Durable holder of the access/refresh token pair.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Result type for session storage.
pub type Result<T> = std::result::Result<T, SessionStoreError>;

/// Errors returned while reading or writing stored tokens.
#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("failed to read session file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write session file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse session file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to encode session: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// An opaque credential string that is never printed.
#[derive(Clone)]
pub struct Token(std::sync::Arc<SecretString>);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(std::sync::Arc::new(SecretString::from(value.into())))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for Token {}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token([REDACTED])")
    }
}

/// The stored token pair. Both are present or both are absent after any
/// completed login, refresh, or logout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub access: Option<Token>,
    pub refresh: Option<Token>,
}

impl Session {
    pub fn pair(access: Token, refresh: Token) -> Self {
        Self {
            access: Some(access),
            refresh: Some(refresh),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none()
    }
}

/// Pure storage for the session; no validation logic lives here.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Session>;
    fn save(&self, session: &Session) -> Result<()>;
}

/// Session kept in process memory only.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    session: Mutex<Session>,
}

impl MemorySessionStore {
    pub fn new(session: Session) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }

    /// Returns the current contents without going through the trait.
    pub fn snapshot(&self) -> Session {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Session> {
        Ok(self.snapshot())
    }

    fn save(&self, session: &Session) -> Result<()> {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session.clone();
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

/// Session persisted as JSON on disk so it survives restarts.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Session> {
        if !self.path.exists() {
            return Ok(Session::empty());
        }

        let raw = fs::read_to_string(&self.path).map_err(|source| SessionStoreError::Read {
            path: self.path.clone(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Session::empty());
        }

        let persisted: PersistedSession =
            serde_json::from_str(&raw).map_err(|source| SessionStoreError::Parse {
                path: self.path.clone(),
                source,
            })?;

        let token = |value: Option<String>| value.filter(|v| !v.is_empty()).map(Token::new);
        Ok(Session {
            access: token(persisted.access_token),
            refresh: token(persisted.refresh_token),
        })
    }

    fn save(&self, session: &Session) -> Result<()> {
        let write_error = |source| SessionStoreError::Write {
            path: self.path.clone(),
            source,
        };

        if session.is_empty() {
            if self.path.exists() {
                fs::remove_file(&self.path).map_err(write_error)?;
            }
            return Ok(());
        }

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(write_error)?;
        }

        let persisted = PersistedSession {
            access_token: session.access.as_ref().map(|t| t.expose().to_owned()),
            refresh_token: session.refresh.as_ref().map(|t| t.expose().to_owned()),
        };
        let content =
            serde_json::to_string_pretty(&persisted).map_err(SessionStoreError::Serialize)?;
        let mut file = open_private(&self.path).map_err(write_error)?;
        file.write_all(content.as_bytes()).map_err(write_error)?;
        Ok(())
    }
}

/// Opens `path` for writing, owner-only, before any bytes land in it.
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let file = options.open(path)?;
    // `mode` only applies on creation; tighten a file left by an older run.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    Ok(file)
}
