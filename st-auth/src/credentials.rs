//! Cached user credentials.
//!
//! The access token and the login it belongs to are kept in a small JSON
//! file next to the configuration. Writes go to a temporary sibling first
//! and are moved into place so a crash never leaves a half-written file.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use st_core::error::{StError, StResult};

/// Credentials as persisted on disk. Both fields are absent before the first login.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
}

impl StoredCredentials {
    pub fn new(access_token: impl Into<String>, login: Option<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            login,
        }
    }

    /// The cached token, if one is present and non-blank.
    pub fn token(&self) -> Option<&str> {
        self.access_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
    }
}

impl fmt::Debug for StoredCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCredentials")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("login", &self.login)
            .finish()
    }
}

/// Persistence for [`StoredCredentials`].
pub trait CredentialStore: Send + Sync {
    /// Load the cached credentials. A missing or unreadable cache yields empty credentials.
    fn load_or_create(&self) -> StoredCredentials;

    fn save(&self, credentials: &StoredCredentials) -> StResult<()>;

    /// Forget the cached credentials.
    fn clear(&self) -> StResult<()>;
}

/// JSON file backed [`CredentialStore`].
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CredentialStore for FileCredentialStore {
    fn load_or_create(&self) -> StoredCredentials {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("failed to create {}: {}", parent.display(), e);
            }
        }
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no cached credentials at {}", self.path.display());
                return StoredCredentials::default();
            }
            Err(e) => {
                warn!("failed to read {}: {}", self.path.display(), e);
                return StoredCredentials::default();
            }
        };
        match serde_json::from_str(&contents) {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!("ignoring corrupt credential cache {}: {}", self.path.display(), e);
                StoredCredentials::default()
            }
        }
    }

    fn save(&self, credentials: &StoredCredentials) -> StResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(credentials)?;
        let tmp = self.tmp_path();
        std::fs::write(&tmp, json)?;
        restrict_permissions(&tmp);
        std::fs::rename(&tmp, &self.path)?;
        info!("credentials saved to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> StResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StError::Io(e)),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        warn!("failed to set permissions on {}: {}", path.display(), e);
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}
