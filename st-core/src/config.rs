//! Application configuration management.
//!
//! Handles loading, saving, and accessing the client configuration: the
//! OAuth application, the Helix REST endpoint, the EventSub transport and
//! logging. Configuration is persisted as TOML on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::constants;
use crate::error::{StError, StResult};
use crate::paths;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// OAuth application settings.
    #[serde(default)]
    pub oauth: OAuthConfig,

    /// Helix REST API settings.
    #[serde(default)]
    pub helix: HelixConfig,

    /// EventSub WebSocket settings.
    #[serde(default)]
    pub eventsub: EventSubConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// OAuth implicit-grant configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Public client id of the registered Twitch application.
    #[serde(default)]
    pub client_id: String,

    /// Scopes requested during authorization and required on validation.
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// Authorization endpoint.
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,

    /// Token validation endpoint.
    #[serde(default = "default_validate_url")]
    pub validate_url: String,

    /// Local port the redirect listener binds (0 picks an ephemeral port).
    #[serde(default = "default_callback_port")]
    pub callback_port: u16,

    /// Path of the redirect URI.
    #[serde(default = "default_callback_path")]
    pub callback_path: String,

    /// Credential cache file. If empty, uses the default location.
    #[serde(default)]
    pub credentials_path: String,
}

/// Helix REST API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelixConfig {
    /// API root, without trailing slash.
    #[serde(default = "default_helix_base")]
    pub api_base: String,

    /// Request timeout in milliseconds.
    #[serde(default = "default_api_timeout")]
    pub timeout_ms: u64,

    /// Maximum number of retries for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between retries in milliseconds (doubles each attempt).
    #[serde(default = "default_retry_base")]
    pub retry_base_ms: u64,
}

/// EventSub WebSocket configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSubConfig {
    /// WebSocket endpoint used for fresh sessions.
    #[serde(default = "default_eventsub_url")]
    pub url: String,

    /// Extra time on top of the server's keepalive timeout before the
    /// connection is declared dead, in milliseconds.
    #[serde(default = "default_keepalive_margin")]
    pub keepalive_margin_ms: u64,

    /// Timeout for a single connection handshake, in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Reconnection backoff.
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Number of notification ids remembered for duplicate suppression.
    #[serde(default = "default_handled_history")]
    pub handled_message_history: usize,
}

/// Exponential backoff configuration for reconnects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt, in milliseconds.
    #[serde(default = "default_backoff_base")]
    pub base_ms: u64,

    /// Upper bound on the computed delay, in milliseconds.
    #[serde(default = "default_backoff_max")]
    pub max_ms: u64,

    /// Growth factor per attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,

    /// Symmetric jitter fraction (0.2 = +/-20%).
    #[serde(default = "default_backoff_jitter")]
    pub jitter: f64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output for the file layer.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde

fn default_scopes() -> Vec<String> {
    vec![constants::SCOPE_USER_READ_CHAT.to_string()]
}

fn default_authorize_url() -> String {
    constants::OAUTH_AUTHORIZE_URL.to_string()
}

fn default_validate_url() -> String {
    constants::OAUTH_VALIDATE_URL.to_string()
}

fn default_callback_port() -> u16 {
    constants::DEFAULT_CALLBACK_PORT
}

fn default_callback_path() -> String {
    constants::DEFAULT_CALLBACK_PATH.to_string()
}

fn default_helix_base() -> String {
    constants::HELIX_API_BASE.to_string()
}

fn default_api_timeout() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base() -> u64 {
    500
}

fn default_eventsub_url() -> String {
    constants::DEFAULT_EVENTSUB_URL.to_string()
}

fn default_keepalive_margin() -> u64 {
    constants::KEEPALIVE_SAFETY_MARGIN_MS
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_handled_history() -> usize {
    constants::MAX_HANDLED_MESSAGE_HISTORY
}

fn default_backoff_base() -> u64 {
    1_000
}

fn default_backoff_max() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_backoff_jitter() -> f64 {
    0.2
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            scopes: default_scopes(),
            authorize_url: default_authorize_url(),
            validate_url: default_validate_url(),
            callback_port: default_callback_port(),
            callback_path: default_callback_path(),
            credentials_path: String::new(),
        }
    }
}

impl Default for HelixConfig {
    fn default() -> Self {
        Self {
            api_base: default_helix_base(),
            timeout_ms: default_api_timeout(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base(),
        }
    }
}

impl Default for EventSubConfig {
    fn default() -> Self {
        Self {
            url: default_eventsub_url(),
            keepalive_margin_ms: default_keepalive_margin(),
            connect_timeout_ms: default_connect_timeout(),
            backoff: BackoffConfig::default(),
            handled_message_history: default_handled_history(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base(),
            max_ms: default_backoff_max(),
            multiplier: default_backoff_multiplier(),
            jitter: default_backoff_jitter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl EventSubConfig {
    pub fn keepalive_margin(&self) -> Duration {
        Duration::from_millis(self.keepalive_margin_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl AppConfig {
    /// Load configuration from the default config file path.
    pub fn load_default() -> StResult<Self> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> StResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> StResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| StError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> StResult<PathBuf> {
        Ok(paths::config_dir()?.join("config.toml"))
    }

    /// Get the effective credential cache path.
    pub fn effective_credentials_path(&self) -> StResult<PathBuf> {
        if self.oauth.credentials_path.is_empty() {
            Ok(paths::config_dir()?.join(constants::CREDENTIALS_FILE_NAME))
        } else {
            Ok(PathBuf::from(&self.oauth.credentials_path))
        }
    }

    /// Get the effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> StResult<PathBuf> {
        if self.logging.directory.is_empty() {
            Ok(paths::data_dir()?.join("logs"))
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }

    /// Reject values that would make the backoff or keepalive logic misbehave.
    pub fn validate(&self) -> StResult<()> {
        let backoff = &self.eventsub.backoff;
        if backoff.multiplier < 1.0 {
            return Err(StError::Config("eventsub.backoff.multiplier must be >= 1.0".into()));
        }
        if !(0.0..1.0).contains(&backoff.jitter) {
            return Err(StError::Config("eventsub.backoff.jitter must be in [0.0, 1.0)".into()));
        }
        if backoff.base_ms > backoff.max_ms {
            return Err(StError::Config("eventsub.backoff.base_ms exceeds max_ms".into()));
        }
        if !self.oauth.callback_path.starts_with('/') {
            return Err(StError::Config("oauth.callback_path must start with '/'".into()));
        }
        Ok(())
    }
}

/// Thread-safe configuration holder for shared access across services.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<AppConfig>>,
}

impl ConfigHandle {
    /// Create a new configuration handle.
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.inner.read().await
    }

    /// Write/update the configuration.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, AppConfig> {
        self.inner.write().await
    }

    /// Clone the current configuration.
    pub async fn snapshot(&self) -> AppConfig {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.eventsub.url, "wss://eventsub.wss.twitch.tv/ws");
        assert_eq!(config.eventsub.keepalive_margin(), Duration::from_secs(5));
        assert_eq!(config.eventsub.backoff.max_ms, 30_000);
        assert_eq!(config.oauth.scopes, vec!["user:read:chat".to_string()]);
        assert_eq!(config.oauth.callback_port, 7654);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [oauth]
            client_id = "abc123"

            [eventsub.backoff]
            base_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.oauth.client_id, "abc123");
        assert_eq!(config.oauth.callback_path, "/callback");
        assert_eq!(config.eventsub.backoff.base_ms, 250);
        assert_eq!(config.eventsub.backoff.multiplier, 2.0);
    }

    #[test]
    fn test_validate_rejects_bad_backoff() {
        let mut config = AppConfig::default();
        config.eventsub.backoff.jitter = 1.5;
        assert!(matches!(config.validate(), Err(StError::Config(_))));

        let mut config = AppConfig::default();
        config.eventsub.backoff.multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.oauth.client_id = "client".into();
        config.helix.timeout_ms = 1234;
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.oauth.client_id, "client");
        assert_eq!(loaded.helix.timeout_ms, 1234);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[oauth]\ncallback_path = \"callback\"\n").unwrap();

        assert!(matches!(
            AppConfig::load_from_file(&path),
            Err(StError::Config(_))
        ));
    }

    #[test]
    fn test_explicit_credentials_path() {
        let mut config = AppConfig::default();
        config.oauth.credentials_path = "/tmp/creds.json".into();
        assert_eq!(
            config.effective_credentials_path().unwrap(),
            PathBuf::from("/tmp/creds.json")
        );
    }

    #[tokio::test]
    async fn test_config_handle_write_visible() {
        let handle = ConfigHandle::new(AppConfig::default());
        handle.write().await.oauth.client_id = "updated".into();
        assert_eq!(handle.snapshot().await.oauth.client_id, "updated");
    }
}
