//! Twitch OAuth implicit grant.
//!
//! Only one authorization is live at a time. Starting a new one resolves the
//! previous pending result with [`AuthResult::None`] before replacing its
//! state token, and a redirect whose `state` does not match the live token
//! is ignored.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use base64::Engine;
use rand::Rng;
use serde::Deserialize;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};

use st_core::config::OAuthConfig;
use st_core::error::{StError, StResult};

use crate::credentials::{CredentialStore, StoredCredentials};
use crate::listener::{CallbackHandler, CallbackListener};

const VALIDATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of [`OAuthClient::get_access_token`] and [`OAuthClient::authorize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    /// A cached token that still validates.
    CachedToken { token: String, login: Option<String> },
    /// A token obtained through the browser flow.
    NewAuthorization { token: String, login: Option<String> },
    /// No token: the flow was superseded, refused or produced an invalid token.
    None,
}

impl AuthResult {
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::CachedToken { token, .. } | Self::NewAuthorization { token, .. } => Some(token),
            Self::None => None,
        }
    }

    pub fn login(&self) -> Option<&str> {
        match self {
            Self::CachedToken { login, .. } | Self::NewAuthorization { login, .. } => {
                login.as_deref()
            }
            Self::None => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Body of a successful `GET /oauth2/validate`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenValidation {
    pub client_id: String,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Whether a token is usable by this application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidateResult {
    pub is_valid: bool,
    pub login: Option<String>,
}

#[derive(Default)]
struct PendingAuth {
    state: Option<String>,
    result_tx: Option<oneshot::Sender<AuthResult>>,
    listener: Option<CallbackListener>,
}

impl PendingAuth {
    fn complete(&mut self, result: AuthResult) {
        if let Some(tx) = self.result_tx.take() {
            let _ = tx.send(result);
        }
    }

    fn cleanup(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.close();
        }
        self.state = None;
        self.result_tx = None;
    }
}

struct Inner {
    config: OAuthConfig,
    http: reqwest::Client,
    store: Arc<dyn CredentialStore>,
    pending: Mutex<PendingAuth>,
}

/// OAuth client for the implicit grant flow.
#[derive(Clone)]
pub struct OAuthClient {
    inner: Arc<Inner>,
}

impl OAuthClient {
    pub fn new(config: OAuthConfig, store: Arc<dyn CredentialStore>) -> StResult<Self> {
        if config.client_id.trim().is_empty() {
            return Err(StError::MissingConfig("oauth.client_id".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(VALIDATE_TIMEOUT)
            .build()
            .map_err(|e| StError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                http,
                store,
                pending: Mutex::new(PendingAuth::default()),
            }),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.inner.config.client_id
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.store
    }

    /// Whether the cached token exists and validates.
    pub async fn has_valid_token(&self) -> bool {
        match self.inner.store.load_or_create().token() {
            Some(token) => self.validate_token(token).await.is_valid,
            None => false,
        }
    }

    /// Return the cached token if it still validates, otherwise run the browser flow.
    ///
    /// `on_interaction` receives the authorization URL to present to the user.
    pub async fn get_access_token<F>(&self, on_interaction: F) -> StResult<AuthResult>
    where
        F: FnOnce(&str) + Send,
    {
        let cached = self.inner.store.load_or_create();
        if let Some(token) = cached.token() {
            let validation = self.validate_token(token).await;
            if validation.is_valid {
                debug!("reusing cached token");
                return Ok(AuthResult::CachedToken {
                    token: token.to_string(),
                    login: validation.login.or(cached.login.clone()),
                });
            }
            info!("cached token no longer valid");
        }
        self.authorize(on_interaction).await
    }

    /// Start a browser authorization and wait for its redirect.
    pub async fn authorize<F>(&self, on_interaction: F) -> StResult<AuthResult>
    where
        F: FnOnce(&str) + Send,
    {
        let state = generate_state();
        let (tx, rx) = oneshot::channel();

        let url = {
            let mut pending = self.inner.pending.lock().await;
            if pending.result_tx.is_some() {
                info!("superseding pending authorization");
                pending.complete(AuthResult::None);
            }
            pending.state = Some(state.clone());
            pending.result_tx = Some(tx);

            if pending.listener.is_none() {
                let weak = Arc::downgrade(&self.inner);
                match CallbackListener::bind(
                    self.inner.config.callback_port,
                    &self.inner.config.callback_path,
                    callback_handler(weak),
                )
                .await
                {
                    Ok(listener) => pending.listener = Some(listener),
                    Err(e) => {
                        pending.cleanup();
                        return Err(e);
                    }
                }
            }
            let redirect_uri = pending
                .listener
                .as_ref()
                .map(CallbackListener::redirect_uri)
                .ok_or_else(|| StError::Internal("callback listener missing".into()))?;
            self.authorization_url(&redirect_uri, &state)?
        };

        on_interaction(&url);

        // A dropped sender means the flow was torn down without a result.
        Ok(rx.await.unwrap_or(AuthResult::None))
    }

    /// Build the provider authorization URL.
    pub fn authorization_url(&self, redirect_uri: &str, state: &str) -> StResult<String> {
        let config = &self.inner.config;
        let scope = config.scopes.join(" ");
        let url = reqwest::Url::parse_with_params(
            &config.authorize_url,
            &[
                ("client_id", config.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "token"),
                ("scope", scope.as_str()),
                ("state", state),
            ],
        )
        .map_err(|e| StError::Config(format!("invalid oauth.authorize_url: {e}")))?;
        Ok(url.to_string())
    }

    /// Check a token against the validation endpoint. Network failures count as invalid.
    pub async fn validate_token(&self, token: &str) -> ValidateResult {
        self.inner.validate_token(token).await
    }

    /// Whether a browser authorization is waiting for its redirect.
    pub async fn is_pending(&self) -> bool {
        self.inner.pending.lock().await.result_tx.is_some()
    }

    /// Abandon a pending authorization, resolving it with [`AuthResult::None`].
    pub async fn cancel(&self) {
        let mut pending = self.inner.pending.lock().await;
        pending.complete(AuthResult::None);
        pending.cleanup();
    }
}

impl Inner {
    async fn validate_token(&self, token: &str) -> ValidateResult {
        let response = match self
            .http
            .get(&self.config.validate_url)
            .header("Authorization", format!("OAuth {token}"))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("token validation request failed: {}", e);
                return ValidateResult::default();
            }
        };

        if response.status() != reqwest::StatusCode::OK {
            debug!("token rejected with status {}", response.status());
            return ValidateResult::default();
        }

        let validation: TokenValidation = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                error!("undecodable validation response: {}", e);
                return ValidateResult::default();
            }
        };

        if validation.client_id != self.config.client_id {
            warn!("token belongs to a different client id");
            return ValidateResult::default();
        }
        let missing: Vec<&String> = self
            .config
            .scopes
            .iter()
            .filter(|s| !validation.scopes.contains(*s))
            .collect();
        if !missing.is_empty() {
            warn!("token lacks scopes {:?}", missing);
            return ValidateResult::default();
        }

        ValidateResult {
            is_valid: true,
            login: validation.login,
        }
    }

    async fn handle_callback(self: Arc<Self>, params: HashMap<String, String>) {
        let mut pending = self.pending.lock().await;
        let live = pending.state.is_some()
            && pending.state.as_deref() == params.get("state").map(String::as_str)
            && pending.result_tx.is_some();
        if !live {
            debug!("ignoring redirect with stale or missing state");
            return;
        }

        if let Some(token) = params.get("access_token") {
            let validation = self.validate_token(token).await;
            if !validation.is_valid {
                warn!("authorization returned an unusable token");
                pending.complete(AuthResult::None);
                pending.cleanup();
                return;
            }

            info!(
                "authorized as {}",
                validation.login.as_deref().unwrap_or("<unknown>")
            );
            let credentials = StoredCredentials::new(token.clone(), validation.login.clone());
            if let Err(e) = self.store.save(&credentials) {
                error!("failed to save credentials: {}", e);
            }
            pending.complete(AuthResult::NewAuthorization {
                token: token.clone(),
                login: validation.login,
            });
        } else if let Some(err) = params.get("error") {
            warn!(
                "authorization refused: {} - {}",
                err,
                params.get("error_description").map(String::as_str).unwrap_or("")
            );
            pending.complete(AuthResult::None);
        } else {
            warn!("redirect carried neither a token nor an error");
            pending.complete(AuthResult::None);
        }
        pending.cleanup();
    }
}

fn callback_handler(inner: Weak<Inner>) -> CallbackHandler {
    Arc::new(move |params| {
        if let Some(inner) = inner.upgrade() {
            tokio::spawn(inner.handle_callback(params));
        }
    })
}

/// 16 random bytes, base64url without padding.
fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
