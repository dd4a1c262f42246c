//! HTTP client for the Twitch Helix REST API.
//!
//! Handles bearer authentication, the `Client-Id` header, timeouts,
//! exponential backoff retry and status classification for the handful of
//! endpoints the EventSub client needs.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use st_core::config::HelixConfig;
use st_core::error::{StError, StResult};

use crate::response::{HelixErrorBody, HelixResponse, HelixUser, SubscriptionRecord};
use crate::subscription::SubscriptionSpec;

/// Helix accepts at most this many `login` parameters per users request.
const MAX_USERS_PER_REQUEST: usize = 100;

/// Token and application id attached to every Helix request.
#[derive(Clone, PartialEq, Eq)]
pub struct HelixCredentials {
    pub access_token: String,
    pub client_id: String,
}

impl HelixCredentials {
    pub fn new(access_token: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            client_id: client_id.into(),
        }
    }
}

impl fmt::Debug for HelixCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelixCredentials")
            .field("access_token", &"<redacted>")
            .field("client_id", &self.client_id)
            .finish()
    }
}

/// Operations the rest of the workspace needs from Helix.
#[async_trait]
pub trait HelixApi: Send + Sync {
    /// Replace the credentials used for subsequent requests.
    async fn set_credentials(&self, credentials: HelixCredentials);

    /// Create a subscription bound to a WebSocket session. Returns the remote id.
    async fn create_subscription(
        &self,
        spec: &SubscriptionSpec,
        session_id: &str,
    ) -> StResult<String>;

    /// Delete a subscription by remote id.
    async fn delete_subscription(&self, subscription_id: &str) -> StResult<()>;

    /// List every subscription owned by the current credentials, following pagination.
    async fn list_subscriptions(&self) -> StResult<Vec<SubscriptionRecord>>;

    /// Look up a single user by login name.
    async fn resolve_user(&self, login: &str) -> StResult<HelixUser>;

    /// The user the current token belongs to.
    async fn current_user(&self) -> StResult<HelixUser>;
}

/// Retry configuration for Helix requests.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Base delay between retries (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
        }
    }
}

/// reqwest-backed Helix client.
#[derive(Clone)]
pub struct HelixClient {
    inner: Client,
    /// API root without trailing slash (e.g. "https://api.twitch.tv/helix").
    api_base: String,
    credentials: Arc<RwLock<Option<HelixCredentials>>>,
    retry_config: RetryConfig,
}

impl HelixClient {
    /// Create a client from configuration. Credentials are set separately.
    pub fn new(config: &HelixConfig) -> StResult<Self> {
        let inner = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| StError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            inner,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            credentials: Arc::new(RwLock::new(None)),
            retry_config: RetryConfig {
                max_retries: config.max_retries,
                base_delay: Duration::from_millis(config.retry_base_ms),
                ..RetryConfig::default()
            },
        })
    }

    /// Set custom retry configuration.
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Look up several users by login in one request.
    pub async fn users_by_login(&self, logins: &[&str]) -> StResult<Vec<HelixUser>> {
        if logins.is_empty() {
            return Err(StError::InvalidArgument("no logins given".into()));
        }
        if logins.len() > MAX_USERS_PER_REQUEST {
            return Err(StError::InvalidArgument(format!(
                "at most {MAX_USERS_PER_REQUEST} logins per request"
            )));
        }
        for login in logins {
            StError::require_non_blank(login, "login")?;
        }

        let query: Vec<(&str, &str)> = logins.iter().map(|l| ("login", *l)).collect();
        let resp = self
            .request_with_retry(Method::GET, "/users", &query, None)
            .await?;
        let resp = Self::check_status(resp, StatusCode::OK).await?;
        let body: HelixResponse<HelixUser> = Self::parse_response(resp).await?;
        Ok(body.data)
    }

    async fn current_credentials(&self) -> StResult<HelixCredentials> {
        self.credentials
            .read()
            .await
            .clone()
            .ok_or_else(|| StError::AuthFailed("no Helix credentials set".into()))
    }

    /// Execute a request with exponential backoff retry on transport
    /// failures and 5xx responses.
    async fn request_with_retry(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
    ) -> StResult<Response> {
        let creds = self.current_credentials().await?;
        let url = format!("{}{}", self.api_base, path);
        debug!("{} {}", method, path);

        let mut last_error: Option<StError> = None;

        for attempt in 0..=self.retry_config.max_retries {
            if attempt > 0 {
                let delay = self.calculate_retry_delay(attempt - 1);
                warn!(
                    "retrying {} {} (attempt {}/{}) after {:.1}s",
                    method,
                    path,
                    attempt + 1,
                    self.retry_config.max_retries + 1,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }

            let mut builder = self
                .inner
                .request(method.clone(), &url)
                .bearer_auth(&creds.access_token)
                .header("Client-Id", &creds.client_id);
            if !query.is_empty() {
                builder = builder.query(query);
            }
            if let Some(b) = body {
                builder = builder.json(b);
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    let err = StError::ServerError {
                        status: status.as_u16(),
                        message: format!("retryable status {status}"),
                    };
                    if err.is_transient() && attempt < self.retry_config.max_retries {
                        warn!("retryable status {} from {}", status.as_u16(), path);
                        last_error = Some(err);
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    let err = Self::classify_error(e);

                    if err.is_transient() && attempt < self.retry_config.max_retries {
                        warn!("retryable error on {}: {}", path, err);
                        last_error = Some(err);
                        continue;
                    }

                    return Err(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| StError::Http("max retries exceeded".into())))
    }

    /// Calculate retry delay with exponential backoff.
    fn calculate_retry_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.retry_config.base_delay.as_millis() as u64;
        let delay_ms = base_ms.saturating_mul(1u64 << attempt.min(16));
        let max_ms = self.retry_config.max_delay.as_millis() as u64;
        Duration::from_millis(delay_ms.min(max_ms))
    }

    /// Require the exact success status an endpoint documents.
    async fn check_status(response: Response, expected: StatusCode) -> StResult<Response> {
        let status = response.status();
        if status == expected {
            return Ok(response);
        }

        let raw = response.text().await.unwrap_or_default();
        let message = HelixErrorBody::describe(&raw);

        if status == StatusCode::UNAUTHORIZED {
            return Err(StError::AuthFailed(message));
        }
        Err(StError::ServerError {
            status: status.as_u16(),
            message,
        })
    }

    async fn parse_response<T: DeserializeOwned>(
        response: Response,
    ) -> StResult<HelixResponse<T>> {
        response
            .json::<HelixResponse<T>>()
            .await
            .map_err(|e| StError::Serialization(format!("failed to parse Helix response: {e}")))
    }

    /// Classify a reqwest error into an StError variant.
    fn classify_error(e: reqwest::Error) -> StError {
        if e.is_timeout() {
            StError::Timeout(e.to_string())
        } else if e.is_connect() {
            StError::Http(format!("connection failed: {e}"))
        } else {
            StError::Http(e.to_string())
        }
    }

    async fn first_user(&self, query: &[(&str, &str)], what: &str) -> StResult<HelixUser> {
        let resp = self
            .request_with_retry(Method::GET, "/users", query, None)
            .await?;
        let resp = Self::check_status(resp, StatusCode::OK).await?;
        let body: HelixResponse<HelixUser> = Self::parse_response(resp).await?;
        body.data
            .into_iter()
            .next()
            .ok_or_else(|| StError::NotFound(what.to_string()))
    }
}

#[async_trait]
impl HelixApi for HelixClient {
    async fn set_credentials(&self, credentials: HelixCredentials) {
        debug!("helix credentials updated for client_id={}", credentials.client_id);
        *self.credentials.write().await = Some(credentials);
    }

    async fn create_subscription(
        &self,
        spec: &SubscriptionSpec,
        session_id: &str,
    ) -> StResult<String> {
        StError::require_non_blank(session_id, "session_id")?;

        let body = spec.creation_body(session_id);
        let resp = self
            .request_with_retry(Method::POST, "/eventsub/subscriptions", &[], Some(&body))
            .await?;
        let resp = Self::check_status(resp, StatusCode::ACCEPTED).await?;
        let parsed: HelixResponse<SubscriptionRecord> = Self::parse_response(resp).await?;

        let id = parsed
            .data
            .into_iter()
            .next()
            .map(|record| record.id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                StError::Protocol("subscription create response carried no id".into())
            })?;

        info!("created subscription {} for {}", id, spec);
        Ok(id)
    }

    async fn delete_subscription(&self, subscription_id: &str) -> StResult<()> {
        StError::require_non_blank(subscription_id, "subscription_id")?;

        let resp = self
            .request_with_retry(
                Method::DELETE,
                "/eventsub/subscriptions",
                &[("id", subscription_id)],
                None,
            )
            .await?;
        Self::check_status(resp, StatusCode::NO_CONTENT).await?;
        info!("deleted subscription {}", subscription_id);
        Ok(())
    }

    async fn list_subscriptions(&self) -> StResult<Vec<SubscriptionRecord>> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let query: Vec<(&str, &str)> = match cursor.as_deref() {
                Some(after) => vec![("after", after)],
                None => Vec::new(),
            };
            let resp = self
                .request_with_retry(Method::GET, "/eventsub/subscriptions", &query, None)
                .await?;
            let resp = Self::check_status(resp, StatusCode::OK).await?;
            let page: HelixResponse<SubscriptionRecord> = Self::parse_response(resp).await?;

            let next = page.next_cursor().map(str::to_string);
            records.extend(page.data);

            match next {
                // A repeated cursor would loop forever.
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => break,
            }
        }

        debug!("listed {} subscriptions", records.len());
        Ok(records)
    }

    async fn resolve_user(&self, login: &str) -> StResult<HelixUser> {
        StError::require_non_blank(login, "login")?;
        let login = login.trim();
        self.first_user(&[("login", login)], &format!("user '{login}'"))
            .await
    }

    async fn current_user(&self) -> StResult<HelixUser> {
        self.first_user(&[], "token owner").await
    }
}
