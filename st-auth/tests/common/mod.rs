//! Shared test utilities for OAuth integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use st_auth::{CredentialStore, OAuthClient, StoredCredentials};
use st_core::config::OAuthConfig;
use st_core::error::StResult;

pub const CLIENT_ID: &str = "test-client-id";

/// In-memory credential store that records saves.
#[derive(Default)]
pub struct MemoryStore {
    pub credentials: Mutex<StoredCredentials>,
    pub saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn with_token(token: &str, login: &str) -> Arc<Self> {
        let store = Self::default();
        *store.credentials.lock().unwrap() = StoredCredentials::new(token, Some(login.to_string()));
        Arc::new(store)
    }

    pub fn current(&self) -> StoredCredentials {
        self.credentials.lock().unwrap().clone()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap()
    }
}

impl CredentialStore for MemoryStore {
    fn load_or_create(&self) -> StoredCredentials {
        self.current()
    }

    fn save(&self, credentials: &StoredCredentials) -> StResult<()> {
        *self.credentials.lock().unwrap() = credentials.clone();
        *self.saves.lock().unwrap() += 1;
        Ok(())
    }

    fn clear(&self) -> StResult<()> {
        *self.credentials.lock().unwrap() = StoredCredentials::default();
        Ok(())
    }
}

/// OAuth settings pointing at a mock validation endpoint and an ephemeral callback port.
pub fn oauth_config(server: &MockServer) -> OAuthConfig {
    OAuthConfig {
        client_id: CLIENT_ID.to_string(),
        validate_url: format!("{}/oauth2/validate", server.uri()),
        callback_port: 0,
        ..OAuthConfig::default()
    }
}

pub fn create_test_client(server: &MockServer, store: Arc<MemoryStore>) -> OAuthClient {
    OAuthClient::new(oauth_config(server), store).expect("failed to create oauth client")
}

/// Accept `token` as belonging to `client_id` with `scopes`.
pub async fn mount_validation(
    server: &MockServer,
    token: &str,
    client_id: &str,
    scopes: &[&str],
    login: &str,
) {
    Mock::given(method("GET"))
        .and(path("/oauth2/validate"))
        .and(header("Authorization", format!("OAuth {token}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "client_id": client_id,
            "login": login,
            "user_id": "141981764",
            "expires_in": 5520838,
            "scopes": scopes,
        })))
        .mount(server)
        .await;
}

/// Reject every token not matched by a more specific mock.
pub async fn mount_rejection(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/oauth2/validate"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "status": 401,
            "message": "invalid access token",
        })))
        .with_priority(10)
        .mount(server)
        .await;
}

pub fn query_params(url: &str) -> HashMap<String, String> {
    reqwest::Url::parse(url)
        .expect("bad url")
        .query_pairs()
        .into_owned()
        .collect()
}

/// The redirect URI from an authorization URL, addressed to the IPv4 loopback.
pub fn loopback_redirect(authorization_url: &str) -> String {
    query_params(authorization_url)["redirect_uri"].replace("localhost", "127.0.0.1")
}
