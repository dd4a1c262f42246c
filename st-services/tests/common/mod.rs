//! Shared test utilities for service tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::runtime::Handle;

use st_api::{HelixApi, HelixCredentials, HelixUser, SubscriptionRecord, SubscriptionSpec};
use st_auth::{CredentialStore, OAuthClient, StoredCredentials};
use st_core::config::OAuthConfig;
use st_core::error::{StError, StResult};
use st_eventsub::{
    BackoffPolicy, EventSink, ManagerOptions, ManagerSnapshot, Scheduler, SessionInfo,
    SubscriptionManager, Transport, TransportEvent,
};
use st_services::{ChatMessageLog, EventBridge, EventBus, TwitchService};

pub const ME: &str = "1000";

pub fn user(id: &str, login: &str) -> HelixUser {
    HelixUser {
        id: id.to_string(),
        login: login.to_string(),
        display_name: login.to_uppercase(),
        broadcaster_type: String::new(),
        profile_image_url: None,
    }
}

/// Helix stand-in with a fixed user directory.
pub struct FakeHelix {
    users: HashMap<String, HelixUser>,
    pub credentials: Mutex<Option<HelixCredentials>>,
    pub creates: Mutex<Vec<(SubscriptionSpec, String)>>,
    pub deletes: Mutex<Vec<String>>,
}

impl FakeHelix {
    pub fn new() -> Arc<Self> {
        let mut users = HashMap::new();
        for (id, login) in [(ME, "me"), ("2000", "other"), ("3000", "third")] {
            users.insert(login.to_string(), user(id, login));
        }
        Arc::new(Self {
            users,
            credentials: Mutex::new(None),
            creates: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl HelixApi for FakeHelix {
    async fn set_credentials(&self, credentials: HelixCredentials) {
        *self.credentials.lock() = Some(credentials);
    }

    async fn create_subscription(&self, spec: &SubscriptionSpec, session_id: &str) -> StResult<String> {
        let mut creates = self.creates.lock();
        creates.push((spec.clone(), session_id.to_string()));
        Ok(format!("remote-{}", creates.len()))
    }

    async fn delete_subscription(&self, subscription_id: &str) -> StResult<()> {
        self.deletes.lock().push(subscription_id.to_string());
        Ok(())
    }

    async fn list_subscriptions(&self) -> StResult<Vec<SubscriptionRecord>> {
        Ok(Vec::new())
    }

    async fn resolve_user(&self, login: &str) -> StResult<HelixUser> {
        self.users
            .get(&login.to_lowercase())
            .cloned()
            .ok_or_else(|| StError::NotFound(format!("user {login}")))
    }

    async fn current_user(&self) -> StResult<HelixUser> {
        Ok(user(ME, "me"))
    }
}

/// Transport stand-in; tests drive server events through `emit`.
#[derive(Default)]
pub struct FakeTransport {
    open: Mutex<bool>,
    pub connects: Mutex<Vec<String>>,
    listener: Mutex<Option<EventSink>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn emit(&self, event: TransportEvent) {
        let sink = self.listener.lock().clone();
        if let Some(sink) = sink {
            sink(event);
        }
    }

    pub fn welcome(&self, session_id: &str) {
        *self.open.lock() = true;
        self.emit(TransportEvent::Welcome(SessionInfo {
            id: session_id.to_string(),
            status: Some("connected".into()),
            keepalive_timeout: Duration::from_secs(10),
            reconnect_url: None,
            connected_at: None,
        }));
    }
}

impl Transport for FakeTransport {
    fn connect(&self, url: &str) -> StResult<()> {
        self.connects.lock().push(url.to_string());
        Ok(())
    }

    fn close(&self) {
        *self.open.lock() = false;
    }

    fn is_open(&self) -> bool {
        *self.open.lock()
    }

    fn set_listener(&self, listener: EventSink) {
        *self.listener.lock() = Some(listener);
    }

    fn allow_reconnect(&self, _allow: bool) {}

    fn set_backoff_policy(&self, _policy: Arc<dyn BackoffPolicy>) {}

    fn shutdown(&self) {
        *self.open.lock() = false;
    }
}

#[derive(Default)]
pub struct MemoryStore {
    credentials: Mutex<StoredCredentials>,
}

impl MemoryStore {
    pub fn with_token(token: &str) -> Arc<Self> {
        Arc::new(Self {
            credentials: Mutex::new(StoredCredentials::new(token, Some("me".into()))),
        })
    }
}

impl CredentialStore for MemoryStore {
    fn load_or_create(&self) -> StoredCredentials {
        self.credentials.lock().clone()
    }

    fn save(&self, credentials: &StoredCredentials) -> StResult<()> {
        *self.credentials.lock() = credentials.clone();
        Ok(())
    }

    fn clear(&self) -> StResult<()> {
        *self.credentials.lock() = StoredCredentials::default();
        Ok(())
    }
}

pub fn oauth_config(validate_url: &str) -> OAuthConfig {
    OAuthConfig {
        client_id: "test-client-id".into(),
        validate_url: validate_url.to_string(),
        callback_port: 0,
        ..OAuthConfig::default()
    }
}

/// Service over fakes. The OAuth client validates against `validate_url`.
pub fn create_test_service(
    helix: Arc<FakeHelix>,
    transport: Arc<FakeTransport>,
    store: Arc<MemoryStore>,
    validate_url: &str,
) -> TwitchService {
    let bus = EventBus::new(64);
    let log = Arc::new(ChatMessageLog::default());
    let bridge = Arc::new(EventBridge::new(bus.clone(), Arc::clone(&log)));
    let scheduler = Arc::new(Scheduler::from_handle("service-test", Handle::current()));
    let manager = SubscriptionManager::new(
        helix.clone(),
        transport,
        scheduler,
        bridge,
        ManagerOptions {
            url: "wss://eventsub.test/ws".into(),
            keepalive_margin: Duration::from_secs(5),
            handled_history: 50,
        },
    )
    .expect("failed to create manager");
    let oauth = OAuthClient::new(oauth_config(validate_url), store).expect("oauth client");
    TwitchService::from_parts(helix, oauth, manager, bus, log)
}

pub async fn wait_for<F>(service: &TwitchService, pred: F) -> ManagerSnapshot
where
    F: Fn(&ManagerSnapshot) -> bool,
{
    for _ in 0..300 {
        let snapshot = service.manager().snapshot().await.expect("manager stopped");
        if pred(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// Poll an arbitrary condition.
pub async fn eventually<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
