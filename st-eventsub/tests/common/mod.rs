//! Shared test utilities for EventSub integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Semaphore};
use tokio_tungstenite::WebSocketStream;

use st_api::{HelixApi, HelixCredentials, HelixUser, SubscriptionRecord, SubscriptionSpec};
use st_core::error::{StError, StResult};
use st_eventsub::{
    BackoffPolicy, EventHandler, EventSink, EventNotification, ManagerOptions, ManagerSnapshot, Revocation,
    Scheduler, SessionInfo, SubscriptionManager, Transport, TransportEvent,
};

pub const TEST_URL: &str = "wss://eventsub.test/ws";

// ---- Fake transport ----

#[derive(Debug, Default)]
pub struct TransportCalls {
    pub open: bool,
    pub connects: Vec<String>,
    pub closes: usize,
    pub allow_reconnect: Option<bool>,
    pub shut_down: bool,
}

/// Records calls and lets a test play the server side through the listener.
#[derive(Default)]
pub struct FakeTransport {
    calls: Mutex<TransportCalls>,
    listener: Mutex<Option<EventSink>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn emit(&self, event: TransportEvent) {
        let sink = self.listener.lock().clone().expect("listener not installed");
        sink(event);
    }

    pub fn welcome(&self, session_id: &str, keepalive_secs: u64) {
        self.calls.lock().open = true;
        self.emit(TransportEvent::Welcome(SessionInfo {
            id: session_id.to_string(),
            status: Some("connected".into()),
            keepalive_timeout: Duration::from_secs(keepalive_secs),
            reconnect_url: None,
            connected_at: None,
        }));
    }

    pub fn server_close(&self, code: u16) {
        self.calls.lock().open = false;
        self.emit(TransportEvent::Closed {
            code,
            reason: "server closed".into(),
        });
    }

    pub fn connects(&self) -> Vec<String> {
        self.calls.lock().connects.clone()
    }

    pub fn closes(&self) -> usize {
        self.calls.lock().closes
    }

    pub fn reconnect_allowed(&self) -> Option<bool> {
        self.calls.lock().allow_reconnect
    }

    pub fn is_shut_down(&self) -> bool {
        self.calls.lock().shut_down
    }
}

impl Transport for FakeTransport {
    fn connect(&self, url: &str) -> StResult<()> {
        self.calls.lock().connects.push(url.to_string());
        Ok(())
    }

    fn close(&self) {
        let mut calls = self.calls.lock();
        calls.closes += 1;
        calls.open = false;
    }

    fn is_open(&self) -> bool {
        self.calls.lock().open
    }

    fn set_listener(&self, listener: EventSink) {
        *self.listener.lock() = Some(listener);
    }

    fn allow_reconnect(&self, allow: bool) {
        self.calls.lock().allow_reconnect = Some(allow);
    }

    fn set_backoff_policy(&self, _policy: Arc<dyn BackoffPolicy>) {}

    fn shutdown(&self) {
        let mut calls = self.calls.lock();
        calls.shut_down = true;
        calls.open = false;
    }
}

// ---- Fake Helix ----

/// Hands out `remote-<n>` ids; can fail or hold creates on demand.
pub struct FakeHelix {
    creates: Mutex<Vec<(SubscriptionSpec, String)>>,
    deletes: Mutex<Vec<String>>,
    next_id: AtomicUsize,
    fail_creates: AtomicBool,
    hold_creates: AtomicBool,
    gate: Semaphore,
}

impl FakeHelix {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            creates: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
            fail_creates: AtomicBool::new(false),
            hold_creates: AtomicBool::new(false),
            gate: Semaphore::new(0),
        })
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// Creates block until `release_creates` hands out permits.
    pub fn hold_creates(&self, hold: bool) {
        self.hold_creates.store(hold, Ordering::SeqCst);
    }

    pub fn release_creates(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn creates(&self) -> Vec<(SubscriptionSpec, String)> {
        self.creates.lock().clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().clone()
    }
}

#[async_trait]
impl HelixApi for FakeHelix {
    async fn set_credentials(&self, _credentials: HelixCredentials) {}

    async fn create_subscription(
        &self,
        spec: &SubscriptionSpec,
        session_id: &str,
    ) -> StResult<String> {
        self.creates
            .lock()
            .push((spec.clone(), session_id.to_string()));
        if self.hold_creates.load(Ordering::SeqCst) {
            let permit = self.gate.acquire().await.expect("gate closed");
            permit.forget();
        }
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(StError::ServerError {
                status: 409,
                message: "subscription already exists".into(),
            });
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("remote-{n}"))
    }

    async fn delete_subscription(&self, subscription_id: &str) -> StResult<()> {
        self.deletes.lock().push(subscription_id.to_string());
        Ok(())
    }

    async fn list_subscriptions(&self) -> StResult<Vec<SubscriptionRecord>> {
        Ok(Vec::new())
    }

    async fn resolve_user(&self, login: &str) -> StResult<HelixUser> {
        Err(StError::NotFound(login.to_string()))
    }

    async fn current_user(&self) -> StResult<HelixUser> {
        Err(StError::NotFound("token owner".into()))
    }
}

// ---- Handler ----

#[derive(Default)]
pub struct RecordingHandler {
    pub notifications: Mutex<Vec<EventNotification>>,
    pub revocations: Mutex<Vec<Revocation>>,
}

impl EventHandler for RecordingHandler {
    fn on_notification(&self, notification: &EventNotification) {
        self.notifications.lock().push(notification.clone());
    }

    fn on_revocation(&self, revocation: &Revocation) {
        self.revocations.lock().push(revocation.clone());
    }
}

// ---- Manager helpers ----

pub fn spec(broadcaster: &str) -> SubscriptionSpec {
    SubscriptionSpec::chat_messages(broadcaster, "9999").unwrap()
}

pub fn create_test_manager(
    helix: Arc<FakeHelix>,
    transport: Arc<FakeTransport>,
    handler: Arc<dyn EventHandler>,
) -> SubscriptionManager {
    let scheduler = Arc::new(Scheduler::from_handle("manager-test", Handle::current()));
    SubscriptionManager::new(
        helix,
        transport,
        scheduler,
        handler,
        ManagerOptions {
            url: TEST_URL.to_string(),
            keepalive_margin: Duration::from_secs(5),
            handled_history: 100,
        },
    )
    .expect("failed to create manager")
}

/// Poll the manager until `pred` holds.
pub async fn wait_for<F>(manager: &SubscriptionManager, pred: F) -> ManagerSnapshot
where
    F: Fn(&ManagerSnapshot) -> bool,
{
    for _ in 0..300 {
        let snapshot = manager.snapshot().await.expect("manager stopped");
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

pub fn notification(message_id: &str, text: &str) -> TransportEvent {
    TransportEvent::Notification(EventNotification {
        message_id: message_id.to_string(),
        subscription_id: Some("remote-1".into()),
        subscription_type: "channel.chat.message".into(),
        subscription_version: Some("1".into()),
        timestamp: None,
        event: json!({"message": {"text": text}}),
    })
}

// ---- Local WebSocket server ----

/// Accepts WebSocket clients on an ephemeral port.
pub struct TestServer {
    pub url: String,
    accepted: mpsc::UnboundedReceiver<WebSocketStream<TcpStream>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind test server");
        let addr = listener.local_addr().expect("no local addr");
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                    if tx.send(ws).is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            url: format!("ws://{addr}/ws"),
            accepted: rx,
        }
    }

    pub async fn next_client(&mut self) -> WebSocketStream<TcpStream> {
        tokio::time::timeout(Duration::from_secs(5), self.accepted.recv())
            .await
            .expect("no client connected")
            .expect("server stopped")
    }

    pub async fn expect_no_client(&mut self, within: Duration) {
        if let Ok(Some(_)) = tokio::time::timeout(within, self.accepted.recv()).await {
            panic!("unexpected client connection");
        }
    }
}

pub fn welcome_json(session_id: &str, keepalive_secs: u64) -> String {
    json!({
        "metadata": {
            "message_id": format!("welcome-{session_id}"),
            "message_type": "session_welcome",
            "message_timestamp": "2024-05-01T12:00:00.000000000Z"
        },
        "payload": {"session": {
            "id": session_id,
            "status": "connected",
            "connected_at": "2024-05-01T12:00:00.000000000Z",
            "keepalive_timeout_seconds": keepalive_secs,
            "reconnect_url": null
        }}
    })
    .to_string()
}

pub fn keepalive_json(message_id: &str) -> String {
    json!({
        "metadata": {
            "message_id": message_id,
            "message_type": "session_keepalive",
            "message_timestamp": "2024-05-01T12:00:05.000000000Z"
        },
        "payload": {}
    })
    .to_string()
}

pub fn reconnect_json(url: &str) -> String {
    json!({
        "metadata": {
            "message_id": "reconnect-1",
            "message_type": "session_reconnect",
            "message_timestamp": "2024-05-01T12:00:10.000000000Z"
        },
        "payload": {"session": {
            "id": "old-session",
            "status": "reconnecting",
            "keepalive_timeout_seconds": null,
            "reconnect_url": url,
            "connected_at": "2024-05-01T12:00:00.000000000Z"
        }}
    })
    .to_string()
}

pub fn notification_json(message_id: &str, text: &str) -> String {
    json!({
        "metadata": {
            "message_id": message_id,
            "message_type": "notification",
            "message_timestamp": "2024-05-01T12:00:07.000000000Z",
            "subscription_type": "channel.chat.message",
            "subscription_version": "1"
        },
        "payload": {
            "subscription": {
                "id": "remote-1",
                "status": "enabled",
                "type": "channel.chat.message",
                "version": "1",
                "condition": {"broadcaster_user_id": "1001", "user_id": "9999"}
            },
            "event": {"message_id": message_id, "message": {"text": text, "fragments": []}}
        }
    })
    .to_string()
}
