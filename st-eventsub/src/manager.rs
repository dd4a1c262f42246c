//! EventSub subscription manager.
//!
//! Keeps the caller's desired set of subscriptions in sync with the live
//! WebSocket session. All state lives in a single actor task; public methods,
//! transport events, keepalive deadlines and REST completions reach it as
//! messages on one queue and are handled in the order they were sent.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use st_api::{HelixApi, SubscriptionSpec};
use st_core::config::EventSubConfig;
use st_core::error::{StError, StResult};

use crate::keepalive::KeepaliveMonitor;
use crate::messages::{EventNotification, Revocation, SessionInfo};
use crate::scheduler::Scheduler;
use crate::transport::{Transport, TransportEvent, WebSocketTransport};

/// Receives decoded events. Runs on the manager task and must not block.
pub trait EventHandler: Send + Sync {
    fn on_notification(&self, notification: &EventNotification);

    fn on_revocation(&self, revocation: &Revocation) {
        let _ = revocation;
    }
}

impl<F> EventHandler for F
where
    F: Fn(&EventNotification) + Send + Sync,
{
    fn on_notification(&self, notification: &EventNotification) {
        self(notification)
    }
}

/// Where the manager is in the session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    /// Nothing desired, no connection wanted.
    NoSession,
    /// Subscriptions are desired and a connection is being established.
    Pending,
    /// A welcomed session is live.
    Active { session_id: String },
}

/// Settings for a [`SubscriptionManager`].
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Endpoint for fresh sessions.
    pub url: String,
    pub keepalive_margin: Duration,
    pub handled_history: usize,
}

impl ManagerOptions {
    pub fn from_config(config: &EventSubConfig) -> Self {
        Self {
            url: config.url.clone(),
            keepalive_margin: config.keepalive_margin(),
            handled_history: config.handled_message_history,
        }
    }
}

/// Point-in-time view of the manager's bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct ManagerSnapshot {
    pub desired: Vec<SubscriptionSpec>,
    pub subscription_ids: HashMap<SubscriptionSpec, String>,
    pub session_id: Option<String>,
}

enum Command {
    AddDesired(SubscriptionSpec),
    RemoveDesired(SubscriptionSpec),
    EnsureConnected,
    /// Deadline of the given keepalive generation expired.
    KeepaliveTimeout(u64),
    /// Shares the queue with caller commands so both are handled in send order.
    Transport(TransportEvent),
    Created {
        spec: SubscriptionSpec,
        session_id: String,
        result: StResult<String>,
    },
    Snapshot(oneshot::Sender<ManagerSnapshot>),
    Shutdown,
}

/// Handle to the manager task.
pub struct SubscriptionManager {
    commands: mpsc::UnboundedSender<Command>,
    phase_rx: watch::Receiver<SessionPhase>,
    transport: Arc<dyn Transport>,
    keepalive: Arc<KeepaliveMonitor>,
    scheduler: Arc<Scheduler>,
    shut_down: AtomicBool,
}

impl SubscriptionManager {
    /// Start the manager on the current Tokio runtime.
    pub fn new(
        helix: Arc<dyn HelixApi>,
        transport: Arc<dyn Transport>,
        scheduler: Arc<Scheduler>,
        handler: Arc<dyn EventHandler>,
        options: ManagerOptions,
    ) -> StResult<Self> {
        StError::require_non_blank(&options.url, "eventsub url")?;
        let runtime = Handle::try_current()
            .map_err(|_| StError::Internal("subscription manager needs a Tokio runtime".into()))?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(SessionPhase::NoSession);

        let timeout_tx = commands_tx.clone();
        let keepalive = Arc::new(KeepaliveMonitor::new(
            Arc::clone(&scheduler),
            options.keepalive_margin,
            Arc::new(move |generation: u64| {
                let _ = timeout_tx.send(Command::KeepaliveTimeout(generation));
            }),
        ));

        let events_tx = commands_tx.clone();
        transport.set_listener(Arc::new(move |event: TransportEvent| {
            let _ = events_tx.send(Command::Transport(event));
        }));

        let actor = ManagerActor {
            helix,
            transport: Arc::clone(&transport),
            keepalive: Arc::clone(&keepalive),
            handler,
            url: options.url,
            commands_tx: commands_tx.clone(),
            phase_tx,
            desired: HashSet::new(),
            subscription_ids: HashMap::new(),
            pending_creates: HashSet::new(),
            session_id: None,
            handled: VecDeque::new(),
            handled_capacity: options.handled_history.max(1),
            runtime: runtime.clone(),
        };
        runtime.spawn(actor.run(commands_rx));

        Ok(Self {
            commands: commands_tx,
            phase_rx,
            transport,
            keepalive,
            scheduler,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Manager over a WebSocket transport with its own scheduler thread.
    pub fn with_websocket(
        helix: Arc<dyn HelixApi>,
        handler: Arc<dyn EventHandler>,
        config: &EventSubConfig,
    ) -> StResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| StError::Internal("subscription manager needs a Tokio runtime".into()))?;
        let scheduler = Arc::new(Scheduler::dedicated("eventsub-scheduler")?);
        let transport = Arc::new(WebSocketTransport::new(
            runtime,
            Arc::clone(&scheduler),
            config,
        )?);
        Self::new(
            helix,
            transport,
            scheduler,
            handler,
            ManagerOptions::from_config(config),
        )
    }

    /// Declare a subscription as wanted. Connects if needed.
    pub fn add_desired(&self, spec: SubscriptionSpec) -> StResult<()> {
        self.send(Command::AddDesired(spec))
    }

    /// Withdraw a subscription. Closes the connection when nothing is left.
    pub fn remove_desired(&self, spec: SubscriptionSpec) -> StResult<()> {
        self.send(Command::RemoveDesired(spec))
    }

    pub fn ensure_connected(&self) -> StResult<()> {
        self.send(Command::EnsureConnected)
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase_rx.borrow().clone()
    }

    pub fn phase_receiver(&self) -> watch::Receiver<SessionPhase> {
        self.phase_rx.clone()
    }

    pub async fn snapshot(&self) -> StResult<ManagerSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        rx.await
            .map_err(|_| StError::Shutdown("subscription manager"))
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Stop everything. Terminal; safe mid-handshake and safe to repeat.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("subscription manager shutting down");
        self.keepalive.stop();
        self.scheduler.shutdown();
        self.transport.allow_reconnect(false);
        self.transport.shutdown();
        let _ = self.commands.send(Command::Shutdown);
    }

    fn send(&self, command: Command) -> StResult<()> {
        if self.is_shut_down() {
            return Err(StError::Shutdown("subscription manager"));
        }
        self.commands
            .send(command)
            .map_err(|_| StError::Shutdown("subscription manager"))
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct ManagerActor {
    helix: Arc<dyn HelixApi>,
    transport: Arc<dyn Transport>,
    keepalive: Arc<KeepaliveMonitor>,
    handler: Arc<dyn EventHandler>,
    url: String,
    commands_tx: mpsc::UnboundedSender<Command>,
    phase_tx: watch::Sender<SessionPhase>,
    desired: HashSet<SubscriptionSpec>,
    /// Keys are always a subset of `desired`.
    subscription_ids: HashMap<SubscriptionSpec, String>,
    /// Creates in flight for the current session.
    pending_creates: HashSet<SubscriptionSpec>,
    session_id: Option<String>,
    handled: VecDeque<String>,
    handled_capacity: usize,
    runtime: Handle,
}

impl ManagerActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!("subscription manager started");
        while let Some(command) = commands.recv().await {
            if matches!(command, Command::Shutdown) {
                break;
            }
            self.on_command(command);
        }
        self.keepalive.stop();
        debug!("subscription manager stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::AddDesired(spec) => self.add_desired(spec),
            Command::RemoveDesired(spec) => self.remove_desired(spec),
            Command::EnsureConnected => self.ensure_connected(),
            Command::KeepaliveTimeout(generation) => {
                if self.keepalive.is_current(generation) {
                    self.on_keepalive_timeout();
                } else {
                    debug!("superseded keepalive timeout (generation {}) ignored", generation);
                }
            }
            Command::Transport(event) => self.on_transport_event(event),
            Command::Created {
                spec,
                session_id,
                result,
            } => self.on_created(spec, session_id, result),
            Command::Snapshot(reply) => {
                let _ = reply.send(ManagerSnapshot {
                    desired: self.desired.iter().cloned().collect(),
                    subscription_ids: self.subscription_ids.clone(),
                    session_id: self.session_id.clone(),
                });
            }
            Command::Shutdown => {}
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Welcome(session) => self.on_welcome(session),
            TransportEvent::Keepalive => self.keepalive.on_keepalive(),
            TransportEvent::Reconnect(url) => {
                info!("moving session to {}", url);
                if let Err(e) = self.transport.connect(&url) {
                    error!("reconnect to {} failed: {}", url, e);
                }
            }
            TransportEvent::Notification(notification) => self.on_notification(notification),
            TransportEvent::Revocation(revocation) => self.on_revocation(revocation),
            TransportEvent::Closed { code, reason } => {
                info!("session closed (code {}: {})", code, reason);
                self.end_session();
                if !self.desired.is_empty() {
                    self.ensure_connected();
                }
            }
            TransportEvent::Error(message) => debug!("transport reported: {}", message),
        }
    }

    fn add_desired(&mut self, spec: SubscriptionSpec) {
        info!("subscription desired: {}", spec);
        self.desired.insert(spec.clone());
        self.ensure_connected();

        if let Some(session_id) = self.session_id.clone() {
            if !self.subscription_ids.contains_key(&spec) && !self.pending_creates.contains(&spec) {
                self.request_create(spec, session_id);
            }
        }
    }

    fn remove_desired(&mut self, spec: SubscriptionSpec) {
        if !self.desired.remove(&spec) {
            debug!("remove of undesired subscription {} ignored", spec);
        } else {
            info!("subscription withdrawn: {}", spec);
        }
        self.pending_creates.remove(&spec);

        if let Some(id) = self.subscription_ids.remove(&spec) {
            self.request_delete(id);
        }

        if self.desired.is_empty() {
            self.disconnect();
        }
        self.publish_phase();
    }

    fn ensure_connected(&mut self) {
        if self.desired.is_empty() {
            self.disconnect();
            return;
        }
        if !self.transport.is_open() {
            self.transport.allow_reconnect(true);
            if let Err(e) = self.transport.connect(&self.url) {
                error!("connect to {} failed: {}", self.url, e);
            }
        }
        self.publish_phase();
    }

    fn disconnect(&mut self) {
        self.transport.allow_reconnect(false);
        self.transport.close();
        self.keepalive.stop();
        self.end_session();
    }

    fn on_keepalive_timeout(&mut self) {
        warn!("keepalive timeout, forcing reconnect");
        self.end_session();
        self.transport.close();
        if self.desired.is_empty() {
            return;
        }
        self.transport.allow_reconnect(true);
        if let Err(e) = self.transport.connect(&self.url) {
            error!("reconnect to {} failed: {}", self.url, e);
        }
    }

    fn on_welcome(&mut self, session: SessionInfo) {
        self.keepalive.start(session.keepalive_timeout);
        self.subscription_ids.clear();
        self.pending_creates.clear();
        self.session_id = Some(session.id.clone());
        self.publish_phase();

        if self.desired.is_empty() {
            debug!("welcome with nothing desired, closing");
            self.disconnect();
            return;
        }

        let specs: Vec<SubscriptionSpec> = self.desired.iter().cloned().collect();
        for spec in specs {
            self.request_create(spec, session.id.clone());
        }
    }

    fn on_created(&mut self, spec: SubscriptionSpec, session_id: String, result: StResult<String>) {
        if self.session_id.as_deref() != Some(session_id.as_str()) {
            debug!("create result for {} from old session {} discarded", spec, session_id);
            if let Ok(id) = result {
                if !self.desired.contains(&spec) {
                    self.request_delete(id);
                }
            }
            return;
        }
        self.pending_creates.remove(&spec);

        match result {
            Ok(id) if self.desired.contains(&spec) => {
                debug!("subscription {} -> {}", spec, id);
                self.subscription_ids.insert(spec, id);
            }
            Ok(id) => {
                info!("{} was withdrawn while being created, deleting {}", spec, id);
                self.request_delete(id);
            }
            Err(e) => {
                // Retried with the next session.
                warn!("creating {} failed: {}", spec, e);
            }
        }
    }

    fn on_notification(&mut self, notification: EventNotification) {
        self.keepalive.on_keepalive();

        if !notification.message_id.is_empty() {
            if self.handled.contains(&notification.message_id) {
                debug!("duplicate message {} skipped", notification.message_id);
                return;
            }
            self.handled.push_back(notification.message_id.clone());
            while self.handled.len() > self.handled_capacity {
                self.handled.pop_front();
            }
        }

        let handler = Arc::clone(&self.handler);
        if catch_unwind(AssertUnwindSafe(|| handler.on_notification(&notification))).is_err() {
            error!(
                "notification handler panicked on {} ({})",
                notification.subscription_type, notification.message_id
            );
        }
    }

    fn on_revocation(&mut self, revocation: Revocation) {
        warn!(
            "subscription {} revoked: {}",
            revocation.subscription_type,
            revocation.reason.as_deref().unwrap_or("unknown reason")
        );
        if let Some(id) = revocation.subscription_id.as_deref() {
            self.subscription_ids.retain(|_, remote| remote != id);
        }

        let handler = Arc::clone(&self.handler);
        if catch_unwind(AssertUnwindSafe(|| handler.on_revocation(&revocation))).is_err() {
            error!("revocation handler panicked on {}", revocation.subscription_type);
        }
    }

    fn end_session(&mut self) {
        if let Some(id) = self.session_id.take() {
            debug!("session {} ended", id);
        }
        self.subscription_ids.clear();
        self.pending_creates.clear();
        self.keepalive.stop();
        self.publish_phase();
    }

    fn request_create(&mut self, spec: SubscriptionSpec, session_id: String) {
        self.pending_creates.insert(spec.clone());
        let helix = Arc::clone(&self.helix);
        let reply = self.commands_tx.clone();
        self.runtime.spawn(async move {
            let result = helix.create_subscription(&spec, &session_id).await;
            let _ = reply.send(Command::Created {
                spec,
                session_id,
                result,
            });
        });
    }

    fn request_delete(&self, subscription_id: String) {
        let helix = Arc::clone(&self.helix);
        self.runtime.spawn(async move {
            if let Err(e) = helix.delete_subscription(&subscription_id).await {
                warn!("deleting subscription {} failed: {}", subscription_id, e);
            }
        });
    }

    fn publish_phase(&self) {
        let next = match (&self.session_id, self.desired.is_empty()) {
            (Some(id), _) => SessionPhase::Active {
                session_id: id.clone(),
            },
            (None, false) => SessionPhase::Pending,
            (None, true) => SessionPhase::NoSession,
        };
        self.phase_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                debug!("session phase: {:?} -> {:?}", current, next);
                *current = next;
                true
            }
        });
    }
}
