//! EventSub transport client.
//!
//! Owns the raw WebSocket connection, decodes frames into [`TransportEvent`]s
//! handed to a single [`EventSink`], and reconnects to the last-used URL
//! with backoff when a connection drops while reconnects are allowed.
//!
//! Reconnect timers run on the shared [`Scheduler`], never on the I/O
//! runtime. `allow_reconnect(false)` followed by `close()` deterministically
//! stops every further attempt, including one already queued.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use st_core::config::EventSubConfig;
use st_core::error::{StError, StResult};

use crate::backoff::{BackoffPolicy, ExponentialBackoff};
use crate::messages::{self, EventNotification, Revocation, ServerMessage, SessionInfo};
use crate::scheduler::{ScheduledTask, Scheduler};

/// How long a locally closed connection waits for the peer's close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Everything the transport reports to its listener.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Welcome(SessionInfo),
    Keepalive,
    /// The server asked the client to move to a new URL.
    Reconnect(String),
    Notification(EventNotification),
    Revocation(Revocation),
    /// The live connection ended. Not sent for locally closed or replaced connections.
    Closed { code: u16, reason: String },
    /// A non-fatal fault: failed handshake, socket error, undecodable frame.
    Error(String),
}

/// Receives every [`TransportEvent`] in the order the transport produced it.
/// Called from I/O tasks; must not block.
pub type EventSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// Duplex connection to the EventSub service.
pub trait Transport: Send + Sync {
    /// Open a connection. No-op while an attempt is in flight or when
    /// already open to the same URL.
    fn connect(&self, url: &str) -> StResult<()>;

    /// Close every connection. Does not emit `Closed`.
    fn close(&self);

    fn is_open(&self) -> bool;

    fn set_listener(&self, listener: EventSink);

    /// Enable or disable automatic reconnects. Disabling cancels a queued reconnect.
    fn allow_reconnect(&self, allow: bool);

    fn set_backoff_policy(&self, policy: Arc<dyn BackoffPolicy>);

    /// Terminal close; later `connect` calls fail.
    fn shutdown(&self);
}

/// tokio-tungstenite implementation of [`Transport`].
pub struct WebSocketTransport {
    shared: Arc<Shared>,
}

struct Shared {
    io: Handle,
    scheduler: Arc<Scheduler>,
    connect_timeout: Duration,
    listener: Mutex<Option<EventSink>>,
    backoff: Mutex<Arc<dyn BackoffPolicy>>,
    connecting: AtomicBool,
    shut_down: AtomicBool,
    next_conn_id: AtomicU64,
    /// Lock order: `reconnect` before `conns`.
    reconnect: Mutex<ReconnectState>,
    conns: Mutex<Connections>,
}

#[derive(Default)]
struct ReconnectState {
    allowed: bool,
    job: Option<ScheduledTask>,
}

#[derive(Default)]
struct Connections {
    last_url: Option<String>,
    /// Bumped by `close()`; a handshake started under an older epoch is discarded.
    epoch: u64,
    active: Option<Connection>,
    /// Connections replaced by a reconnect-URL connection, closed once it is welcomed.
    retiring: Vec<Connection>,
}

struct Connection {
    id: u64,
    url: String,
    close_tx: oneshot::Sender<()>,
}

impl WebSocketTransport {
    pub fn new(io: Handle, scheduler: Arc<Scheduler>, config: &EventSubConfig) -> StResult<Self> {
        let backoff = ExponentialBackoff::from_config(&config.backoff)?;
        Ok(Self {
            shared: Arc::new(Shared {
                io,
                scheduler,
                connect_timeout: config.connect_timeout(),
                listener: Mutex::new(None),
                backoff: Mutex::new(Arc::new(backoff)),
                connecting: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                next_conn_id: AtomicU64::new(1),
                reconnect: Mutex::new(ReconnectState::default()),
                conns: Mutex::new(Connections::default()),
            }),
        })
    }

    /// URL of the most recent `connect` call.
    pub fn last_url(&self) -> Option<String> {
        self.shared.conns.lock().last_url.clone()
    }

    pub fn is_connecting(&self) -> bool {
        self.shared.connecting.load(Ordering::SeqCst)
    }

    pub fn reconnect_pending(&self) -> bool {
        self.shared.reconnect.lock().job.is_some()
    }
}

impl Transport for WebSocketTransport {
    fn connect(&self, url: &str) -> StResult<()> {
        let url = url.trim();
        StError::require_non_blank(url, "url")?;
        if self.shared.shut_down.load(Ordering::SeqCst) {
            return Err(StError::Shutdown("transport"));
        }
        self.shared.cancel_reconnect_job();
        self.shared.start_connect(url);
        Ok(())
    }

    fn close(&self) {
        self.shared.close_all();
    }

    fn is_open(&self) -> bool {
        self.shared.conns.lock().active.is_some()
    }

    fn set_listener(&self, listener: EventSink) {
        *self.shared.listener.lock() = Some(listener);
    }

    fn allow_reconnect(&self, allow: bool) {
        let mut reconnect = self.shared.reconnect.lock();
        reconnect.allowed = allow;
        if !allow {
            if let Some(job) = reconnect.job.take() {
                debug!("queued reconnect cancelled");
                job.cancel();
            }
        }
    }

    fn set_backoff_policy(&self, policy: Arc<dyn BackoffPolicy>) {
        *self.shared.backoff.lock() = policy;
    }

    fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.allow_reconnect(false);
        self.shared.close_all();
        info!("transport shut down");
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        let Some(sink) = self.listener.lock().clone() else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| sink(event))).is_err() {
            warn!("transport listener panicked");
        }
    }

    fn current_backoff(&self) -> Arc<dyn BackoffPolicy> {
        Arc::clone(&self.backoff.lock())
    }

    fn cancel_reconnect_job(&self) {
        if let Some(job) = self.reconnect.lock().job.take() {
            job.cancel();
        }
    }

    /// Must not take the `reconnect` lock; `reconnect_due` calls it while holding it.
    fn start_connect(self: &Arc<Self>, url: &str) {
        let epoch = {
            let mut conns = self.conns.lock();
            conns.last_url = Some(url.to_string());
            if conns.active.as_ref().is_some_and(|c| c.url == url) {
                debug!("already connected to {}", url);
                return;
            }
            conns.epoch
        };

        if self
            .connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("connect to {} skipped: attempt already in flight", url);
            return;
        }

        info!("connecting to {}", url);
        let shared = Arc::clone(self);
        let url = url.to_string();
        self.io.spawn(async move {
            shared.run_connection(url, epoch).await;
        });
    }

    async fn run_connection(self: Arc<Self>, url: String, epoch: u64) {
        let stream = match tokio::time::timeout(self.connect_timeout, connect_async(url.as_str())).await
        {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                self.connecting.store(false, Ordering::SeqCst);
                warn!("connect to {} failed: {}", url, e);
                self.emit(TransportEvent::Error(format!("connect failed: {e}")));
                self.schedule_reconnect_if_allowed("connect failed");
                return;
            }
            Err(_) => {
                self.connecting.store(false, Ordering::SeqCst);
                warn!("connect to {} timed out after {:?}", url, self.connect_timeout);
                self.emit(TransportEvent::Error("connect timed out".into()));
                self.schedule_reconnect_if_allowed("connect timed out");
                return;
            }
        };

        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (close_tx, close_rx) = oneshot::channel();
        let installed = {
            let mut conns = self.conns.lock();
            if conns.epoch != epoch || self.shut_down.load(Ordering::SeqCst) {
                false
            } else {
                let conn = Connection {
                    id,
                    url: url.clone(),
                    close_tx,
                };
                if let Some(previous) = conns.active.replace(conn) {
                    debug!(
                        "connection {} to {} replaced, retiring until welcome",
                        previous.id, previous.url
                    );
                    conns.retiring.push(previous);
                }
                true
            }
        };
        self.connecting.store(false, Ordering::SeqCst);

        if !installed {
            debug!("handshake with {} completed after close, discarding", url);
            let mut stream = stream;
            let _ = stream.close(None).await;
            self.schedule_reconnect_if_allowed("connect superseded by close");
            return;
        }

        self.current_backoff().reset();
        self.cancel_reconnect_job();
        info!("connected to {} (connection {})", url, id);

        let (code, reason) = self.read_loop(id, stream, close_rx).await;
        self.connection_ended(id, code, reason);
    }

    async fn read_loop(
        &self,
        id: u64,
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        mut close_rx: oneshot::Receiver<()>,
    ) -> (u16, String) {
        let (mut sink, mut source) = stream.split();

        loop {
            tokio::select! {
                _ = &mut close_rx => {
                    debug!("closing connection {}", id);
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client closed".into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    let _ = tokio::time::timeout(CLOSE_GRACE, async {
                        while let Some(Ok(msg)) = source.next().await {
                            if msg.is_close() {
                                break;
                            }
                        }
                    })
                    .await;
                    return (u16::from(CloseCode::Normal), "client closed".into());
                }
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_text(id, &text),
                    Some(Ok(Message::Close(frame))) => {
                        return frame
                            .map(|f| (u16::from(f.code), f.reason.into_owned()))
                            .unwrap_or((u16::from(CloseCode::Status), String::new()));
                    }
                    Some(Ok(Message::Binary(_))) => debug!("binary frame ignored"),
                    // Pongs are queued by tungstenite itself.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("connection {} errored: {}", id, e);
                        self.emit(TransportEvent::Error(e.to_string()));
                        return (u16::from(CloseCode::Abnormal), e.to_string());
                    }
                    None => return (u16::from(CloseCode::Abnormal), "connection dropped".into()),
                },
            }
        }
    }

    fn handle_text(&self, id: u64, text: &str) {
        let (is_active, is_current) = {
            let conns = self.conns.lock();
            let active = conns.active.as_ref().is_some_and(|c| c.id == id);
            (active, active || conns.retiring.iter().any(|c| c.id == id))
        };
        if !is_current {
            debug!("frame from closed connection {} dropped", id);
            return;
        }

        match messages::parse(text) {
            Ok(ServerMessage::Welcome(info)) => {
                if !is_active {
                    debug!("welcome on retiring connection {} ignored", id);
                    return;
                }
                info!("session {} established (keepalive {:?})", info.id, info.keepalive_timeout);
                self.retire_replaced();
                self.emit(TransportEvent::Welcome(info));
            }
            Ok(ServerMessage::Keepalive) => self.emit(TransportEvent::Keepalive),
            Ok(ServerMessage::Reconnect { url }) => {
                info!("server requested reconnect to {}", url);
                self.emit(TransportEvent::Reconnect(url));
            }
            Ok(ServerMessage::Notification(n)) => self.emit(TransportEvent::Notification(n)),
            Ok(ServerMessage::Revocation(r)) => self.emit(TransportEvent::Revocation(r)),
            Ok(ServerMessage::Unknown(kind)) => debug!("unknown message_type '{}' dropped", kind),
            Err(e) => {
                warn!("undecodable frame: {}", e);
                self.emit(TransportEvent::Error(e.to_string()));
            }
        }
    }

    fn retire_replaced(&self) {
        let retiring: Vec<Connection> = self.conns.lock().retiring.drain(..).collect();
        for conn in retiring {
            debug!("closing replaced connection {} to {}", conn.id, conn.url);
            let _ = conn.close_tx.send(());
        }
    }

    fn connection_ended(self: &Arc<Self>, id: u64, code: u16, reason: String) {
        let was_active = {
            let mut conns = self.conns.lock();
            if conns.active.as_ref().is_some_and(|c| c.id == id) {
                conns.active = None;
                true
            } else {
                conns.retiring.retain(|c| c.id != id);
                false
            }
        };

        if was_active {
            info!("connection {} closed (code {}: {})", id, code, reason);
            self.emit(TransportEvent::Closed { code, reason });
            self.schedule_reconnect_if_allowed("closed");
        } else {
            debug!("connection {} ended after close or replacement", id);
        }
    }

    fn close_all(&self) {
        self.cancel_reconnect_job();
        let closing: Vec<Connection> = {
            let mut conns = self.conns.lock();
            conns.epoch += 1;
            let mut closing: Vec<Connection> = conns.retiring.drain(..).collect();
            closing.extend(conns.active.take());
            closing
        };
        for conn in closing {
            debug!("closing connection {} to {}", conn.id, conn.url);
            let _ = conn.close_tx.send(());
        }
    }

    fn schedule_reconnect_if_allowed(self: &Arc<Self>, reason: &str) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        let mut reconnect = self.reconnect.lock();
        if !reconnect.allowed {
            return;
        }
        let Some(url) = self.conns.lock().last_url.clone() else {
            return;
        };

        let delay = self.current_backoff().next_delay();
        info!("reconnecting to {} in {:?} ({})", url, delay, reason);

        let weak = Arc::downgrade(self);
        let job = self.scheduler.schedule(delay, move || {
            if let Some(shared) = weak.upgrade() {
                shared.reconnect_due();
            }
        });
        if let Some(old) = std::mem::replace(&mut reconnect.job, job) {
            old.cancel();
        }
    }

    /// Runs on the scheduler thread.
    fn reconnect_due(self: &Arc<Self>) {
        let mut reconnect = self.reconnect.lock();
        reconnect.job = None;
        if !reconnect.allowed || self.shut_down.load(Ordering::SeqCst) {
            debug!("reconnect skipped: no longer allowed");
            return;
        }
        let url = self.conns.lock().last_url.clone();
        if let Some(url) = url {
            self.start_connect(&url);
        }
    }
}
