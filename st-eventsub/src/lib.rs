//! StreamTweaks EventSub - real-time subscription client.
//!
//! Maintains one long-lived WebSocket connection to Twitch EventSub,
//! negotiates a session, keeps the desired set of subscriptions created
//! against it, and recovers from disconnects, keepalive timeouts and
//! server-initiated reconnects.

pub mod backoff;
pub mod keepalive;
pub mod manager;
pub mod messages;
pub mod scheduler;
pub mod transport;

// Re-export key types
pub use backoff::{BackoffPolicy, ExponentialBackoff};
pub use keepalive::KeepaliveMonitor;
pub use manager::{EventHandler, ManagerOptions, ManagerSnapshot, SessionPhase, SubscriptionManager};
pub use messages::{EventNotification, Revocation, ServerMessage, SessionInfo};
pub use scheduler::{ScheduledTask, Scheduler};
pub use transport::{EventSink, Transport, TransportEvent, WebSocketTransport};
