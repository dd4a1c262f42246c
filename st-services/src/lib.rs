//! StreamTweaks Services - the layer the CLI talks to.
//!
//! This crate provides:
//! - The `Service` lifecycle trait
//! - `TwitchService`: authentication, channel connection and disconnection
//! - Chat message decoding and a bounded message log
//! - A broadcast event bus carrying decoded EventSub traffic

pub mod chat;
pub mod event_bus;
pub mod service;
pub mod twitch;

// Re-export key types
pub use chat::{ChatMessage, ChatMessageLog, Fragment};
pub use event_bus::{AppEvent, EventBus};
pub use service::{Service, ServiceState};
pub use twitch::{ConnectionState, EventBridge, TwitchService};
