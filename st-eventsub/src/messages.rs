//! EventSub WebSocket wire messages.
//!
//! Every inbound frame is a JSON envelope:
//! ```json
//! { "metadata": { "message_id": "...", "message_type": "...", "message_timestamp": "..." },
//!   "payload": { ... } }
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use st_core::constants::message_types;
use st_core::error::{StError, StResult};

#[derive(Debug, Deserialize)]
struct Envelope {
    metadata: Metadata,
    #[serde(default)]
    payload: Value,
}

/// Envelope metadata common to every message type.
#[derive(Debug, Clone, Deserialize)]
pub struct Metadata {
    pub message_id: String,
    pub message_type: String,
    #[serde(default)]
    pub message_timestamp: Option<DateTime<Utc>>,
}

/// A negotiated session, produced by `session_welcome`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: String,
    pub status: Option<String>,
    pub keepalive_timeout: Duration,
    pub reconnect_url: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
}

/// A delivered event.
#[derive(Debug, Clone)]
pub struct EventNotification {
    /// Envelope message id, used for duplicate suppression.
    pub message_id: String,
    pub subscription_id: Option<String>,
    pub subscription_type: String,
    pub subscription_version: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    /// The raw `payload.event` object.
    pub event: Value,
}

/// A subscription the server stopped delivering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revocation {
    pub subscription_id: Option<String>,
    pub subscription_type: String,
    /// Subscription status, e.g. `authorization_revoked` or `version_removed`.
    pub reason: Option<String>,
}

/// Decoded inbound message.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    Welcome(SessionInfo),
    Keepalive,
    Reconnect { url: String },
    Notification(EventNotification),
    Revocation(Revocation),
    /// A message type this client does not handle.
    Unknown(String),
}

#[derive(Debug, Deserialize)]
struct SessionPayload {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    keepalive_timeout_seconds: Option<u64>,
    #[serde(default)]
    reconnect_url: Option<String>,
    #[serde(default)]
    connected_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionPayload {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Parse one text frame.
pub fn parse(text: &str) -> StResult<ServerMessage> {
    let envelope: Envelope = serde_json::from_str(text)
        .map_err(|e| StError::Protocol(format!("malformed envelope: {e}")))?;
    let Envelope { metadata, payload } = envelope;

    let message = match metadata.message_type.as_str() {
        message_types::SESSION_WELCOME => {
            let session: SessionPayload = field(&payload, "session")?;
            let timeout = session.keepalive_timeout_seconds.ok_or_else(|| {
                StError::Protocol("welcome without keepalive_timeout_seconds".into())
            })?;
            ServerMessage::Welcome(SessionInfo {
                id: session.id,
                status: session.status,
                keepalive_timeout: Duration::from_secs(timeout),
                reconnect_url: session.reconnect_url,
                connected_at: session.connected_at,
            })
        }
        message_types::SESSION_KEEPALIVE => ServerMessage::Keepalive,
        message_types::SESSION_RECONNECT => {
            let session: SessionPayload = field(&payload, "session")?;
            let url = session
                .reconnect_url
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| StError::Protocol("reconnect without reconnect_url".into()))?;
            ServerMessage::Reconnect { url }
        }
        message_types::NOTIFICATION => {
            let sub: SubscriptionPayload = field(&payload, "subscription")?;
            let event = match payload.get("event") {
                Some(v) if !v.is_null() => v.clone(),
                _ => Value::Object(Default::default()),
            };
            ServerMessage::Notification(EventNotification {
                message_id: metadata.message_id,
                subscription_id: sub.id,
                subscription_type: sub.kind,
                subscription_version: sub.version,
                timestamp: metadata.message_timestamp,
                event,
            })
        }
        message_types::REVOCATION => {
            let sub: SubscriptionPayload = field(&payload, "subscription")?;
            ServerMessage::Revocation(Revocation {
                subscription_id: sub.id,
                subscription_type: sub.kind,
                reason: sub.status,
            })
        }
        other => ServerMessage::Unknown(other.to_string()),
    };

    Ok(message)
}

fn field<T: serde::de::DeserializeOwned>(payload: &Value, name: &str) -> StResult<T> {
    let value = payload
        .get(name)
        .ok_or_else(|| StError::Protocol(format!("payload missing '{name}'")))?;
    T::deserialize(value).map_err(|e| StError::Protocol(format!("bad '{name}' object: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_welcome() {
        let json = r#"{
            "metadata": {
                "message_id": "96a3f3b5-5dec-4eed-908e-e11ee657416c",
                "message_type": "session_welcome",
                "message_timestamp": "2023-07-19T14:56:51.634234626Z"
            },
            "payload": {
                "session": {
                    "id": "AQoQILE98gtqShGmLD7AM6yJThAB",
                    "status": "connected",
                    "connected_at": "2023-07-19T14:56:51.616329898Z",
                    "keepalive_timeout_seconds": 10,
                    "reconnect_url": null
                }
            }
        }"#;
        match parse(json).unwrap() {
            ServerMessage::Welcome(info) => {
                assert_eq!(info.id, "AQoQILE98gtqShGmLD7AM6yJThAB");
                assert_eq!(info.status.as_deref(), Some("connected"));
                assert_eq!(info.keepalive_timeout, Duration::from_secs(10));
                assert!(info.reconnect_url.is_none());
                assert!(info.connected_at.is_some());
            }
            other => panic!("expected welcome, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_keepalive() {
        let json = r#"{
            "metadata": {"message_id": "k1", "message_type": "session_keepalive",
                         "message_timestamp": "2023-07-19T10:11:12.634234626Z"},
            "payload": {}
        }"#;
        assert!(matches!(parse(json).unwrap(), ServerMessage::Keepalive));
    }

    #[test]
    fn test_parse_reconnect() {
        let json = r#"{
            "metadata": {"message_id": "r1", "message_type": "session_reconnect",
                         "message_timestamp": "2022-11-18T09:10:11.634234626Z"},
            "payload": {"session": {
                "id": "AQoQexAWVYKSTIu4ec_2VAxyuhAB",
                "status": "reconnecting",
                "keepalive_timeout_seconds": null,
                "reconnect_url": "wss://eventsub.wss.twitch.tv?...",
                "connected_at": "2022-11-16T10:11:12.634234626Z"
            }}
        }"#;
        match parse(json).unwrap() {
            ServerMessage::Reconnect { url } => {
                assert_eq!(url, "wss://eventsub.wss.twitch.tv?...")
            }
            other => panic!("expected reconnect, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_notification() {
        let json = r#"{
            "metadata": {
                "message_id": "befa7b53-d79d-478f-86b9-120f112b044e",
                "message_type": "notification",
                "message_timestamp": "2022-11-16T10:11:12.464757833Z",
                "subscription_type": "channel.chat.message",
                "subscription_version": "1"
            },
            "payload": {
                "subscription": {
                    "id": "f1c2a387-161a-49f9-a165-0f21d7a4e1c4",
                    "status": "enabled",
                    "type": "channel.chat.message",
                    "version": "1",
                    "cost": 0,
                    "condition": {"broadcaster_user_id": "1971641", "user_id": "2914196"},
                    "transport": {"method": "websocket", "session_id": "AQoQexAWVYKSTIu4ec_2VAxyuhAB"},
                    "created_at": "2022-11-16T10:11:12.464757833Z"
                },
                "event": {"message_id": "cc106a89", "message": {"text": "Hi chat"}}
            }
        }"#;
        match parse(json).unwrap() {
            ServerMessage::Notification(n) => {
                assert_eq!(n.message_id, "befa7b53-d79d-478f-86b9-120f112b044e");
                assert_eq!(n.subscription_type, "channel.chat.message");
                assert_eq!(n.subscription_id.as_deref(), Some("f1c2a387-161a-49f9-a165-0f21d7a4e1c4"));
                assert_eq!(n.event["message"]["text"], "Hi chat");
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn test_notification_without_event_gets_empty_object() {
        let json = r#"{
            "metadata": {"message_id": "n2", "message_type": "notification"},
            "payload": {"subscription": {"id": "s", "type": "channel.follow"}, "event": null}
        }"#;
        match parse(json).unwrap() {
            ServerMessage::Notification(n) => assert!(n.event.as_object().unwrap().is_empty()),
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_revocation() {
        let json = r#"{
            "metadata": {"message_id": "84c1e79a", "message_type": "revocation",
                         "message_timestamp": "2022-11-16T10:11:12.464757833Z",
                         "subscription_type": "channel.chat.message", "subscription_version": "1"},
            "payload": {"subscription": {
                "id": "f1c2a387-161a-49f9-a165-0f21d7a4e1c4",
                "status": "authorization_revoked",
                "type": "channel.chat.message",
                "version": "1",
                "cost": 0,
                "condition": {"broadcaster_user_id": "12826"},
                "transport": {"method": "websocket", "session_id": "AQoQexAWVYKSTIu4ec_2VAxyuhAB"},
                "created_at": "2022-11-16T10:11:12.464757833Z"
            }}
        }"#;
        match parse(json).unwrap() {
            ServerMessage::Revocation(r) => {
                assert_eq!(r.subscription_type, "channel.chat.message");
                assert_eq!(r.reason.as_deref(), Some("authorization_revoked"));
            }
            other => panic!("expected revocation, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        let json = r#"{"metadata": {"message_id": "x", "message_type": "session_sparkles"}, "payload": {}}"#;
        assert!(matches!(parse(json).unwrap(), ServerMessage::Unknown(t) if t == "session_sparkles"));
    }

    #[test]
    fn test_malformed_frames_are_protocol_errors() {
        assert!(matches!(parse("not json"), Err(StError::Protocol(_))));
        assert!(matches!(parse(r#"{"payload": {}}"#), Err(StError::Protocol(_))));
        let welcome_without_session =
            r#"{"metadata": {"message_id": "w", "message_type": "session_welcome"}, "payload": {}}"#;
        assert!(matches!(parse(welcome_without_session), Err(StError::Protocol(_))));
    }
}
