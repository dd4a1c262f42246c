//! Helix response types.
//!
//! Helix wraps collection results in a common envelope:
//! ```json
//! { "data": [ ... ], "total": 1, "pagination": { "cursor": "..." } }
//! ```
//! and reports failures as `{ "error": "...", "status": 400, "message": "..." }`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Standard Helix collection envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct HelixResponse<T> {
    /// Result items.
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    /// Total number of matching items, when the endpoint reports it.
    #[serde(default)]
    pub total: Option<u64>,
    /// Cursor for the next page.
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

impl<T> HelixResponse<T> {
    /// Cursor of the next page, if there is one.
    pub fn next_cursor(&self) -> Option<&str> {
        self.pagination
            .as_ref()
            .and_then(|p| p.cursor.as_deref())
            .filter(|c| !c.is_empty())
    }
}

/// Pagination block of a Helix envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Helix error body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HelixErrorBody {
    /// Short error name (e.g. "Conflict").
    #[serde(default)]
    pub error: Option<String>,
    /// HTTP status echoed by the server.
    #[serde(default)]
    pub status: Option<u16>,
    /// Human-readable explanation.
    #[serde(default)]
    pub message: Option<String>,
}

impl HelixErrorBody {
    /// Best description of the failure, falling back to the raw body text.
    pub fn describe(raw: &str) -> String {
        match serde_json::from_str::<HelixErrorBody>(raw) {
            Ok(body) => body
                .message
                .filter(|m| !m.is_empty())
                .or(body.error)
                .unwrap_or_else(|| raw.to_string()),
            Err(_) => raw.to_string(),
        }
    }
}

/// An EventSub subscription as reported by Helix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Remote subscription id.
    pub id: String,
    /// Status, e.g. "enabled" or "websocket_disconnected".
    #[serde(default)]
    pub status: String,
    /// Subscription type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Subscription version.
    #[serde(default)]
    pub version: String,
    /// Condition object as sent on creation.
    #[serde(default)]
    pub condition: serde_json::Value,
    /// Creation time.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Cost against the subscription budget.
    #[serde(default)]
    pub cost: Option<u32>,
}

/// A Twitch user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelixUser {
    /// Numeric user id (as a string).
    pub id: String,
    /// Lowercase login name.
    pub login: String,
    /// Display name with the user's capitalization.
    pub display_name: String,
    /// "affiliate", "partner" or empty.
    #[serde(default)]
    pub broadcaster_type: String,
    #[serde(default)]
    pub profile_image_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_envelope() {
        let json = r#"{
            "data": [{
                "id": "f1c2a387-161a-49f9-a165-0f21d7a4e1c4",
                "status": "enabled",
                "type": "channel.chat.message",
                "version": "1",
                "condition": {"broadcaster_user_id": "1234", "user_id": "5678"},
                "created_at": "2024-02-13T09:37:16.548853Z",
                "transport": {"method": "websocket", "session_id": "abc"},
                "cost": 0
            }],
            "total": 1,
            "pagination": {}
        }"#;
        let resp: HelixResponse<SubscriptionRecord> = serde_json::from_str(json).unwrap();
        assert_eq!(resp.data.len(), 1);
        assert_eq!(resp.data[0].kind, "channel.chat.message");
        assert_eq!(resp.data[0].condition["broadcaster_user_id"], "1234");
        assert!(resp.next_cursor().is_none());
    }

    #[test]
    fn test_next_cursor() {
        let json = r#"{"data": [], "pagination": {"cursor": "eyJiIjpudWxs"}}"#;
        let resp: HelixResponse<HelixUser> = serde_json::from_str(json).unwrap();
        assert_eq!(resp.next_cursor(), Some("eyJiIjpudWxs"));
    }

    #[test]
    fn test_error_describe() {
        let raw = r#"{"error":"Conflict","status":409,"message":"subscription already exists"}"#;
        assert_eq!(HelixErrorBody::describe(raw), "subscription already exists");
        assert_eq!(HelixErrorBody::describe("gateway exploded"), "gateway exploded");
        assert_eq!(
            HelixErrorBody::describe(r#"{"error":"Unauthorized","status":401}"#),
            "Unauthorized"
        );
    }
}
