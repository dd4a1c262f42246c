//! EventSub subscription specifications.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde_json::{json, Value};

use st_core::constants::subscription_types;
use st_core::error::{StError, StResult};

/// What a caller wants subscribed: a topic type, its version and the
/// condition that scopes it.
///
/// Equality and hashing are structural, so a spec can key both the desired
/// set and the map of remote subscription ids. The condition is kept in a
/// sorted map so two specs built in different insertion orders compare equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    kind: String,
    version: String,
    condition: BTreeMap<String, Value>,
}

impl SubscriptionSpec {
    /// Build a spec, rejecting a blank type or version.
    pub fn new(
        kind: impl Into<String>,
        version: impl Into<String>,
        condition: BTreeMap<String, Value>,
    ) -> StResult<Self> {
        let kind = kind.into();
        let version = version.into();
        StError::require_non_blank(&kind, "subscription type")?;
        StError::require_non_blank(&version, "subscription version")?;
        Ok(Self {
            kind,
            version,
            condition,
        })
    }

    /// `channel.chat.message` v1 for the given broadcaster, read as `user_id`.
    pub fn chat_messages(broadcaster_user_id: &str, user_id: &str) -> StResult<Self> {
        StError::require_non_blank(broadcaster_user_id, "broadcaster_user_id")?;
        StError::require_non_blank(user_id, "user_id")?;

        let mut condition = BTreeMap::new();
        condition.insert(
            "broadcaster_user_id".to_string(),
            Value::String(broadcaster_user_id.to_string()),
        );
        condition.insert("user_id".to_string(), Value::String(user_id.to_string()));

        Self::new(
            subscription_types::CHANNEL_CHAT_MESSAGE,
            subscription_types::CHANNEL_CHAT_MESSAGE_VERSION,
            condition,
        )
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn condition(&self) -> &BTreeMap<String, Value> {
        &self.condition
    }

    /// Request body for `POST /eventsub/subscriptions` bound to a WebSocket session.
    pub fn creation_body(&self, session_id: &str) -> Value {
        json!({
            "type": self.kind,
            "version": self.version,
            "condition": self.condition,
            "transport": {
                "method": "websocket",
                "session_id": session_id,
            },
        })
    }
}

impl Hash for SubscriptionSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.version.hash(state);
        for (key, value) in &self.condition {
            key.hash(state);
            // serde_json maps are sorted, so the rendering is canonical.
            value.to_string().hash(state);
        }
    }
}

impl fmt::Display for SubscriptionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.kind, self.version)?;
        if !self.condition.is_empty() {
            let pairs: Vec<String> = self
                .condition
                .iter()
                .map(|(k, v)| match v {
                    Value::String(s) => format!("{k}={s}"),
                    other => format!("{k}={other}"),
                })
                .collect();
            write!(f, " [{}]", pairs.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_structural_equality_ignores_insertion_order() {
        let mut a = BTreeMap::new();
        a.insert("user_id".to_string(), json!("2"));
        a.insert("broadcaster_user_id".to_string(), json!("1"));
        let left = SubscriptionSpec::new("channel.chat.message", "1", a).unwrap();
        let right = SubscriptionSpec::chat_messages("1", "2").unwrap();

        assert_eq!(left, right);
        let set: HashSet<_> = [left, right].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_different_condition_is_different_key() {
        let a = SubscriptionSpec::chat_messages("1", "2").unwrap();
        let b = SubscriptionSpec::chat_messages("3", "2").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_blank_identifiers_rejected() {
        assert!(matches!(
            SubscriptionSpec::new(" ", "1", BTreeMap::new()),
            Err(StError::InvalidArgument(_))
        ));
        assert!(SubscriptionSpec::new("channel.follow", "", BTreeMap::new()).is_err());
        assert!(SubscriptionSpec::chat_messages("", "2").is_err());
    }

    #[test]
    fn test_creation_body_shape() {
        let spec = SubscriptionSpec::chat_messages("1", "2").unwrap();
        let body = spec.creation_body("session-xyz");
        assert_eq!(body["type"], "channel.chat.message");
        assert_eq!(body["version"], "1");
        assert_eq!(body["condition"]["broadcaster_user_id"], "1");
        assert_eq!(body["transport"]["method"], "websocket");
        assert_eq!(body["transport"]["session_id"], "session-xyz");
    }

    #[test]
    fn test_display() {
        let spec = SubscriptionSpec::chat_messages("1", "2").unwrap();
        assert_eq!(
            spec.to_string(),
            "channel.chat.message v1 [broadcaster_user_id=1, user_id=2]"
        );
    }
}
