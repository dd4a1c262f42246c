//! Chat message decoding and a bounded in-memory log.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;

use st_core::constants::subscription_types;
use st_core::error::{StError, StResult};
use st_eventsub::EventNotification;

/// One piece of a chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text {
        text: String,
    },
    Emote {
        text: String,
        id: String,
        emote_set_id: Option<String>,
    },
    Mention {
        text: String,
        user_id: String,
        user_login: String,
    },
    Cheermote {
        text: String,
        prefix: String,
        bits: u64,
    },
}

impl Fragment {
    /// The text as typed in chat.
    pub fn text(&self) -> &str {
        match self {
            Self::Text { text }
            | Self::Emote { text, .. }
            | Self::Mention { text, .. }
            | Self::Cheermote { text, .. } => text,
        }
    }
}

/// A decoded `channel.chat.message` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub message_id: String,
    pub broadcaster_user_id: String,
    pub broadcaster_login: String,
    pub chatter_user_id: String,
    pub chatter_login: String,
    pub chatter_display_name: String,
    pub text: String,
    /// `#RRGGBB`, absent when the chatter never picked a color.
    pub color: Option<String>,
    /// `text`, `channel_points_highlighted`, `user_intro`, ...
    pub message_type: String,
    pub fragments: Vec<Fragment>,
    pub received_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawChatEvent {
    message_id: String,
    #[serde(default)]
    broadcaster_user_id: String,
    #[serde(default)]
    broadcaster_user_login: String,
    chatter_user_id: String,
    #[serde(default)]
    chatter_user_login: String,
    #[serde(default)]
    chatter_user_name: String,
    message: RawMessage,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    message_type: Option<String>,
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    text: String,
    #[serde(default)]
    fragments: Vec<RawFragment>,
}

#[derive(Deserialize)]
struct RawFragment {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    emote: Option<RawEmote>,
    #[serde(default)]
    mention: Option<RawMention>,
    #[serde(default)]
    cheermote: Option<RawCheermote>,
}

#[derive(Deserialize)]
struct RawEmote {
    id: String,
    #[serde(default)]
    emote_set_id: Option<String>,
}

#[derive(Deserialize)]
struct RawMention {
    user_id: String,
    #[serde(default)]
    user_login: String,
}

#[derive(Deserialize)]
struct RawCheermote {
    prefix: String,
    #[serde(default)]
    bits: u64,
}

impl RawFragment {
    fn into_fragment(self) -> Fragment {
        let text = self.text;
        match (self.kind.as_str(), self.emote, self.mention, self.cheermote) {
            ("emote", Some(e), _, _) => Fragment::Emote {
                text,
                id: e.id,
                emote_set_id: e.emote_set_id,
            },
            ("mention", _, Some(m), _) => Fragment::Mention {
                text,
                user_id: m.user_id,
                user_login: m.user_login,
            },
            ("cheermote", _, _, Some(c)) => Fragment::Cheermote {
                text,
                prefix: c.prefix,
                bits: c.bits,
            },
            _ => Fragment::Text { text },
        }
    }
}

impl ChatMessage {
    /// Decode the `event` object of a `channel.chat.message` notification.
    pub fn from_event(event: &Value, received_at: DateTime<Utc>) -> StResult<Self> {
        let raw = RawChatEvent::deserialize(event)
            .map_err(|e| StError::Protocol(format!("bad chat message event: {e}")))?;
        StError::require_non_blank(&raw.message_id, "message_id")?;

        Ok(Self {
            message_id: raw.message_id,
            broadcaster_user_id: raw.broadcaster_user_id,
            broadcaster_login: raw.broadcaster_user_login,
            chatter_user_id: raw.chatter_user_id,
            chatter_display_name: if raw.chatter_user_name.is_empty() {
                raw.chatter_user_login.clone()
            } else {
                raw.chatter_user_name
            },
            chatter_login: raw.chatter_user_login,
            text: raw.message.text,
            color: raw.color.filter(|c| !c.trim().is_empty()),
            message_type: raw.message_type.unwrap_or_else(|| "text".to_string()),
            fragments: raw
                .message
                .fragments
                .into_iter()
                .map(RawFragment::into_fragment)
                .collect(),
            received_at,
        })
    }

    /// Decode a notification, rejecting other subscription types.
    pub fn from_notification(notification: &EventNotification) -> StResult<Self> {
        if notification.subscription_type != subscription_types::CHANNEL_CHAT_MESSAGE {
            return Err(StError::InvalidArgument(format!(
                "not a chat message notification: {}",
                notification.subscription_type
            )));
        }
        Self::from_event(
            &notification.event,
            notification.timestamp.unwrap_or_else(Utc::now),
        )
    }

    /// Text rebuilt from fragments, falling back to the plain text.
    pub fn display_text(&self) -> String {
        if self.fragments.is_empty() {
            self.text.clone()
        } else {
            self.fragments.iter().map(Fragment::text).collect()
        }
    }

    /// Total bits cheered in this message.
    pub fn bits(&self) -> u64 {
        self.fragments
            .iter()
            .map(|f| match f {
                Fragment::Cheermote { bits, .. } => *bits,
                _ => 0,
            })
            .sum()
    }
}

/// Most recent chat messages, oldest first. A message id seen again replaces the older entry.
pub struct ChatMessageLog {
    inner: Mutex<LogInner>,
}

struct LogInner {
    capacity: usize,
    messages: VecDeque<ChatMessage>,
}

impl ChatMessageLog {
    pub const DEFAULT_CAPACITY: usize = 200;

    pub fn new(capacity: usize) -> StResult<Self> {
        if capacity == 0 {
            return Err(StError::InvalidArgument("capacity must be positive".into()));
        }
        Ok(Self {
            inner: Mutex::new(LogInner {
                capacity,
                messages: VecDeque::with_capacity(capacity),
            }),
        })
    }

    pub fn add(&self, message: ChatMessage) {
        let mut inner = self.inner.lock();
        inner.messages.retain(|m| m.message_id != message.message_id);
        inner.messages.push_back(message);
        inner.trim();
    }

    pub fn remove_by_id(&self, message_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.messages.len();
        inner.messages.retain(|m| m.message_id != message_id);
        inner.messages.len() != before
    }

    pub fn set_capacity(&self, capacity: usize) -> StResult<()> {
        if capacity == 0 {
            return Err(StError::InvalidArgument("capacity must be positive".into()));
        }
        let mut inner = self.inner.lock();
        inner.capacity = capacity;
        inner.trim();
        Ok(())
    }

    pub fn clear(&self) {
        self.inner.lock().messages.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.inner.lock().messages.iter().cloned().collect()
    }
}

impl Default for ChatMessageLog {
    fn default() -> Self {
        Self {
            inner: Mutex::new(LogInner {
                capacity: Self::DEFAULT_CAPACITY,
                messages: VecDeque::new(),
            }),
        }
    }
}

impl LogInner {
    fn trim(&mut self) {
        while self.messages.len() > self.capacity {
            self.messages.pop_front();
        }
    }
}
