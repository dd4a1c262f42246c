//! Application-wide constants.

/// Application name.
pub const APP_NAME: &str = "StreamTweaks";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default EventSub WebSocket endpoint.
pub const DEFAULT_EVENTSUB_URL: &str = "wss://eventsub.wss.twitch.tv/ws";

/// Helix REST API root.
pub const HELIX_API_BASE: &str = "https://api.twitch.tv/helix";

/// OAuth authorization endpoint (implicit grant).
pub const OAUTH_AUTHORIZE_URL: &str = "https://id.twitch.tv/oauth2/authorize";

/// OAuth token validation endpoint.
pub const OAUTH_VALIDATE_URL: &str = "https://id.twitch.tv/oauth2/validate";

/// Scope required to read chat over EventSub.
pub const SCOPE_USER_READ_CHAT: &str = "user:read:chat";

/// Default local port for the OAuth redirect listener.
pub const DEFAULT_CALLBACK_PORT: u16 = 7654;

/// Default path for the OAuth redirect listener.
pub const DEFAULT_CALLBACK_PATH: &str = "/callback";

/// Extra time granted on top of the server keepalive timeout, in milliseconds.
pub const KEEPALIVE_SAFETY_MARGIN_MS: u64 = 5_000;

/// Maximum number of notification message ids remembered for deduplication.
pub const MAX_HANDLED_MESSAGE_HISTORY: usize = 100;

/// File name of the cached credentials.
pub const CREDENTIALS_FILE_NAME: &str = "twitch-credentials.json";

/// EventSub subscription types used by the client.
pub mod subscription_types {
    /// Chat messages sent in a channel.
    pub const CHANNEL_CHAT_MESSAGE: &str = "channel.chat.message";

    /// Version of the chat message subscription.
    pub const CHANNEL_CHAT_MESSAGE_VERSION: &str = "1";
}

/// Message type discriminators of the EventSub WebSocket envelope.
pub mod message_types {
    pub const SESSION_WELCOME: &str = "session_welcome";
    pub const SESSION_KEEPALIVE: &str = "session_keepalive";
    pub const SESSION_RECONNECT: &str = "session_reconnect";
    pub const NOTIFICATION: &str = "notification";
    pub const REVOCATION: &str = "revocation";
}
