//! Twitch service: authentication, channel connection and event fan-out.
//!
//! `TwitchService` ties the OAuth client, the Helix client and the EventSub
//! subscription manager together. At most one channel is connected at a
//! time; connecting to another channel swaps the chat subscription.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use st_api::{HelixApi, HelixClient, HelixCredentials, HelixUser, SubscriptionRecord, SubscriptionSpec};
use st_auth::{AuthResult, FileCredentialStore, OAuthClient};
use st_core::config::AppConfig;
use st_core::constants::subscription_types;
use st_core::error::{StError, StResult};
use st_eventsub::{
    EventHandler, EventNotification, Revocation, SessionPhase, SubscriptionManager,
};

use crate::chat::{ChatMessage, ChatMessageLog};
use crate::event_bus::{AppEvent, EventBus};
use crate::service::{Service, ServiceState};

const EVENT_BUS_CAPACITY: usize = 256;

/// The channel currently being followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub resolved_login: String,
    pub display_name: String,
    pub broadcaster_id: String,
    pub spec: SubscriptionSpec,
}

/// Decodes notifications from the manager and publishes them on the bus.
pub struct EventBridge {
    bus: EventBus,
    log: Arc<ChatMessageLog>,
}

impl EventBridge {
    pub fn new(bus: EventBus, log: Arc<ChatMessageLog>) -> Self {
        Self { bus, log }
    }
}

impl EventHandler for EventBridge {
    fn on_notification(&self, notification: &EventNotification) {
        if notification.subscription_type == subscription_types::CHANNEL_CHAT_MESSAGE {
            match ChatMessage::from_notification(notification) {
                Ok(message) => {
                    self.log.add(message.clone());
                    self.bus.emit(AppEvent::ChatMessageReceived(message));
                }
                Err(e) => warn!("dropping undecodable chat message {}: {}", notification.message_id, e),
            }
            return;
        }
        self.bus.emit(AppEvent::NotificationReceived {
            subscription_type: notification.subscription_type.clone(),
            message_id: notification.message_id.clone(),
            event: notification.event.clone(),
        });
    }

    fn on_revocation(&self, revocation: &Revocation) {
        self.bus.emit(AppEvent::SubscriptionRevoked {
            subscription_type: revocation.subscription_type.clone(),
            reason: revocation.reason.clone(),
        });
    }
}

/// Explicitly constructed entry point for everything Twitch.
pub struct TwitchService {
    helix: Arc<dyn HelixApi>,
    oauth: OAuthClient,
    manager: SubscriptionManager,
    bus: EventBus,
    log: Arc<ChatMessageLog>,
    connection: Mutex<Option<ConnectionState>>,
    state: Mutex<ServiceState>,
}

impl TwitchService {
    /// Build the full stack from configuration. Must run inside a Tokio runtime.
    pub fn new(config: &AppConfig) -> StResult<Self> {
        let store = Arc::new(FileCredentialStore::new(config.effective_credentials_path()?));
        let oauth = OAuthClient::new(config.oauth.clone(), store)?;
        let helix: Arc<dyn HelixApi> = Arc::new(HelixClient::new(&config.helix)?);

        let bus = EventBus::new(EVENT_BUS_CAPACITY);
        let log = Arc::new(ChatMessageLog::default());
        let bridge = Arc::new(EventBridge::new(bus.clone(), Arc::clone(&log)));
        let manager = SubscriptionManager::with_websocket(Arc::clone(&helix), bridge, &config.eventsub)?;

        Ok(Self::from_parts(helix, oauth, manager, bus, log))
    }

    /// Assemble from already-built parts. The manager's handler should be an
    /// [`EventBridge`] over the same `bus` and `log`.
    pub fn from_parts(
        helix: Arc<dyn HelixApi>,
        oauth: OAuthClient,
        manager: SubscriptionManager,
        bus: EventBus,
        log: Arc<ChatMessageLog>,
    ) -> Self {
        let service = Self {
            helix,
            oauth,
            manager,
            bus,
            log,
            connection: Mutex::new(None),
            state: Mutex::new(ServiceState::Created),
        };
        service.spawn_phase_forwarder();
        service
    }

    fn spawn_phase_forwarder(&self) {
        let mut phases = self.manager.phase_receiver();
        let bus = self.bus.clone();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no runtime, session phases will not be published");
            return;
        };
        runtime.spawn(async move {
            while phases.changed().await.is_ok() {
                let phase = phases.borrow_and_update().clone();
                bus.emit(AppEvent::SessionPhaseChanged(phase));
            }
        });
    }

    /// Obtain a token (cached or via the browser) and install it on the Helix client.
    ///
    /// `on_interaction` receives the authorization URL when the user must act.
    pub async fn ensure_authenticated<F>(&self, on_interaction: F) -> StResult<AuthResult>
    where
        F: FnOnce(&str) + Send,
    {
        self.ensure_running()?;
        let result = self.oauth.get_access_token(on_interaction).await?;
        let Some(token) = result.token() else {
            return Err(StError::AuthCancelled);
        };
        self.helix
            .set_credentials(HelixCredentials::new(token, self.oauth.client_id()))
            .await;
        match &result {
            AuthResult::NewAuthorization { login, .. } => {
                info!("authorized as {}", login.as_deref().unwrap_or("<unknown>"))
            }
            _ => debug!("using cached token"),
        }
        Ok(result)
    }

    /// The user owning the installed token.
    pub async fn whoami(&self) -> StResult<HelixUser> {
        self.helix.current_user().await
    }

    /// Follow a channel's chat. A blank or absent login means the authenticated user's own channel.
    pub async fn connect_to_channel(&self, login: Option<&str>) -> StResult<ConnectionState> {
        self.ensure_running()?;
        let me = self.helix.current_user().await?;
        let broadcaster = match login.map(str::trim).filter(|l| !l.is_empty()) {
            Some(login) => self.helix.resolve_user(login).await?,
            None => me.clone(),
        };

        let spec = SubscriptionSpec::chat_messages(&broadcaster.id, &me.id)?;
        let next = ConnectionState {
            resolved_login: broadcaster.login,
            display_name: broadcaster.display_name,
            broadcaster_id: broadcaster.id,
            spec: spec.clone(),
        };

        // Manager commands are queued under the lock so racing connects apply in order.
        // The new channel is added before the old one is dropped so the desired
        // set never empties and the live session carries over.
        let mut connection = self.connection.lock();
        let previous = connection.replace(next.clone());
        self.manager.add_desired(spec.clone())?;
        info!("joining #{} ({})", next.resolved_login, next.broadcaster_id);
        if let Some(previous) = previous {
            if previous.spec != spec {
                info!("leaving #{}", previous.resolved_login);
                self.manager.remove_desired(previous.spec)?;
            }
        }
        Ok(next)
    }

    /// Stop following the current channel. Returns what was connected.
    pub fn disconnect(&self) -> StResult<Option<ConnectionState>> {
        let mut connection = self.connection.lock();
        let Some(previous) = connection.take() else {
            debug!("disconnect with no channel connected");
            return Ok(None);
        };
        self.manager.remove_desired(previous.spec.clone())?;
        info!("left #{}", previous.resolved_login);
        Ok(Some(previous))
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.connection.lock().clone()
    }

    pub fn session_phase(&self) -> SessionPhase {
        self.manager.phase()
    }

    /// Subscriptions registered server-side for this client id.
    pub async fn list_subscriptions(&self) -> StResult<Vec<SubscriptionRecord>> {
        self.helix.list_subscriptions().await
    }

    pub fn events(&self) -> tokio::sync::broadcast::Receiver<AppEvent> {
        self.bus.subscribe()
    }

    pub fn recent_messages(&self) -> Vec<ChatMessage> {
        self.log.snapshot()
    }

    pub fn oauth(&self) -> &OAuthClient {
        &self.oauth
    }

    pub fn manager(&self) -> &SubscriptionManager {
        &self.manager
    }

    fn ensure_running(&self) -> StResult<()> {
        if *self.state.lock() == ServiceState::Stopped {
            return Err(StError::Shutdown("twitch service"));
        }
        Ok(())
    }
}

impl Service for TwitchService {
    fn name(&self) -> &str {
        "twitch"
    }

    fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    fn init(&self) -> StResult<()> {
        let mut state = self.state.lock();
        if *state == ServiceState::Stopped {
            return Err(StError::Shutdown("twitch service"));
        }
        *state = ServiceState::Running;
        Ok(())
    }

    fn shutdown(&self) -> StResult<()> {
        {
            let mut state = self.state.lock();
            if *state == ServiceState::Stopped {
                return Ok(());
            }
            *state = ServiceState::Stopped;
        }
        self.connection.lock().take();
        self.manager.shutdown();
        info!("twitch service stopped");
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.state() == ServiceState::Running && !self.manager.is_shut_down()
    }
}
