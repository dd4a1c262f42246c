//! CLI command implementations.

pub mod auth;
pub mod connect;
pub mod subscriptions;
pub mod whoami;

use console::style;

use st_core::config::ConfigHandle;
use st_core::error::{StError, StResult};
use st_services::{Service, TwitchService};

/// Build and start the Twitch service from config.
pub async fn create_service(config: &ConfigHandle) -> StResult<TwitchService> {
    let cfg = config.snapshot().await;
    if cfg.oauth.client_id.trim().is_empty() {
        return Err(StError::MissingConfig(
            "oauth.client_id (register an application at dev.twitch.tv)".into(),
        ));
    }
    let service = TwitchService::new(&cfg)?;
    service.init()?;
    Ok(service)
}

/// Create the service and make sure it holds a usable token.
pub async fn authenticated_service(config: &ConfigHandle) -> StResult<TwitchService> {
    let service = create_service(config).await?;
    service.ensure_authenticated(print_authorization_url).await?;
    Ok(service)
}

/// Shown when the browser flow needs the user.
pub fn print_authorization_url(url: &str) {
    println!(
        "{} Open this URL in your browser to authorize StreamTweaks:",
        style("AUTH").cyan().bold()
    );
    println!("  {url}");
    println!("  Waiting for the redirect...");
}

/// Truncate a string to a maximum number of characters, appending an ellipsis if truncated.
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    if max_chars > 3 {
        let head: String = s.chars().take(max_chars - 3).collect();
        format!("{head}...")
    } else {
        s.chars().take(max_chars).collect()
    }
}
