//! Connect command - follow a channel's chat until interrupted.

use console::style;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use st_core::config::ConfigHandle;
use st_core::error::StResult;
use st_eventsub::SessionPhase;
use st_services::{AppEvent, ChatMessage, Service, TwitchService};

use crate::OutputFormat;

/// Run the connect command.
pub async fn run(config: ConfigHandle, login: Option<String>, format: OutputFormat) -> StResult<()> {
    println!("{} Authenticating...", style("[1/2]").bold().dim());
    let service = super::authenticated_service(&config).await?;

    let result = follow(&service, login.as_deref(), format).await;

    if let Err(e) = service.disconnect() {
        warn!("disconnect failed: {}", e);
    }
    service.shutdown()?;
    result
}

async fn follow(service: &TwitchService, login: Option<&str>, format: OutputFormat) -> StResult<()> {
    let mut rx = service.events();

    println!("{} Joining channel...", style("[2/2]").bold().dim());
    let state = service.connect_to_channel(login).await?;
    println!(
        "  {} Following #{} ({}). Ctrl+C to stop.",
        style("OK").green().bold(),
        state.resolved_login,
        state.display_name
    );
    println!();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => print_event(&event, format),
                    Err(RecvError::Lagged(n)) => {
                        println!("  {} Missed {n} events (slow consumer)", style("WARN").yellow());
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\n  Leaving #{}...", state.resolved_login);
                break;
            }
        }
    }
    Ok(())
}

fn print_event(event: &AppEvent, format: OutputFormat) {
    match (event, format) {
        (AppEvent::ChatMessageReceived(message), OutputFormat::Json) => {
            println!("{}", chat_json(message));
        }
        (AppEvent::ChatMessageReceived(message), OutputFormat::Text) => {
            let time = message.received_at.format("%H:%M:%S");
            let name = match message.color.as_deref().and_then(parse_hex_color) {
                Some((r, g, b)) => style(message.chatter_display_name.as_str())
                    .color256(ansi256(r, g, b))
                    .bold(),
                None => style(message.chatter_display_name.as_str()).bold(),
            };
            let bits = match message.bits() {
                0 => String::new(),
                n => format!(" {}", style(format!("[{n} bits]")).magenta()),
            };
            println!("{} {}: {}{}", style(time).dim(), name, message.display_text(), bits);
        }
        (AppEvent::SubscriptionRevoked { subscription_type, reason }, _) => {
            println!(
                "  {} {} revoked ({})",
                style("WARN").yellow(),
                subscription_type,
                reason.as_deref().unwrap_or("no reason given")
            );
        }
        (AppEvent::SessionPhaseChanged(phase), OutputFormat::Text) => match phase {
            SessionPhase::Active { session_id } => {
                println!("  {} session {}", style("LIVE").green(), style(session_id).dim())
            }
            SessionPhase::Pending => println!("  {} connecting...", style("....").dim()),
            SessionPhase::NoSession => {}
        },
        _ => {}
    }
}

fn chat_json(message: &ChatMessage) -> serde_json::Value {
    serde_json::json!({
        "message_id": message.message_id,
        "channel": message.broadcaster_login,
        "chatter": message.chatter_login,
        "display_name": message.chatter_display_name,
        "color": message.color,
        "text": message.display_text(),
        "bits": message.bits(),
        "received_at": message.received_at.to_rfc3339(),
    })
}

fn parse_hex_color(color: &str) -> Option<(u8, u8, u8)> {
    let hex = color.strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

/// Nearest entry of the 6x6x6 color cube.
fn ansi256(r: u8, g: u8, b: u8) -> u8 {
    let level = |c: u8| ((c as u16 * 5 + 127) / 255) as u8;
    16 + 36 * level(r) + 6 * level(g) + level(b)
}
