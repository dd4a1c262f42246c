//! StreamTweaks CLI - follow Twitch chat from the terminal.
//!
//! Authenticates through the browser (implicit grant), then subscribes to
//! a channel's chat over EventSub and prints messages as they arrive.

mod commands;

use std::path::Path;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use st_core::config::{AppConfig, ConfigHandle};
use st_core::error::StResult;
use st_core::logging;

/// StreamTweaks - Twitch chat over EventSub.
#[derive(Parser)]
#[command(
    name = "streamtweaks",
    version,
    about = "Twitch EventSub chat client",
    long_about = "A command-line client that authorizes against Twitch and follows a\n\
                  channel's chat through an EventSub WebSocket session."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json).
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output for scripting.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize this client and cache the access token.
    Auth {
        /// Forget the cached token before authorizing.
        #[arg(long)]
        force: bool,
        /// Forget the cached token and exit.
        #[arg(long, conflicts_with = "force")]
        logout: bool,
    },
    /// Show the user the cached token belongs to.
    Whoami,
    /// Follow a channel's chat until Ctrl+C.
    Connect {
        /// Channel login. Defaults to your own channel.
        login: Option<String>,
    },
    /// List EventSub subscriptions registered for this client.
    Subscriptions,
}

#[tokio::main]
async fn main() -> StResult<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    let mut logging_config = config.logging.clone();
    if cli.verbose {
        logging_config.level = "debug".to_string();
    }
    let _guard = match config
        .effective_log_dir()
        .and_then(|dir| logging::init_logging(&logging_config, &dir))
    {
        Ok(guard) => Some(guard),
        Err(e) => {
            logging::init_console_logging(&logging_config.level);
            warn!("file logging unavailable, console only: {}", e);
            None
        }
    };

    let config_handle = ConfigHandle::new(config);

    info!("StreamTweaks CLI v{}", st_core::constants::APP_VERSION);

    match cli.command {
        Commands::Auth { force, logout } => {
            commands::auth::run(config_handle, force, logout, cli.format).await
        }
        Commands::Whoami => commands::whoami::run(config_handle, cli.format).await,
        Commands::Connect { login } => {
            commands::connect::run(config_handle, login, cli.format).await
        }
        Commands::Subscriptions => {
            commands::subscriptions::run(config_handle, cli.format).await
        }
    }
}

/// Both paths validate the loaded values before anything starts.
fn load_config(explicit: Option<&str>) -> StResult<AppConfig> {
    match explicit.map(Path::new) {
        Some(path) => AppConfig::load_from_file(path),
        None => AppConfig::load_default(),
    }
}
