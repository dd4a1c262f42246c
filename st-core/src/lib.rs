//! StreamTweaks Core - Foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by all other StreamTweaks crates:
//! - Application configuration (OAuth, Helix, EventSub, logging)
//! - A single error type covering every failure category
//! - Structured logging with tracing
//! - Platform directories and common constants

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod paths;

// Re-export commonly used items at the crate root
pub use config::{AppConfig, ConfigHandle};
pub use error::{StError, StResult};
pub use logging::init_logging;
