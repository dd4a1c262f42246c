//! Platform-specific directories.

use std::path::PathBuf;

use crate::constants::APP_NAME;
use crate::error::{StError, StResult};

/// Application data directory.
///
/// - Windows: `%APPDATA%/StreamTweaks`
/// - macOS: `~/Library/Application Support/StreamTweaks`
/// - Linux: `~/.local/share/StreamTweaks`
pub fn data_dir() -> StResult<PathBuf> {
    let base = dirs::data_dir()
        .ok_or_else(|| StError::Config("could not determine data directory".into()))?;
    Ok(base.join(APP_NAME))
}

/// Application configuration directory.
///
/// - Windows: `%APPDATA%/StreamTweaks`
/// - macOS: `~/Library/Application Support/StreamTweaks`
/// - Linux: `~/.config/StreamTweaks`
pub fn config_dir() -> StResult<PathBuf> {
    let base = dirs::config_dir()
        .ok_or_else(|| StError::Config("could not determine config directory".into()))?;
    Ok(base.join(APP_NAME))
}
