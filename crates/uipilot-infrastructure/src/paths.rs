//! Unified path management for uipilot files.
//!
//! # Directory Structure
//!
//! ```text
//! ~/.config/uipilot/           # Config directory
//! └── config.toml              # Application configuration
//!
//! ~/.local/share/uipilot/      # Data directory
//! ├── routes/                  # One JSON-lines file per session
//! └── logs/                    # Daily-rolling application logs
//! ```

use std::path::PathBuf;

const APP_DIR: &str = "uipilot";

/// Errors that can occur during path resolution.
#[derive(Debug)]
pub enum PathError {
    /// Home directory could not be determined.
    HomeDirNotFound,
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::HomeDirNotFound => write!(f, "Cannot find home directory"),
        }
    }
}

impl std::error::Error for PathError {}

pub struct PilotPaths;

impl PilotPaths {
    /// Returns the uipilot configuration directory (e.g. `~/.config/uipilot/`).
    pub fn config_dir() -> Result<PathBuf, PathError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or(PathError::HomeDirNotFound)
    }

    /// Returns the uipilot data directory (e.g. `~/.local/share/uipilot/`).
    pub fn data_dir() -> Result<PathBuf, PathError> {
        dirs::data_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or(PathError::HomeDirNotFound)
    }

    pub fn config_file() -> Result<PathBuf, PathError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Default location of the durable route store.
    pub fn routes_dir() -> Result<PathBuf, PathError> {
        Ok(Self::data_dir()?.join("routes"))
    }

    pub fn logs_dir() -> Result<PathBuf, PathError> {
        Ok(Self::data_dir()?.join("logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_live_under_the_app_directories() {
        if let (Ok(config), Ok(routes)) = (PilotPaths::config_file(), PilotPaths::routes_dir()) {
            assert!(config.ends_with("uipilot/config.toml"));
            assert!(routes.ends_with("uipilot/routes"));
        }
    }
}
