//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! the backend and identity service URLs, the optional identity publishable
//! key, and the last email used to sign in.
//!
//! Configuration is stored at `~/.config/crewdeck/config.json`. The
//! `CREWDECK_API_URL` and `CREWDECK_IDENTITY_URL` environment variables
//! (a `.env` file is honored) override the file at startup.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Application name used for config/storage/log directory paths
const APP_NAME: &str = "crewdeck";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment override for the backend base URL
const API_URL_ENV: &str = "CREWDECK_API_URL";

/// Environment override for the identity service URL
const IDENTITY_URL_ENV: &str = "CREWDECK_IDENTITY_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_base_url: String,
    pub identity_url: String,
    pub identity_api_key: Option<String>,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000/api".to_string(),
            identity_url: "http://localhost:9999/auth/v1".to_string(),
            identity_api_key: None,
            last_email: None,
        }
    }
}

impl Config {
    /// Load the config file and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            Self::default()
        };

        if let Ok(url) = std::env::var(API_URL_ENV) {
            config.api_base_url = url;
        }
        if let Ok(url) = std::env::var(IDENTITY_URL_ENV) {
            config.identity_url = url;
        }
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory the session store writes its records to.
    pub fn storage_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Directory for the log file. The TUI owns the terminal, so logs go
    /// to a file instead of stderr.
    pub fn log_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME).join("logs"))
    }
}
