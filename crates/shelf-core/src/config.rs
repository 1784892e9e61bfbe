//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/shelf/config.toml)
//! 3. Environment variables (SHELF_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::backend::hosted::DEFAULT_TABLE;

/// Environment variable prefix
const ENV_PREFIX: &str = "SHELF";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for local state (session file, logs)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Hosted backend project URL
    #[serde(default)]
    pub backend_url: Option<String>,

    /// Public API key of the hosted backend
    #[serde(default)]
    pub api_key: Option<String>,

    /// Table holding bookmark rows
    #[serde(default = "default_table")]
    pub table: String,

    /// Whether to open a realtime subscription for live updates
    #[serde(default = "default_true")]
    pub realtime_enabled: bool,

    /// OAuth provider used by `login`
    #[serde(default = "default_oauth_provider")]
    pub oauth_provider: String,

    /// Where the provider redirects after sign-in
    #[serde(default)]
    pub redirect_url: Option<String>,

    /// Log level filter (error, warn, info, debug, trace)
    #[serde(default)]
    pub log_level: Option<String>,

    /// Write logs to this file instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backend_url: None,
            api_key: None,
            table: default_table(),
            realtime_enabled: true,
            oauth_provider: default_oauth_provider(),
            redirect_url: None,
            log_level: None,
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (SHELF_DATA_DIR, SHELF_BACKEND_URL, SHELF_API_KEY, ...)
    /// 2. Config file (~/.config/shelf/config.toml or SHELF_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(format!("{}_BACKEND_URL", ENV_PREFIX)) {
            self.backend_url = non_empty(val);
        }

        if let Ok(val) = std::env::var(format!("{}_API_KEY", ENV_PREFIX)) {
            self.api_key = non_empty(val);
        }

        if let Ok(val) = std::env::var(format!("{}_REALTIME", ENV_PREFIX)) {
            self.realtime_enabled = parse_bool(&val);
        }

        if let Ok(val) = std::env::var(format!("{}_LOG", ENV_PREFIX)) {
            self.log_level = non_empty(val);
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, config_path: &PathBuf) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Set a value by key, as typed on the command line
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "data_dir" => self.data_dir = PathBuf::from(value),
            "backend_url" => self.backend_url = non_empty(value.to_string()),
            "api_key" => self.api_key = non_empty(value.to_string()),
            "table" => {
                if value.trim().is_empty() {
                    anyhow::bail!("table cannot be empty");
                }
                self.table = value.trim().to_string();
            }
            "realtime_enabled" => self.realtime_enabled = parse_bool(value),
            "oauth_provider" => self.oauth_provider = value.to_string(),
            "redirect_url" => self.redirect_url = non_empty(value.to_string()),
            "log_level" => self.log_level = non_empty(value.to_string()),
            "log_file" => self.log_file = non_empty(value.to_string()).map(PathBuf::from),
            _ => anyhow::bail!(
                "Unknown config key: {}. Valid keys: data_dir, backend_url, api_key, table, \
                 realtime_enabled, oauth_provider, redirect_url, log_level, log_file",
                key
            ),
        }
        Ok(())
    }

    /// Whether enough is configured to reach the hosted backend
    pub fn has_backend(&self) -> bool {
        self.backend_url.is_some() && self.api_key.is_some()
    }

    /// Get the config file path
    ///
    /// Can be overridden with SHELF_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shelf")
            .join("config.toml")
    }

    /// Get the path to the saved session
    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }
}

fn non_empty(val: String) -> Option<String> {
    if val.trim().is_empty() {
        None
    } else {
        Some(val)
    }
}

fn parse_bool(val: &str) -> bool {
    val.eq_ignore_ascii_case("true") || val == "1"
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shelf")
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

fn default_oauth_provider() -> String {
    "google".to_string()
}

fn default_true() -> bool {
    true
}
