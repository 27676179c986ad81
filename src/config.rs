use crate::params::GenerationParams;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const API_KEY_ENV: &str = "HF_TOKEN";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// API key for the inference endpoint
    pub api_key: Option<String>,

    /// Hosted model identifier
    pub model: String,

    /// Base URL of the inference API
    pub base_url: String,

    /// Seconds to wait for the upstream connection
    pub connect_timeout_secs: u64,

    /// System prompt offered by the UI
    pub system_prompt: String,

    /// Generation parameters offered by the UI
    pub defaults: GenerationParams,

    /// Server addresses
    pub server: ServerConfig,
}

/// Addresses for the UI server and the redirect endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub ui_bind: String,
    pub redirect_bind: String,
    /// Where the redirect endpoint sends browsers
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ui_bind: "0.0.0.0:7860".to_string(),
            redirect_bind: "127.0.0.1:5000".to_string(),
            public_url: "http://localhost:7860".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_key: None,
            model: "HuggingFaceH4/zephyr-7b-beta".to_string(),
            base_url: "https://api-inference.huggingface.co".to_string(),
            connect_timeout_secs: 10,
            system_prompt: "You are a friendly Chatbot.".to_string(),
            defaults: GenerationParams::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Default location: `~/.pdfchat/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(home.join(".pdfchat").join("config.toml"))
    }

    /// Load configuration from `path`, or the default location.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        let config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
            Self::from_toml(&content)?
        } else {
            tracing::debug!(path = %config_path.display(), "no config file, using defaults");
            Config::default()
        };

        config
            .defaults
            .validate()
            .context("Invalid default generation parameters")?;

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Save configuration to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Get API key from config or environment
    pub fn get_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
    }
}
