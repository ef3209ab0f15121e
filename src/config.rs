//! Configuration
//!
//! Layered settings: built-in defaults, then `~/.amelia/config.toml` (or an
//! explicit `--config` path), then `AMELIA__SECTION__KEY` environment variables.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix, e.g. `AMELIA__BOT__GREETING`.
const ENV_PREFIX: &str = "AMELIA";

/// Root of all bot state: `~/.amelia`.
pub fn amelia_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".amelia")
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub bot: BotConfig,
    pub reconnect: ReconnectConfig,
    pub version: VersionConfig,
    pub logging: LoggingConfig,
}

/// Where and how the linked session is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory holding `creds.json`, key files and the backend database.
    pub dir: PathBuf,
    /// Phone number used for pairing; prompted on stdin when unset.
    pub phone_number: Option<String>,
    /// Render pairing QR codes in the terminal.
    pub print_qr: bool,
    /// Wipe the credentials directory when the account logs the bot out.
    pub clear_session_on_logout: bool,
    /// Browser triple announced to WhatsApp: (client, browser, version).
    pub browser: [String; 3],
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dir: amelia_home().join("session"),
            phone_number: None,
            print_qr: false,
            clear_session_on_logout: true,
            browser: [
                "Amelia".to_string(),
                "Chrome".to_string(),
                "120.0.0.0".to_string(),
            ],
        }
    }
}

/// Reply texts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub name: String,
    /// Reply to `hi`.
    pub greeting: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "Amelia".to_string(),
            greeting: "Hello! Amelia bot is online!".to_string(),
        }
    }
}

/// Reconnect policy knobs. See [`crate::whatsapp::ReconnectPolicy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Consecutive failed cycles before giving up. 0 = unlimited.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Proportional jitter in `[0.0, 1.0]` applied to each delay.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter: 0.2,
        }
    }
}

impl ReconnectConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Where to look up the latest WhatsApp Web protocol version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionConfig {
    pub manifest_url: String,
    pub timeout_secs: u64,
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self {
            manifest_url:
                "https://raw.githubusercontent.com/WhiskeySockets/Baileys/master/src/Defaults/baileys-version.json"
                    .to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` overrides it.
    pub level: String,
    /// Directory for daily-rolling log files. Disabled when unset.
    pub dir: Option<PathBuf>,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            json: false,
        }
    }
}

impl Config {
    /// Default location of the config file.
    pub fn default_path() -> PathBuf {
        amelia_home().join("config.toml")
    }

    /// Load configuration from `path` (optional file) layered over defaults and
    /// under the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_path);

        tracing::debug!("Loading config from {}", path.display());

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Parse a TOML document layered over defaults, without touching disk or env.
    pub fn from_toml(source: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
