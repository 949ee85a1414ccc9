//! # Printer Connection Settings
//!
//! Settings are kept in a single TOML file with one table per printer, keyed by the
//! printer id the host uses, plus a shared `[timing]` table for the simulation poll loop.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [printers.voron]
//! url = "http://voron.local/"
//! duet_password = "reprap"
//! http_user = "admin"
//! http_password = "secret"
//! embed_thumbnails = true
//! thumbnail_sizes = "48x48,240x240,320x320"
//!
//! [timing]
//! poll_initial_delay_ms = 2000
//! poll_interval_ms = 1000
//! request_timeout_ms = 120000
//! ```
//!
//! ## Example: Rust Usage
//!
//! ```rust
//! use duet_rrf::config::Config;
//! let toml_str = r#"
//! [printers.voron]
//! url = "http://voron.local"
//! "#;
//! let config: Config = toml::from_str(toml_str).unwrap();
//! let printer = config.printer("voron").unwrap();
//! assert_eq!(printer.connection().base_url, "http://voron.local/");
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::thumbnail::ThumbnailSpec;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("No settings for printer '{0}'")]
    UnknownPrinter(String),
    #[error("Invalid printer URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: &'static str },
    #[error("Invalid thumbnail size list: {0}")]
    InvalidThumbnailSize(String),
}

/// Top-level settings file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub printers: BTreeMap<String, PrinterSettings>,
    #[serde(default)]
    pub timing: TimingConfig,
}

/// Per-printer record as stored by the settings collaborator.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PrinterSettings {
    pub url: String,
    #[serde(default)]
    pub duet_password: String,
    #[serde(default)]
    pub http_user: String,
    #[serde(default)]
    pub http_password: String,
    #[serde(default)]
    pub embed_thumbnails: bool,
    #[serde(default = "default_thumbnail_sizes")]
    pub thumbnail_sizes: String,
}

/// Delays used by the simulation status poll loop.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TimingConfig {
    #[serde(default = "default_poll_initial_delay_ms")]
    pub poll_initial_delay_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound for a single HTTP exchange, upload included.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_initial_delay_ms: default_poll_initial_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl TimingConfig {
    pub fn poll_initial_delay(&self) -> Duration {
        Duration::from_millis(self.poll_initial_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Immutable connection record copied into every device session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Always ends with `/`.
    pub base_url: String,
    pub duet_password: String,
    pub http_user: Option<String>,
    pub http_password: Option<String>,
}

impl ConnectionConfig {
    pub fn new(url: &str, duet_password: &str, http_user: &str, http_password: &str) -> Self {
        let mut base_url = url.trim().to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let non_empty = |s: &str| if s.is_empty() { None } else { Some(s.to_string()) };
        Self {
            base_url,
            duet_password: duet_password.to_string(),
            http_user: non_empty(http_user),
            http_password: non_empty(http_password),
        }
    }

    /// HTTP Basic credentials, only when both user and password are configured.
    pub fn basic_auth(&self) -> Option<(&str, &str)> {
        match (&self.http_user, &self.http_password) {
            (Some(user), Some(password)) => Some((user.as_str(), password.as_str())),
            _ => None,
        }
    }
}

impl PrinterSettings {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            duet_password: String::new(),
            http_user: String::new(),
            http_password: String::new(),
            embed_thumbnails: false,
            thumbnail_sizes: default_thumbnail_sizes(),
        }
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig::new(&self.url, &self.duet_password, &self.http_user, &self.http_password)
    }

    pub fn thumbnail_spec(&self) -> Result<ThumbnailSpec, ConfigError> {
        ThumbnailSpec::parse(&self.thumbnail_sizes)
            .map_err(|e| ConfigError::InvalidThumbnailSize(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url(&self.url)?;
        self.thumbnail_spec()?;
        Ok(())
    }
}

impl Config {
    pub fn printer(&self, printer_id: &str) -> Result<&PrinterSettings, ConfigError> {
        self.printers
            .get(printer_id)
            .ok_or_else(|| ConfigError::UnknownPrinter(printer_id.to_string()))
    }

    /// Insert or replace the settings of one printer.
    pub fn set_printer(&mut self, printer_id: &str, settings: PrinterSettings) -> Result<(), ConfigError> {
        settings.validate()?;
        self.printers.insert(printer_id.to_string(), settings);
        Ok(())
    }

    /// Returns true when an entry was removed.
    pub fn remove_printer(&mut self, printer_id: &str) -> bool {
        self.printers.remove(printer_id).is_some()
    }
}

/// Accepts only plain `http://` or `https://` URLs; credentials in the URL are refused
/// because HTTP Basic auth is configured separately.
pub fn validate_url(url: &str) -> Result<(), ConfigError> {
    let invalid = |reason| ConfigError::InvalidUrl { url: url.to_string(), reason };
    if url.starts_with("\\\\") {
        return Err(invalid("UNC paths are not supported"));
    }
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| invalid("must start with http:// or https://"))?;
    if rest.is_empty() {
        return Err(invalid("missing host"));
    }
    if url.contains('@') {
        return Err(invalid("use http_user/http_password instead of credentials in the URL"));
    }
    Ok(())
}

// Default value functions
fn default_thumbnail_sizes() -> String { "48x48,240x240,320x320".to_string() }
fn default_poll_initial_delay_ms() -> u64 { 2000 }
fn default_poll_interval_ms() -> u64 { 1000 }
fn default_request_timeout_ms() -> u64 { 120_000 }

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                Err(ConfigError::Toml(e))
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            Err(ConfigError::Io(e))
        }
    }
}

/// Write configuration back as TOML.
pub fn save_config(path: &str, config: &Config) -> Result<(), ConfigError> {
    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    tracing::debug!("Saved {} printer entries to {}", config.printers.len(), path);
    Ok(())
}
