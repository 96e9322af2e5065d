use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use thiserror::Error;

/// Top-level configuration for the Pigeon SMTP to alert bridge.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub smtp: SmtpConfig,

    #[serde(default)]
    pub alert: AlertConfig,
}

impl Config {
    /// Checks the settings that cannot be defaulted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.alert.dry_run && self.alert.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "alert.api_key is required unless alert.dry_run is set".to_string(),
            ));
        }
        if self.alert.account.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "alert.account must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// SMTP listener configuration.
#[derive(Debug, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Name announced in the greeting, system hostname when absent.
    #[serde(default)]
    pub hostname: Option<String>,

    /// Read deadline in seconds, `0` disables it.
    #[serde(default)]
    pub read_timeout: u64,

    /// Write deadline in seconds, `0` disables it.
    #[serde(default)]
    pub write_timeout: u64,

    /// Advertise `AUTH PLAIN` in the EHLO capability list.
    #[serde(default)]
    pub plain_auth: bool,

    /// Recipient address prefixes refused at RCPT time (e.g. "bad@").
    #[serde(default)]
    pub blocked_prefixes: Vec<String>,
}

impl SmtpConfig {
    /// Returns the `host:port` pair the listener binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        seconds(self.read_timeout)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        seconds(self.write_timeout)
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            hostname: None,
            read_timeout: 0,
            write_timeout: 0,
            plain_auth: false,
            blocked_prefixes: Vec::new(),
        }
    }
}

/// Alert delivery configuration.
#[derive(Debug, Deserialize)]
pub struct AlertConfig {
    /// API credential for the alert service.
    #[serde(default)]
    pub api_key: String,

    /// Account the alerts are attributed to.
    #[serde(default = "default_account")]
    pub account: String,

    #[serde(default = "default_alert_url")]
    pub url: String,

    /// Value of the alert `source` field, hostname when absent.
    #[serde(default)]
    pub source: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_alert_timeout")]
    pub timeout: u64,

    /// Log alerts instead of delivering them.
    #[serde(default)]
    pub dry_run: bool,
}

impl AlertConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            account: default_account(),
            url: default_alert_url(),
            source: None,
            timeout: default_alert_timeout(),
            dry_run: false,
        }
    }
}

/// Loads configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An I/O error occurred reading the file.
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A parse error occurred deserializing TOML.
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration parsed but is not usable.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

fn seconds(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    2500
}

fn default_account() -> String {
    "USER".to_string()
}

fn default_alert_url() -> String {
    "https://api.opsgenie.com/v2/alerts".to_string()
}

fn default_alert_timeout() -> u64 {
    30
}
