//! Configuration management for guardrelay.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "guardrelay";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "relay.db";

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "GUARDRELAY_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `GUARDRELAY_`, sections split by `__`)
/// 2. TOML config file at `~/.config/guardrelay/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Push messaging configuration.
    pub messaging: MessagingConfig,
    /// Alert trigger configuration.
    pub trigger: TriggerConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the proxy endpoint listens on.
    pub bind: String,
    /// Route of the proxy write endpoint.
    pub proxy_route: String,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/guardrelay/relay.db`
    pub database_path: Option<PathBuf>,
}

/// Which push transport to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagingBackend {
    /// Firebase Cloud Messaging HTTP v1 API.
    #[default]
    Fcm,
    /// Log every message instead of sending it.
    Log,
}

impl std::fmt::Display for MessagingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fcm => write!(f, "fcm"),
            Self::Log => write!(f, "log"),
        }
    }
}

/// Push messaging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Transport backend.
    pub backend: MessagingBackend,
    /// Base URL of the FCM API.
    pub endpoint: String,
    /// Firebase project id.
    pub project_id: Option<String>,
    /// OAuth2 access token used as bearer credential.
    ///
    /// Serializes as `"<redacted>"`.
    #[serde(serialize_with = "serialize_redacted")]
    pub access_token: Option<SecretString>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

fn serialize_redacted<S: Serializer>(
    secret: &Option<SecretString>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match secret {
        Some(_) => serializer.serialize_some("<redacted>"),
        None => serializer.serialize_none(),
    }
}

/// Alert trigger configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Capacity of the queue between store writes and the dispatcher.
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            proxy_route: "/proxyToFirebase".to_string(),
        }
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            backend: MessagingBackend::Fcm,
            endpoint: "https://fcm.googleapis.com".to_string(),
            project_id: None,
            access_token: None,
            timeout_secs: 10,
        }
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config: Config = Self::figment(config_path).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration without validating it.
    ///
    /// Used by commands that never touch the push transport.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_unchecked(config_path: Option<PathBuf>) -> Result<Self> {
        Ok(Self::figment(config_path).extract()?)
    }

    /// Build the layered figment without extracting it.
    #[must_use]
    pub fn figment(config_path: Option<PathBuf>) -> Figment {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file).nested())
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.server.bind.parse::<SocketAddr>().is_err() {
            return Err(Error::config_validation(format!(
                "server.bind is not a socket address: {}",
                self.server.bind
            )));
        }

        if let Err(reason) = check_route(&self.server.proxy_route) {
            return Err(Error::config_validation(format!(
                "server.proxy_route {reason}: {}",
                self.server.proxy_route
            )));
        }

        if self.messaging.timeout_secs == 0 {
            return Err(Error::config_validation(
                "messaging.timeout_secs must be greater than 0",
            ));
        }

        if self.messaging.backend == MessagingBackend::Fcm {
            if is_blank(self.messaging.project_id.as_deref()) {
                return Err(Error::config_validation(
                    "messaging.project_id is required for the fcm backend",
                ));
            }
            if is_blank(
                self.messaging
                    .access_token
                    .as_ref()
                    .map(ExposeSecret::expose_secret),
            ) {
                return Err(Error::config_validation(
                    "messaging.access_token is required for the fcm backend",
                ));
            }
        }

        if self.trigger.queue_capacity == 0 {
            return Err(Error::config_validation(
                "trigger.queue_capacity must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the bind address.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured address does not parse.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server.bind.parse().map_err(|_| {
            Error::config_validation(format!(
                "server.bind is not a socket address: {}",
                self.server.bind
            ))
        })
    }

    /// Get the messaging timeout as a Duration.
    #[must_use]
    pub fn messaging_timeout(&self) -> Duration {
        Duration::from_secs(self.messaging.timeout_secs)
    }
}

/// The proxy route must be a literal path the router can mount.
fn check_route(route: &str) -> std::result::Result<(), &'static str> {
    if !route.starts_with('/') {
        return Err("must start with '/'");
    }
    if route == "/" {
        return Ok(());
    }
    if route[1..].split('/').any(str::is_empty) {
        return Err("must not contain empty segments");
    }
    if route.contains(['*', ':', '{', '}']) {
        return Err("must be a literal path without '*', ':', '{' or '}'");
    }
    Ok(())
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}
