//! Client configuration structs
//!
//! Loads configuration from environment variables (and a `.env` file when present).

use std::env;
use std::fmt;
use std::str::FromStr;

/// Main client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub app: AppSettings,
    pub gateway: GatewaySettings,
    pub reconnect: ReconnectConfig,
    pub heartbeat: HeartbeatConfig,
}

/// General application settings
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub name: String,
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "production" => Some(Self::Production),
            "staging" => Some(Self::Staging),
            "development" => Some(Self::Development),
            _ => None,
        }
    }
}

/// Gateway session settings
///
/// The token is never printed; `Debug` redacts it.
#[derive(Clone)]
pub struct GatewaySettings {
    pub token: String,
    /// Raw intents bitmask sent with Identify
    pub intents: u64,
    /// Static gateway endpoint; when unset the endpoint is discovered over HTTP
    pub url: Option<String>,
    pub api_base: String,
    pub version: u8,
    pub client_name: String,
    pub device_name: String,
}

impl fmt::Debug for GatewaySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewaySettings")
            .field("token", &"[redacted]")
            .field("intents", &self.intents)
            .field("url", &self.url)
            .field("api_base", &self.api_base)
            .field("version", &self.version)
            .field("client_name", &self.client_name)
            .field("device_name", &self.device_name)
            .finish()
    }
}

/// Automatic reconnect settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Consecutive failed opens tolerated before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_reconnect_initial_ms(),
            max_delay_ms: default_reconnect_max_ms(),
            max_attempts: default_reconnect_max_attempts(),
        }
    }
}

/// Heartbeat policy settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Reconnect when a heartbeat is due while the previous one is still unacknowledged
    pub missed_ack_reconnect: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            missed_ack_reconnect: true,
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "gateway-client".to_string()
}

fn default_intents() -> u64 {
    513 // GUILDS | GUILD_MESSAGES
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_version() -> u8 {
    10
}

fn default_client_name() -> String {
    "gateway-client".to_string()
}

fn default_reconnect_initial_ms() -> u64 {
    1_000
}

fn default_reconnect_max_ms() -> u64 {
    60_000
}

fn default_reconnect_max_attempts() -> u32 {
    10
}

impl ClientConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `GATEWAY_TOKEN` is missing or a value cannot be parsed
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("GATEWAY_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingVar("GATEWAY_TOKEN"))?;

        Ok(Self {
            app: AppSettings {
                name: lookup("APP_NAME").unwrap_or_else(default_app_name),
                env: match lookup("APP_ENV") {
                    Some(value) => Environment::parse(&value)
                        .ok_or(ConfigError::InvalidValue("APP_ENV", value))?,
                    None => Environment::default(),
                },
            },
            gateway: GatewaySettings {
                token,
                intents: parse_or(&lookup, "GATEWAY_INTENTS", default_intents)?,
                url: lookup("GATEWAY_URL").filter(|u| !u.trim().is_empty()),
                api_base: lookup("GATEWAY_API_BASE").unwrap_or_else(default_api_base),
                version: parse_or(&lookup, "GATEWAY_VERSION", default_version)?,
                client_name: lookup("GATEWAY_CLIENT_NAME").unwrap_or_else(default_client_name),
                device_name: lookup("GATEWAY_DEVICE_NAME").unwrap_or_else(default_client_name),
            },
            reconnect: ReconnectConfig {
                initial_delay_ms: parse_or(
                    &lookup,
                    "GATEWAY_RECONNECT_INITIAL_MS",
                    default_reconnect_initial_ms,
                )?,
                max_delay_ms: parse_or(&lookup, "GATEWAY_RECONNECT_MAX_MS", default_reconnect_max_ms)?,
                max_attempts: parse_or(
                    &lookup,
                    "GATEWAY_RECONNECT_MAX_ATTEMPTS",
                    default_reconnect_max_attempts,
                )?,
            },
            heartbeat: HeartbeatConfig {
                missed_ack_reconnect: parse_or(&lookup, "GATEWAY_MISSED_ACK_RECONNECT", || true)?,
            },
        })
    }
}

fn parse_or<F, T, D>(lookup: &F, key: &'static str, default: D) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    D: FnOnce() -> T,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key, raw)),
        None => Ok(default()),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
