//! Payload definitions for the handshake messages

use super::Intents;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Payload for op 10 (Hello)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

/// Payload for op 2 (Identify)
#[derive(Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    pub token: String,
    pub intents: Intents,
    pub properties: IdentifyProperties,

    /// Initial presence, passed through untouched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_threshold: Option<u8>,
}

impl fmt::Debug for IdentifyPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentifyPayload")
            .field("token", &"[redacted]")
            .field("intents", &self.intents)
            .field("properties", &self.properties)
            .field("presence", &self.presence)
            .field("large_threshold", &self.large_threshold)
            .finish()
    }
}

/// Client connection properties sent with Identify
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyProperties {
    /// Operating system
    pub os: String,
    /// Client library name
    pub browser: String,
    /// Client device name
    pub device: String,
}

impl IdentifyProperties {
    /// Properties for this host with the given client and device names
    #[must_use]
    pub fn new(client_name: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: client_name.into(),
            device: device_name.into(),
        }
    }
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_NAME"))
    }
}

/// Payload for op 6 (Resume)
#[derive(Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    pub token: String,
    pub session_id: String,
    /// Last sequence number received
    pub seq: u64,
}

impl fmt::Debug for ResumePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumePayload")
            .field("token", &"[redacted]")
            .field("session_id", &self.session_id)
            .field("seq", &self.seq)
            .finish()
    }
}

/// Fields of the READY dispatch the connection itself needs
///
/// Everything else in the event is passed to subscribers untouched.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReadyPayload {
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
}
