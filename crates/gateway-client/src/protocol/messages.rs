//! Gateway message envelope
//!
//! Every frame on the wire, in either direction, decodes to one `GatewayMessage`.

use super::{HelloPayload, IdentifyPayload, OpCode, ReadyPayload, ResumePayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Gateway message envelope `{op, d, s, t}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayMessage {
    /// Operation code
    pub op: OpCode,

    /// Event data; `null` when the op carries none
    #[serde(default)]
    pub d: Value,

    /// Sequence number (Dispatch only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Event name (Dispatch only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayMessage {
    /// Envelope with no sequence or event name
    #[must_use]
    pub fn new(op: OpCode, d: Value) -> Self {
        Self { op, d, s: None, t: None }
    }

    // === Client Messages ===

    /// Identify (op=2)
    pub fn identify(payload: &IdentifyPayload) -> Result<Self, serde_json::Error> {
        Ok(Self::new(OpCode::Identify, serde_json::to_value(payload)?))
    }

    /// Resume (op=6)
    pub fn resume(payload: &ResumePayload) -> Result<Self, serde_json::Error> {
        Ok(Self::new(OpCode::Resume, serde_json::to_value(payload)?))
    }

    /// Heartbeat (op=1) carrying the last sequence, or `null` before any dispatch
    #[must_use]
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self::new(OpCode::Heartbeat, last_sequence.map_or(Value::Null, Value::from))
    }

    /// Presence update (op=3); the payload is opaque to the client
    #[must_use]
    pub fn presence_update(presence: Value) -> Self {
        Self::new(OpCode::PresenceUpdate, presence)
    }

    // === Server Messages ===

    /// Hello (op=10)
    #[must_use]
    pub fn hello(heartbeat_interval: u64) -> Self {
        Self::new(OpCode::Hello, serde_json::json!({ "heartbeat_interval": heartbeat_interval }))
    }

    /// Dispatch (op=0)
    #[must_use]
    pub fn dispatch(event_name: impl Into<String>, sequence: u64, data: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            d: data,
            s: Some(sequence),
            t: Some(event_name.into()),
        }
    }

    /// Heartbeat ACK (op=11)
    #[must_use]
    pub fn heartbeat_ack() -> Self {
        Self::new(OpCode::HeartbeatAck, Value::Null)
    }

    /// Reconnect request (op=7)
    #[must_use]
    pub fn reconnect() -> Self {
        Self::new(OpCode::Reconnect, Value::Null)
    }

    /// Invalid Session (op=9)
    #[must_use]
    pub fn invalid_session(resumable: bool) -> Self {
        Self::new(OpCode::InvalidSession, Value::Bool(resumable))
    }

    // === Parsing ===

    /// Parse the Hello payload (op=10)
    pub fn as_hello(&self) -> Option<HelloPayload> {
        if self.op != OpCode::Hello {
            return None;
        }
        HelloPayload::deserialize(&self.d).ok()
    }

    /// Parse the session fields of a READY dispatch
    pub fn as_ready(&self) -> Option<ReadyPayload> {
        if self.op != OpCode::Dispatch || self.t.as_deref() != Some(super::READY_EVENT) {
            return None;
        }
        ReadyPayload::deserialize(&self.d).ok()
    }

    /// The resumable flag of an Invalid Session message (op=9)
    pub fn as_invalid_session(&self) -> Option<bool> {
        if self.op != OpCode::InvalidSession {
            return None;
        }
        Some(self.d.as_bool().unwrap_or(false))
    }

    /// The sequence carried by a Heartbeat (op=1)
    pub fn as_heartbeat_seq(&self) -> Option<Option<u64>> {
        if self.op != OpCode::Heartbeat {
            return None;
        }
        Some(self.d.as_u64())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.t {
            Some(t) => {
                write!(f, "GatewayMessage(op={}, t={t}", self.op)?;
                if let Some(s) = self.s {
                    write!(f, ", s={s}")?;
                }
                write!(f, ")")
            }
            None => write!(f, "GatewayMessage(op={})", self.op),
        }
    }
}
