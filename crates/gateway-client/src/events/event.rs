//! Gateway event fan-out types

use serde_json::Value;
use std::time::Duration;

/// An application event delivered by a Dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchEvent {
    /// Event name from the `t` field, e.g. `MESSAGE_CREATE`
    pub name: String,
    pub sequence: Option<u64>,
    /// Event payload, passed through verbatim
    pub data: Value,
}

impl DispatchEvent {
    #[must_use]
    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }
}

/// Everything a subscriber can observe on a connection
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// Application event
    Dispatch(DispatchEvent),
    /// The server acknowledged a heartbeat
    Ack {
        /// Time from the heartbeat write to its acknowledgment
        latency: Option<Duration>,
    },
    /// Recoverable anomaly (invalid session, missed ack, ...)
    Warn(String),
    /// Recoverable error (malformed frame, transient close, failed reconnect attempt)
    Error(String),
    /// The transport closed with `code`; `reconnecting` tells whether the
    /// connection will come back by itself
    Closed { code: Option<u16>, reconnecting: bool },
    /// The connection stopped for good and needs caller intervention
    Fatal { code: Option<u16>, reason: String },
}

impl GatewayEvent {
    /// The dispatch carried by this event, if any
    #[must_use]
    pub fn as_dispatch(&self) -> Option<&DispatchEvent> {
        match self {
            Self::Dispatch(dispatch) => Some(dispatch),
            _ => None,
        }
    }
}
