//! Connection lifecycle state

use std::fmt;

/// Lifecycle of a gateway connection
///
/// `Idle → Connecting → AwaitingHello → Handshaking → Connected → Closing`,
/// then back to `Connecting` on reconnect or `Idle` once stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not running; `connect()` may be called
    #[default]
    Idle,
    /// Resolving the endpoint and opening the transport
    Connecting,
    /// Transport open, waiting for Hello
    AwaitingHello,
    /// Hello received, Identify/Resume being written
    Handshaking,
    /// Handshake written; application sends are allowed
    Connected,
    /// Tearing the transport down
    Closing,
}

impl ConnectionState {
    /// Whether application sends are permitted
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether a physical connection exists or is being set up
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Idle)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::AwaitingHello => "awaiting_hello",
            Self::Handshaking => "handshaking",
            Self::Connected => "connected",
            Self::Closing => "closing",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
