//! Gateway client error types

use crate::codec::CodecError;
use crate::resolver::ResolveError;
use crate::transport::TransportError;
use thiserror::Error;

/// Gateway client error type
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Send attempted before the handshake completed or after close
    #[error("Not connected")]
    NotConnected,

    /// `connect()` called while the connection is already running
    #[error("Connection is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The gateway closed the connection with a code that forbids reconnecting
    #[error("Gateway closed the connection: {reason}")]
    FatalClose { code: u16, reason: String },

    /// Identify/Resume could not be built
    #[error("Failed to build handshake: {0}")]
    Handshake(String),

    /// Automatic reconnect gave up after repeated failures
    #[error("Reconnect failed after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// The connection stopped while the operation was pending
    #[error("Connection closed")]
    Closed,
}

impl GatewayError {
    /// Whether the connection is permanently unusable until reconfigured
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::FatalClose { .. } | Self::Handshake(_) | Self::ReconnectExhausted { .. }
        )
    }
}

/// Gateway client result type
pub type GatewayResult<T> = Result<T, GatewayError>;
