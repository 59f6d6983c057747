//! Transport abstraction
//!
//! The connection only needs to open a socket, write frames, close it, and
//! learn about inbound frames and the close code. `WebSocketTransport` is the
//! production implementation; tests substitute a scripted one.

mod websocket;

pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// A single transport frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Events reported by an open transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// An inbound frame
    Frame(Frame),
    /// The socket closed; `code` is absent when no close frame was received
    Closed { code: Option<u16> },
}

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("Failed to write frame: {0}")]
    Send(String),

    #[error("Transport is closed")]
    Closed,
}

/// Write half of an open transport
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Close the socket with the given close code
    async fn close(&mut self, code: u16) -> Result<(), TransportError>;
}

/// An open physical connection
pub struct Link {
    pub sink: Box<dyn FrameSink>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

/// Opens physical connections
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, url: &str) -> Result<Link, TransportError>;
}
