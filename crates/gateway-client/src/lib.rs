//! # gateway-client
//!
//! Client for a persistent, resumable real-time gateway connection.
//!
//! [`GatewayConnection`] opens a transport, performs the Hello → Identify/Resume
//! handshake, keeps the connection alive with jittered heartbeats, serializes
//! outbound frames through a single FIFO writer, and reconnects according to
//! the gateway's close codes. Application events are published to
//! subscribers as [`GatewayEvent`]s.

pub mod codec;
pub mod connection;
pub mod error;
pub mod events;
pub mod protocol;
pub mod resolver;
pub mod transport;

pub use codec::{Codec, JsonCodec};
pub use connection::{ConnectionState, GatewayConnection, GatewayConnectionBuilder};
pub use error::{GatewayError, GatewayResult};
pub use events::{DispatchEvent, GatewayEvent};
pub use protocol::{GatewayMessage, Intents, OpCode};
