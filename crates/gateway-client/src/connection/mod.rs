//! Gateway connection lifecycle
//!
//! Session state, heartbeat scheduling, the outbound send queue and the
//! connection orchestrator that ties them to a transport.

mod backoff;
mod driver;
mod gateway;
mod heartbeat;
mod queue;
mod session;
mod state;

pub use backoff::Backoff;
pub use gateway::{GatewayConnection, GatewayConnectionBuilder};
pub use heartbeat::{random_jitter, Heartbeater, Jitter};
pub use queue::{SendQueue, SendReceipt};
pub use session::{SequenceUpdate, SessionState};
pub use state::ConnectionState;
