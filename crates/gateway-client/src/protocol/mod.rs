//! Gateway protocol definitions
//!
//! Op codes, close codes and their reconnect policy, the message envelope,
//! payloads and intents.

mod close_codes;
mod intents;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::{CloseCode, ClosePolicy};
pub(crate) use close_codes::describe as describe_close;
pub use intents::Intents;
pub use messages::GatewayMessage;
pub use opcodes::OpCode;
pub use payloads::{
    HelloPayload, IdentifyPayload, IdentifyProperties, ReadyPayload, ResumePayload,
};

/// Gateway API version spoken by this client
pub const GATEWAY_VERSION: u8 = 10;

/// Dispatch event name that establishes a session
pub const READY_EVENT: &str = "READY";

/// Dispatch event name that confirms a resumed session
pub const RESUMED_EVENT: &str = "RESUMED";
