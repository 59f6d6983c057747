//! Events published to subscribers

mod event;

pub use event::{DispatchEvent, GatewayEvent};
