//! Wire codec
//!
//! Converts envelopes to and from transport frames.

use crate::protocol::GatewayMessage;
use crate::transport::Frame;
use thiserror::Error;

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to encode {op}: {source}")]
    Encode {
        op: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Malformed frame: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,
}

/// Encodes outbound envelopes and decodes inbound frames
pub trait Codec: Send + Sync {
    /// Value of the `encoding` query parameter announced to the gateway
    fn encoding(&self) -> &'static str;

    fn encode(&self, message: &GatewayMessage) -> Result<Frame, CodecError>;

    fn decode(&self, frame: &Frame) -> Result<GatewayMessage, CodecError>;
}

/// JSON text-frame codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encoding(&self) -> &'static str {
        "json"
    }

    fn encode(&self, message: &GatewayMessage) -> Result<Frame, CodecError> {
        message
            .to_json()
            .map(Frame::Text)
            .map_err(|source| CodecError::Encode {
                op: message.op.to_string(),
                source,
            })
    }

    fn decode(&self, frame: &Frame) -> Result<GatewayMessage, CodecError> {
        let text = match frame {
            Frame::Text(text) => text.as_str(),
            Frame::Binary(bytes) => {
                std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?
            }
        };
        GatewayMessage::from_json(text).map_err(CodecError::Decode)
    }
}
