//! Session hub error types.
//!
//! Admission and permission failures are not errors: they are boolean
//! outcomes or silent drops. `HubError` covers what remains, namely frames
//! that cannot be decoded and sends the transport refused.

use relay_protocol::{ChunkError, CodecError, ControlError};
use thiserror::Error;

/// Session hub error type.
#[derive(Debug, Error)]
pub enum HubError {
    /// The transport refused or failed a send.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A frame was not a valid batch (bad base64, bad protobuf, unknown data type).
    #[error("Batch decode failed: {0}")]
    Codec(#[from] CodecError),

    /// A control message was not a valid control object.
    #[error("Control decode failed: {0}")]
    Control(#[from] ControlError),

    /// A chunked frame could not be reassembled.
    #[error("Reassembly failed: {0}")]
    Chunk(#[from] ChunkError),

    /// A concurrently dispatched handler task did not complete.
    #[error("Dispatch task failed: {0}")]
    Dispatch(String),
}

impl HubError {
    /// Bounded label for metrics and log fields.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            HubError::Transport(_) => "transport",
            HubError::Codec(_) => "codec",
            HubError::Control(_) => "control",
            HubError::Chunk(_) => "chunk",
            HubError::Dispatch(_) => "dispatch",
        }
    }

    /// Whether the error means the received frame was rejected as a whole.
    #[must_use]
    pub const fn is_rejected_frame(&self) -> bool {
        matches!(
            self,
            HubError::Codec(_) | HubError::Control(_) | HubError::Chunk(_)
        )
    }
}
