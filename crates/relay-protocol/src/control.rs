//! Control objects carried in [`DataType::Control`](crate::DataType::Control)
//! messages.
//!
//! The payload is a JSON object discriminated by its `Action` field, for
//! example:
//!
//! ```json
//! {"Action":"requestMediaHeader","StreamId":50000}
//! ```
//!
//! Decoding an unknown action is an error; there is no catch-all variant.

use crate::constraint::Constraint;
use serde::{Deserialize, Serialize};

/// Mime type set on every control message.
pub const CONTROL_MIME_TYPE: &str = "application/json";

/// Session status reported in `Connect` and `Disconnect` notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Ready,
    Waiting,
    Disconnected,
    Full,
}

impl Status {
    /// Returns the status as it appears on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Status::Ready => "Ready",
            Status::Waiting => "Waiting",
            Status::Disconnected => "Disconnected",
            Status::Full => "Full",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for control object encoding
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Payload is not JSON, has no known `Action`, or is missing fields
    #[error("Invalid control object: {0}")]
    Decode(#[source] serde_json::Error),

    /// Control object could not be serialized
    #[error("Control object encoding failed: {0}")]
    Encode(#[source] serde_json::Error),
}

/// A control object, tagged by `Action`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Action", rename_all = "camelCase", rename_all_fields = "PascalCase")]
pub enum ControlObject {
    /// Server to client: the connection joined (or was refused by) a session.
    Connect {
        status: Status,
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        constraint: Option<Constraint>,
    },

    /// Server to client: a participant left the session.
    Disconnect {
        status: Status,
        session_id: String,
        #[serde(default)]
        disconnected_stream_ids: Vec<u32>,
    },

    /// Client asks for a unique stream ID; the reply carries it.
    RequestStreamId {
        #[serde(default)]
        stream_id: u32,
    },

    /// Client declines to receive a mime type.
    MediaNotSupported { mime_type: String },

    /// Client asks for the cached header of a media stream; the reply carries
    /// it base64-encoded.
    RequestMediaHeader {
        stream_id: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_header: Option<String>,
    },

    /// A media stream ended.
    StopStream { stream_id: u32 },
}

impl ControlObject {
    /// Decode a control object from a message payload.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Decode`] for malformed JSON, a missing or
    /// unknown `Action`, or missing required fields.
    pub fn from_slice(data: &[u8]) -> Result<Self, ControlError> {
        serde_json::from_slice(data).map_err(ControlError::Decode)
    }

    /// Encode the control object as a message payload.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Encode`] if serialization fails.
    pub fn to_vec(&self) -> Result<Vec<u8>, ControlError> {
        serde_json::to_vec(self).map_err(ControlError::Encode)
    }

    /// The `Action` discriminant, for log fields.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            ControlObject::Connect { .. } => "connect",
            ControlObject::Disconnect { .. } => "disconnect",
            ControlObject::RequestStreamId { .. } => "requestStreamId",
            ControlObject::MediaNotSupported { .. } => "mediaNotSupported",
            ControlObject::RequestMediaHeader { .. } => "requestMediaHeader",
            ControlObject::StopStream { .. } => "stopStream",
        }
    }
}
