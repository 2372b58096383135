//! Wire protocol for the session hub.
//!
//! Every transport frame carries one base64-encoded [`MessageBatch`]
//! (protobuf), optionally split into `!`-framed chunks when the encoded text
//! is too long for a single frame. Control messages carry a JSON
//! [`ControlObject`] discriminated by its `Action` field.

#![warn(clippy::pedantic)]

pub mod chunk;
pub mod codec;
pub mod constraint;
pub mod control;
pub mod message;
pub mod webm;

pub use chunk::{split_frames, ChunkAssembler, ChunkError, Reassembly, CHUNK_SENTINEL, CHUNK_THRESHOLD};
pub use codec::{decode_batch, encode_batch, CodecError};
pub use constraint::Constraint;
pub use control::{ControlError, ControlObject, Status, CONTROL_MIME_TYPE};
pub use message::{default_stream_id, DataType, Message, MessageBatch, UNIQUE_STREAM_ID_START};
pub use webm::{HeaderExtractor, WebmError, WebmHeaderExtractor};
