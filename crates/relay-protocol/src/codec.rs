//! Codec for encoding and decoding message batches.
//!
//! A batch is protobuf-encoded and then base64-encoded (standard alphabet,
//! padded) so it can travel over a text-only transport.

use crate::message::MessageBatch;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use prost::Message as _;

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame text is not valid base64
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Decoded bytes are not a valid batch
    #[error("Invalid batch encoding: {0}")]
    Protobuf(#[from] prost::DecodeError),

    /// A message carries a data type outside the schema
    #[error("Unknown data type: {0}")]
    UnknownDataType(i32),
}

/// Encode a batch to transport text.
#[must_use]
pub fn encode_batch(batch: &MessageBatch) -> String {
    STANDARD.encode(batch.encode_to_vec())
}

/// Decode transport text into a batch.
///
/// # Errors
///
/// Returns an error if the text is not base64, the bytes are not a batch,
/// or any message uses a data type the schema does not define. A batch with
/// one unknown data type is rejected as a whole.
pub fn decode_batch(text: &str) -> Result<MessageBatch, CodecError> {
    let raw = STANDARD.decode(text.trim())?;
    let batch = MessageBatch::decode(raw.as_slice())?;

    if let Some(bad) = batch.messages.iter().find(|m| m.kind().is_none()) {
        return Err(CodecError::UnknownDataType(bad.data_type));
    }

    Ok(batch)
}
