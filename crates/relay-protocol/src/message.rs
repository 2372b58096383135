//! Message and batch types carried over the wire.

use bytes::Bytes;

/// First stream ID handed out by a session for `RequestStreamId`.
///
/// IDs below this value are reserved for the per-type defaults.
pub const UNIQUE_STREAM_ID_START: u32 = 50000;

/// Kind of payload carried by a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum DataType {
    /// UTF-8 text
    Text = 0,
    /// Opaque binary data
    Binary = 1,
    /// JSON control object
    Control = 2,
    /// Audio media chunk
    Audio = 3,
    /// Video media chunk
    Video = 4,
}

impl DataType {
    /// Returns the data type as a string for log fields and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DataType::Text => "text",
            DataType::Binary => "binary",
            DataType::Control => "control",
            DataType::Audio => "audio",
            DataType::Video => "video",
        }
    }

    /// Whether this type goes through the media path (header caching).
    #[must_use]
    pub const fn is_media(&self) -> bool {
        matches!(self, DataType::Audio | DataType::Video)
    }
}

/// Stream ID used when the caller does not pick one.
#[must_use]
pub const fn default_stream_id(data_type: DataType) -> u32 {
    match data_type {
        DataType::Control => 1,
        DataType::Text => 2,
        DataType::Binary => 3,
        DataType::Audio => 4,
        DataType::Video => 5,
    }
}

/// A single multiplexed message.
///
/// Field layout (protobuf):
/// - 1: stream ID (uint32)
/// - 2: data type (enum)
/// - 3: mime type (string)
/// - 4: payload (bytes)
/// - 5: origin connection ID (string)
#[derive(Clone, PartialEq, prost::Message)]
pub struct Message {
    /// Logical stream the message belongs to
    #[prost(uint32, tag = "1")]
    pub stream_id: u32,
    /// Payload kind, see [`DataType`]
    #[prost(enumeration = "DataType", tag = "2")]
    pub data_type: i32,
    /// Mime type of the payload, may be empty
    #[prost(string, tag = "3")]
    pub mime_type: String,
    /// Raw payload
    #[prost(bytes = "bytes", tag = "4")]
    pub data: Bytes,
    /// Connection the message originated from (set by the hub)
    #[prost(string, tag = "5")]
    pub origin: String,
}

impl Message {
    /// Build a message of the given type.
    #[must_use]
    pub fn new(
        data_type: DataType,
        stream_id: u32,
        mime_type: impl Into<String>,
        data: impl Into<Bytes>,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            stream_id,
            data_type: data_type as i32,
            mime_type: mime_type.into(),
            data: data.into(),
            origin: origin.into(),
        }
    }

    /// Decoded data type, `None` for a discriminant outside the schema.
    #[must_use]
    pub fn kind(&self) -> Option<DataType> {
        DataType::try_from(self.data_type).ok()
    }
}

/// Ordered sequence of messages transported in one (possibly chunked) frame.
#[derive(Clone, PartialEq, prost::Message)]
pub struct MessageBatch {
    #[prost(message, repeated, tag = "1")]
    pub messages: Vec<Message>,
}

impl MessageBatch {
    /// A batch holding exactly one message.
    #[must_use]
    pub fn single(message: Message) -> Self {
        Self {
            messages: vec![message],
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stream_ids() {
        assert_eq!(default_stream_id(DataType::Control), 1);
        assert_eq!(default_stream_id(DataType::Text), 2);
        assert_eq!(default_stream_id(DataType::Binary), 3);
        assert_eq!(default_stream_id(DataType::Audio), 4);
        assert_eq!(default_stream_id(DataType::Video), 5);
        assert!(default_stream_id(DataType::Video) < UNIQUE_STREAM_ID_START);
    }

    #[test]
    fn test_message_kind_rejects_unknown_discriminant() {
        let mut message = Message::new(DataType::Audio, 4, "audio/webm", vec![1, 2], "conn-a");
        assert_eq!(message.kind(), Some(DataType::Audio));

        message.data_type = 42;
        assert_eq!(message.kind(), None);
    }

    #[test]
    fn test_media_types() {
        assert!(DataType::Audio.is_media());
        assert!(DataType::Video.is_media());
        assert!(!DataType::Text.is_media());
        assert!(!DataType::Control.is_media());
    }
}
