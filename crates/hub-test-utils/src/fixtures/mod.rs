//! Pre-configured test data for hub testing.
//!
//! Provides builders for:
//! - Received frames (text, binary, media, control, malformed)
//! - Registered sessions with members
//! - Synthetic WebM streams with a known header length

mod webm;

pub use webm::{WebmStream, WebmStreamBuilder};

use bytes::Bytes;
use common::types::SessionId;
use relay_protocol::{
    encode_batch, split_frames, ControlObject, DataType, Message, MessageBatch,
    CONTROL_MIME_TYPE,
};
use session_hub::{Communication, Hub, Topology};
use std::sync::Arc;

/// Encode messages into one unchunked frame.
#[must_use]
pub fn frame_of(messages: Vec<Message>) -> String {
    encode_batch(&MessageBatch { messages })
}

/// A client-sent message (origin left empty, the hub fills it in).
#[must_use]
pub fn message(
    data_type: DataType,
    stream_id: u32,
    mime_type: &str,
    data: impl Into<Bytes>,
) -> Message {
    Message::new(data_type, stream_id, mime_type, data, "")
}

#[must_use]
pub fn text_frame(text: &str, mime_type: &str) -> String {
    frame_of(vec![message(DataType::Text, 2, mime_type, text.to_owned())])
}

#[must_use]
pub fn binary_frame(data: &[u8]) -> String {
    frame_of(vec![message(
        DataType::Binary,
        3,
        "application/octet-stream",
        data.to_vec(),
    )])
}

#[must_use]
pub fn media_frame(data_type: DataType, stream_id: u32, mime_type: &str, data: &[u8]) -> String {
    frame_of(vec![message(data_type, stream_id, mime_type, data.to_vec())])
}

/// A control message on `stream_id`.
#[must_use]
pub fn control_message(control: &ControlObject, stream_id: u32) -> Message {
    message(
        DataType::Control,
        stream_id,
        CONTROL_MIME_TYPE,
        control.to_vec().unwrap(),
    )
}

#[must_use]
pub fn control_frame(control: &ControlObject, stream_id: u32) -> String {
    frame_of(vec![control_message(control, stream_id)])
}

/// A control frame carrying arbitrary JSON, for malformed-control tests.
#[must_use]
pub fn raw_control_frame(json: &serde_json::Value) -> String {
    frame_of(vec![message(
        DataType::Control,
        1,
        CONTROL_MIME_TYPE,
        serde_json::to_vec(json).unwrap(),
    )])
}

/// A frame with a message whose data type is outside the schema.
#[must_use]
pub fn unknown_type_frame(data_type: i32) -> String {
    let mut unknown = message(DataType::Text, 2, "text/plain", "?");
    unknown.data_type = data_type;
    frame_of(vec![unknown])
}

/// Split a frame the way a sending client would.
#[must_use]
pub fn chunked(frame: &str, threshold: usize) -> Vec<String> {
    split_frames(frame, threshold)
}

/// Register a session with the given members, bypassing the connect flow.
pub async fn register_session(
    hub: &Hub,
    session_id: &str,
    topology: Topology,
    members: &[&str],
) -> Arc<Communication> {
    let communication = Arc::new(Communication::new(SessionId::from(session_id), topology));
    for member in members {
        assert!(communication.admit(member), "could not admit {member}");
    }
    hub.registry().add(Arc::clone(&communication)).await;
    communication
}

/// Session ID a connection was told in its last `Connect` notification.
///
/// # Panics
///
/// Panics if the control object is not a `Connect`.
#[must_use]
pub fn connect_session_id(control: &ControlObject) -> String {
    match control {
        ControlObject::Connect { session_id, .. } => session_id.clone(),
        other => panic!("expected Connect, got {}", other.action()),
    }
}
