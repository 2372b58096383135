//! Recording transport mock.
//!
//! Every `send(ids, frame)` is recorded in call order. Readers reassemble
//! chunked frames per recipient and decode them back into batches, so tests
//! assert on messages rather than on base64 text.
//!
//! # Example
//!
//! ```rust,ignore
//! use hub_test_utils::MockTransport;
//!
//! let transport = MockTransport::new();
//! let hub = Hub::new(config, Arc::new(transport.clone()));
//! // ... drive the hub ...
//! assert_eq!(transport.messages_to("bob").len(), 1);
//! ```

use relay_protocol::{
    decode_batch, ChunkAssembler, ControlObject, DataType, Message, MessageBatch, Reassembly,
};
use session_hub::{HubError, Transport};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// One recorded transport send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub connection_ids: Vec<String>,
    pub frame: String,
}

/// Mock transport for driving a `Hub` in tests.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    sends: Vec<SentFrame>,
    failing: bool,
}

impl MockTransport {
    /// Create a transport that accepts every send.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport that fails every send.
    #[must_use]
    pub fn failing() -> Self {
        let transport = Self::new();
        transport.set_failing(true);
        transport
    }

    /// Switch failure mode on or off.
    pub fn set_failing(&self, failing: bool) {
        self.inner.lock().unwrap().failing = failing;
    }

    /// All recorded sends, in call order.
    #[must_use]
    pub fn sends(&self) -> Vec<SentFrame> {
        self.inner.lock().unwrap().sends.clone()
    }

    /// Number of recorded sends.
    #[must_use]
    pub fn send_count(&self) -> usize {
        self.inner.lock().unwrap().sends.len()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.inner.lock().unwrap().sends.clear();
    }

    /// Raw frames addressed to `connection_id`, in call order.
    #[must_use]
    pub fn frames_to(&self, connection_id: &str) -> Vec<String> {
        self.sends()
            .into_iter()
            .filter(|sent| sent.connection_ids.iter().any(|id| id == connection_id))
            .map(|sent| sent.frame)
            .collect()
    }

    /// Batches delivered to `connection_id` after chunk reassembly.
    ///
    /// # Panics
    ///
    /// Panics if a reassembled frame is not a valid batch.
    #[must_use]
    pub fn batches_to(&self, connection_id: &str) -> Vec<MessageBatch> {
        let assembler = ChunkAssembler::new(usize::MAX);
        let now = Instant::now();
        let mut batches = Vec::new();
        for frame in self.frames_to(connection_id) {
            if let Reassembly::Complete(text) = assembler.push(connection_id, &frame, now).unwrap() {
                batches.push(decode_batch(&text).expect("hub sent an undecodable batch"));
            }
        }
        batches
    }

    /// Messages delivered to `connection_id`, flattened over batches.
    #[must_use]
    pub fn messages_to(&self, connection_id: &str) -> Vec<Message> {
        self.batches_to(connection_id)
            .into_iter()
            .flat_map(|batch| batch.messages)
            .collect()
    }

    /// Messages of one data type delivered to `connection_id`.
    #[must_use]
    pub fn messages_of_type_to(&self, connection_id: &str, data_type: DataType) -> Vec<Message> {
        self.messages_to(connection_id)
            .into_iter()
            .filter(|message| message.kind() == Some(data_type))
            .collect()
    }

    /// Control objects delivered to `connection_id`.
    ///
    /// # Panics
    ///
    /// Panics if a control message does not hold a valid control object.
    #[must_use]
    pub fn controls_to(&self, connection_id: &str) -> Vec<ControlObject> {
        self.messages_of_type_to(connection_id, DataType::Control)
            .iter()
            .map(|message| {
                ControlObject::from_slice(&message.data).expect("hub sent an invalid control object")
            })
            .collect()
    }

    /// The last control object delivered to `connection_id`.
    ///
    /// # Panics
    ///
    /// Panics if nothing was delivered.
    #[must_use]
    pub fn last_control_to(&self, connection_id: &str) -> ControlObject {
        self.controls_to(connection_id)
            .pop()
            .unwrap_or_else(|| panic!("no control object sent to {connection_id}"))
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send(&self, connection_ids: &[String], frame: String) -> Result<(), HubError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing {
            return Err(HubError::Transport("mock transport failing".to_string()));
        }
        inner.sends.push(SentFrame {
            connection_ids: connection_ids.to_vec(),
            frame,
        });
        Ok(())
    }
}
