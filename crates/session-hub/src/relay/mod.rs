//! Relay layer.
//!
//! The [`Hub`] is driven by the transport through four entry points:
//!
//! - [`Hub::on_connect`] resolves or creates the session and runs the
//!   handler's admission policy
//! - [`Hub::on_disconnect`] drops per-connection state and runs the handler's
//!   removal policy
//! - [`Hub::on_reconnect`] tells a connection whose session is gone that it
//!   is disconnected
//! - [`Hub::on_receive`] reassembles, decodes, filters and dispatches one
//!   received frame
//!
//! Outgoing messages go through [`Hub::unicast`] and [`Hub::broadcast`] (or
//! the typed helpers built on them), which encode, chunk and hand frames to
//! the [`Transport`].

mod handler;
pub mod media;

pub use handler::{
    connect, control_default, disconnect, forward_when_ready, ConnectionContext, ConnectionInfo,
    DefaultHandler, RelayHandler,
};

use crate::communication::Communication;
use crate::config::{DispatchMode, HubConfig};
use crate::errors::HubError;
use crate::observability::metrics;
use crate::registry::SessionRegistry;
use crate::transport::Transport;
use bytes::Bytes;
use media::MediaAccumulator;
use relay_protocol::{
    decode_batch, default_stream_id, encode_batch, split_frames, ChunkAssembler, CodecError,
    ControlObject, DataType, HeaderExtractor, Message, MessageBatch, Reassembly, Status,
    WebmHeaderExtractor, CONTROL_MIME_TYPE,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Lower bound on the reassembly janitor's tick period.
const JANITOR_MIN_INTERVAL: Duration = Duration::from_secs(1);

/// A received message that passed decoding and the permission check.
enum Inbound {
    Control {
        stream_id: u32,
        control: ControlObject,
    },
    Text(Payload),
    Binary(Payload),
    Audio(Payload),
    Video(Payload),
}

struct Payload {
    stream_id: u32,
    data: Bytes,
    mime_type: String,
}

impl Inbound {
    fn data_type(&self) -> DataType {
        match self {
            Inbound::Control { .. } => DataType::Control,
            Inbound::Text(_) => DataType::Text,
            Inbound::Binary(_) => DataType::Binary,
            Inbound::Audio(_) => DataType::Audio,
            Inbound::Video(_) => DataType::Video,
        }
    }
}

struct HubInner {
    config: HubConfig,
    registry: SessionRegistry,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn RelayHandler>,
    extractor: Arc<dyn HeaderExtractor>,
    reassembly: ChunkAssembler,
    media: MediaAccumulator,
}

/// The relay hub. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Hub`].
pub struct HubBuilder {
    config: HubConfig,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn RelayHandler>,
    extractor: Arc<dyn HeaderExtractor>,
}

impl HubBuilder {
    /// Start from a config and transport, with [`DefaultHandler`] and
    /// [`WebmHeaderExtractor`].
    #[must_use]
    pub fn new(config: HubConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            handler: Arc::new(DefaultHandler),
            extractor: Arc::new(WebmHeaderExtractor),
        }
    }

    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn RelayHandler>) -> Self {
        self.handler = handler;
        self
    }

    #[must_use]
    pub fn extractor(mut self, extractor: Arc<dyn HeaderExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    #[must_use]
    pub fn build(self) -> Hub {
        let reassembly = ChunkAssembler::new(self.config.max_reassembly_bytes);
        let media = MediaAccumulator::new(self.config.media_header_probe_bytes);
        Hub {
            inner: Arc::new(HubInner {
                config: self.config,
                registry: SessionRegistry::new(),
                transport: self.transport,
                handler: self.handler,
                extractor: self.extractor,
                reassembly,
                media,
            }),
        }
    }
}

impl Hub {
    /// Hub with the default handler and extractor.
    #[must_use]
    pub fn new(config: HubConfig, transport: Arc<dyn Transport>) -> Self {
        HubBuilder::new(config, transport).build()
    }

    #[must_use]
    pub fn builder(config: HubConfig, transport: Arc<dyn Transport>) -> HubBuilder {
        HubBuilder::new(config, transport)
    }

    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    fn reassembly(&self) -> &ChunkAssembler {
        &self.inner.reassembly
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// A connection opened, optionally asking to join `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Transport`] if the connect notification could not
    /// be sent.
    #[instrument(skip_all, fields(connection_id = %connection_id))]
    pub async fn on_connect(
        &self,
        connection_id: &str,
        session_id: Option<&str>,
    ) -> Result<(), HubError> {
        let communication = self.registry().by_session(session_id).await;
        debug!(
            target: "hub.relay",
            requested_session = session_id.unwrap_or_default(),
            resolved = communication.is_some(),
            "Connection opened"
        );

        let info = ConnectionInfo {
            connection_id: connection_id.to_string(),
            session_id: session_id.map(str::to_string),
            communication,
        };
        self.inner.handler.on_connected(self, info).await
    }

    /// A connection closed. Unknown connections only lose their reassembly
    /// buffer.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Transport`] if the disconnect notification could
    /// not be sent.
    #[instrument(skip_all, fields(connection_id = %connection_id))]
    pub async fn on_disconnect(&self, connection_id: &str) -> Result<(), HubError> {
        self.reassembly().discard(connection_id);

        let Some(communication) = self.registry().by_connection(connection_id).await else {
            debug!(target: "hub.relay", "Disconnect for connection without session");
            return Ok(());
        };

        let ctx = ConnectionContext {
            connection_id: connection_id.to_string(),
            communication: Arc::clone(&communication),
        };
        let result = self.inner.handler.on_disconnected(self, &ctx).await;

        if communication.connection_count() == 0 {
            self.inner.media.discard_session(communication.session_id());
        }
        result
    }

    /// A connection reappeared after a transport-level interruption.
    ///
    /// If the connection no longer belongs to a session it is told so with a
    /// `Disconnected` connect notification carrying `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Transport`] if the notification could not be sent.
    #[instrument(skip_all, fields(connection_id = %connection_id))]
    pub async fn on_reconnect(
        &self,
        connection_id: &str,
        session_id: Option<&str>,
    ) -> Result<(), HubError> {
        metrics::record_connection_event("reconnect");

        let Some(communication) = self.registry().by_connection(connection_id).await else {
            debug!(target: "hub.relay", "Reconnect for connection without session");
            let control = ControlObject::Connect {
                status: Status::Disconnected,
                session_id: session_id.unwrap_or_default().to_string(),
                constraint: None,
            };
            return self
                .send_control(&[connection_id.to_string()], connection_id, &control, None)
                .await;
        };

        let ctx = ConnectionContext {
            connection_id: connection_id.to_string(),
            communication,
        };
        self.inner.handler.on_reconnected(self, &ctx).await
    }

    /// Handle one received transport frame.
    ///
    /// Frames from connections without a session are dropped. Chunk fragments
    /// are buffered until the final one arrives. A complete payload is decoded
    /// as a batch; messages the sender may not send are dropped and the rest
    /// are dispatched to the handler. Handler failures are logged, not
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns an error, and dispatches nothing, if the payload overflows the
    /// reassembly cap, is not a valid batch, or contains a control message
    /// that is not a valid control object.
    #[instrument(skip_all, fields(connection_id = %connection_id))]
    pub async fn on_receive(&self, connection_id: &str, frame: &str) -> Result<(), HubError> {
        let Some(communication) = self.registry().by_connection(connection_id).await else {
            debug!(target: "hub.relay", "Frame from connection without session dropped");
            return Ok(());
        };

        let now = tokio::time::Instant::now().into_std();
        let pushed = self.reassembly().push(connection_id, frame, now);
        let payload = match pushed {
            Ok(Reassembly::Complete(payload)) => payload,
            Ok(Reassembly::Pending) => return Ok(()),
            Err(e) => {
                metrics::record_frame_rejected("chunk");
                warn!(target: "hub.relay", error = %e, "Reassembly buffer discarded");
                return Err(e.into());
            }
        };

        let batch = decode_batch(&payload).map_err(|e| {
            metrics::record_frame_rejected("codec");
            error!(target: "hub.relay", error = %e, "Rejected undecodable batch");
            HubError::from(e)
        })?;

        let inbound = decode_messages(batch).map_err(|e| {
            metrics::record_frame_rejected(e.kind());
            error!(target: "hub.relay", error = %e, "Rejected batch with invalid message");
            e
        })?;

        let ctx = ConnectionContext {
            connection_id: connection_id.to_string(),
            communication,
        };
        let allowed = self.filter_and_observe(&ctx, inbound);
        self.dispatch(ctx, allowed).await;
        Ok(())
    }

    /// Drop messages the sender may not send and feed media to header
    /// capture, in batch order.
    fn filter_and_observe(&self, ctx: &ConnectionContext, inbound: Vec<Inbound>) -> Vec<Inbound> {
        let communication = &ctx.communication;
        inbound
            .into_iter()
            .filter(|message| {
                let data_type = message.data_type();
                if communication.is_allowed(&ctx.connection_id, data_type) {
                    return true;
                }
                metrics::record_message_dropped("not_allowed", data_type.as_str());
                debug!(
                    target: "hub.relay",
                    session_id = %communication.session_id(),
                    data_type = data_type.as_str(),
                    "Message not allowed for sender, dropped"
                );
                false
            })
            .inspect(|message| {
                if let Inbound::Audio(payload) | Inbound::Video(payload) = message {
                    self.inner.media.observe(
                        communication,
                        payload.stream_id,
                        &payload.data,
                        &payload.mime_type,
                        self.inner.extractor.as_ref(),
                    );
                }
            })
            .collect()
    }

    async fn dispatch(&self, ctx: ConnectionContext, messages: Vec<Inbound>) {
        match self.inner.config.dispatch_mode {
            DispatchMode::Sequential => {
                for message in messages {
                    if let Err(e) = self.dispatch_one(&ctx, message).await {
                        log_handler_error(&e);
                    }
                }
            }
            DispatchMode::Concurrent => {
                let mut tasks = JoinSet::new();
                for message in messages {
                    let hub = self.clone();
                    let ctx = ctx.clone();
                    tasks.spawn(async move { hub.dispatch_one(&ctx, message).await });
                }
                while let Some(joined) = tasks.join_next().await {
                    match joined {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => log_handler_error(&e),
                        Err(e) => log_handler_error(&HubError::Dispatch(e.to_string())),
                    }
                }
            }
        }
    }

    async fn dispatch_one(&self, ctx: &ConnectionContext, message: Inbound) -> Result<(), HubError> {
        let handler = &self.inner.handler;
        match message {
            Inbound::Control { stream_id, control } => {
                handler.on_control(self, ctx, stream_id, control).await
            }
            Inbound::Text(p) => {
                let text = String::from_utf8_lossy(&p.data).into_owned();
                handler.on_text(self, ctx, p.stream_id, text, p.mime_type).await
            }
            Inbound::Binary(p) => {
                handler
                    .on_binary(self, ctx, p.stream_id, p.data, p.mime_type)
                    .await
            }
            Inbound::Audio(p) => {
                handler
                    .on_audio(self, ctx, p.stream_id, p.data, p.mime_type)
                    .await
            }
            Inbound::Video(p) => {
                handler
                    .on_video(self, ctx, p.stream_id, p.data, p.mime_type)
                    .await
            }
        }
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Send `message` to the listed connections, without filtering.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Transport`] if the transport fails a frame.
    pub async fn unicast(&self, connection_ids: &[String], message: Message) -> Result<(), HubError> {
        if connection_ids.is_empty() {
            return Ok(());
        }
        self.send_batch(connection_ids, &MessageBatch::single(message))
            .await
    }

    /// Send `message` to every member of `communication` that accepts its
    /// mime type, except the connections in `exclude`. No-op if nobody is
    /// left.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Transport`] if the transport fails a frame.
    pub async fn broadcast(
        &self,
        communication: &Communication,
        message: Message,
        exclude: &[String],
    ) -> Result<(), HubError> {
        let recipients: Vec<String> = communication
            .connection_ids_supporting_mime_type(&message.mime_type)
            .into_iter()
            .filter(|id| !exclude.contains(id))
            .collect();
        if recipients.is_empty() {
            return Ok(());
        }
        self.send_batch(&recipients, &MessageBatch::single(message))
            .await
    }

    async fn send_batch(&self, recipients: &[String], batch: &MessageBatch) -> Result<(), HubError> {
        let encoded = encode_batch(batch);
        let frames = split_frames(&encoded, self.inner.config.chunk_threshold);
        let count = frames.len();

        for frame in frames {
            self.inner.transport.send(recipients, frame).await?;
        }
        metrics::record_frames_sent(count);
        Ok(())
    }

    /// Unicast a control object. `stream_id` defaults to the control stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the object cannot be serialized or the transport
    /// fails.
    pub async fn send_control(
        &self,
        connection_ids: &[String],
        origin: &str,
        control: &ControlObject,
        stream_id: Option<u32>,
    ) -> Result<(), HubError> {
        let message = control_message(origin, control, stream_id)?;
        self.unicast(connection_ids, message).await
    }

    /// Broadcast a control object. `stream_id` defaults to the control stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the object cannot be serialized or the transport
    /// fails.
    pub async fn broadcast_control(
        &self,
        communication: &Communication,
        origin: &str,
        control: &ControlObject,
        stream_id: Option<u32>,
        exclude: &[String],
    ) -> Result<(), HubError> {
        let message = control_message(origin, control, stream_id)?;
        self.broadcast(communication, message, exclude).await
    }

    /// # Errors
    ///
    /// Returns [`HubError::Transport`] if the transport fails a frame.
    pub async fn send_text(
        &self,
        connection_ids: &[String],
        origin: &str,
        text: &str,
        mime_type: &str,
        stream_id: Option<u32>,
    ) -> Result<(), HubError> {
        let message = typed_message(DataType::Text, stream_id, mime_type, text.to_owned(), origin);
        self.unicast(connection_ids, message).await
    }

    /// # Errors
    ///
    /// Returns [`HubError::Transport`] if the transport fails a frame.
    pub async fn broadcast_text(
        &self,
        communication: &Communication,
        origin: &str,
        text: &str,
        mime_type: &str,
        stream_id: Option<u32>,
        exclude: &[String],
    ) -> Result<(), HubError> {
        let message = typed_message(DataType::Text, stream_id, mime_type, text.to_owned(), origin);
        self.broadcast(communication, message, exclude).await
    }

    /// # Errors
    ///
    /// Returns [`HubError::Transport`] if the transport fails a frame.
    pub async fn send_binary(
        &self,
        connection_ids: &[String],
        origin: &str,
        data: Bytes,
        mime_type: &str,
        stream_id: Option<u32>,
    ) -> Result<(), HubError> {
        let message = typed_message(DataType::Binary, stream_id, mime_type, data, origin);
        self.unicast(connection_ids, message).await
    }

    /// # Errors
    ///
    /// Returns [`HubError::Transport`] if the transport fails a frame.
    pub async fn broadcast_binary(
        &self,
        communication: &Communication,
        origin: &str,
        data: Bytes,
        mime_type: &str,
        stream_id: Option<u32>,
        exclude: &[String],
    ) -> Result<(), HubError> {
        let message = typed_message(DataType::Binary, stream_id, mime_type, data, origin);
        self.broadcast(communication, message, exclude).await
    }

    /// # Errors
    ///
    /// Returns [`HubError::Transport`] if the transport fails a frame.
    pub async fn send_audio(
        &self,
        connection_ids: &[String],
        origin: &str,
        data: Bytes,
        mime_type: &str,
        stream_id: Option<u32>,
    ) -> Result<(), HubError> {
        let message = typed_message(DataType::Audio, stream_id, mime_type, data, origin);
        self.unicast(connection_ids, message).await
    }

    /// # Errors
    ///
    /// Returns [`HubError::Transport`] if the transport fails a frame.
    pub async fn broadcast_audio(
        &self,
        communication: &Communication,
        origin: &str,
        data: Bytes,
        mime_type: &str,
        stream_id: Option<u32>,
        exclude: &[String],
    ) -> Result<(), HubError> {
        let message = typed_message(DataType::Audio, stream_id, mime_type, data, origin);
        self.broadcast(communication, message, exclude).await
    }

    /// # Errors
    ///
    /// Returns [`HubError::Transport`] if the transport fails a frame.
    pub async fn send_video(
        &self,
        connection_ids: &[String],
        origin: &str,
        data: Bytes,
        mime_type: &str,
        stream_id: Option<u32>,
    ) -> Result<(), HubError> {
        let message = typed_message(DataType::Video, stream_id, mime_type, data, origin);
        self.unicast(connection_ids, message).await
    }

    /// # Errors
    ///
    /// Returns [`HubError::Transport`] if the transport fails a frame.
    pub async fn broadcast_video(
        &self,
        communication: &Communication,
        origin: &str,
        data: Bytes,
        mime_type: &str,
        stream_id: Option<u32>,
        exclude: &[String],
    ) -> Result<(), HubError> {
        let message = typed_message(DataType::Video, stream_id, mime_type, data, origin);
        self.broadcast(communication, message, exclude).await
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Discard partial chunk payloads older than the reassembly timeout.
    /// Returns how many were discarded.
    pub fn purge_stale_reassembly(&self) -> usize {
        let now = tokio::time::Instant::now().into_std();
        let purged = self
            .reassembly()
            .purge_older_than(now, self.inner.config.reassembly_timeout);
        if purged > 0 {
            metrics::record_reassembly_purged(purged);
            debug!(target: "hub.relay", purged = purged, "Stale reassembly buffers purged");
        }
        purged
    }

    /// Spawn a task that calls [`Hub::purge_stale_reassembly`] periodically
    /// until `cancel_token` is cancelled.
    #[must_use]
    pub fn spawn_reassembly_janitor(&self, cancel_token: CancellationToken) -> JoinHandle<()> {
        let hub = self.clone();
        let period = (self.inner.config.reassembly_timeout / 2).max(JANITOR_MIN_INTERVAL);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            info!(
                target: "hub.relay",
                period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
                "Reassembly janitor started"
            );
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        hub.purge_stale_reassembly();
                    }
                    () = cancel_token.cancelled() => {
                        info!(target: "hub.relay", "Reassembly janitor received shutdown signal, exiting");
                        break;
                    }
                }
            }
        })
    }
}

/// Decode every message of a batch up front so a bad control object rejects
/// the whole batch before anything is dispatched.
fn decode_messages(batch: MessageBatch) -> Result<Vec<Inbound>, HubError> {
    batch
        .messages
        .into_iter()
        .map(|message| -> Result<Inbound, HubError> {
            let kind = message
                .kind()
                .ok_or(CodecError::UnknownDataType(message.data_type))?;
            let payload = Payload {
                stream_id: message.stream_id,
                data: message.data,
                mime_type: message.mime_type,
            };
            Ok(match kind {
                DataType::Control => Inbound::Control {
                    stream_id: payload.stream_id,
                    control: ControlObject::from_slice(&payload.data)?,
                },
                DataType::Text => Inbound::Text(payload),
                DataType::Binary => Inbound::Binary(payload),
                DataType::Audio => Inbound::Audio(payload),
                DataType::Video => Inbound::Video(payload),
            })
        })
        .collect()
}

fn control_message(
    origin: &str,
    control: &ControlObject,
    stream_id: Option<u32>,
) -> Result<Message, HubError> {
    Ok(typed_message(
        DataType::Control,
        stream_id,
        CONTROL_MIME_TYPE,
        control.to_vec()?,
        origin,
    ))
}

fn typed_message(
    data_type: DataType,
    stream_id: Option<u32>,
    mime_type: &str,
    data: impl Into<Bytes>,
    origin: &str,
) -> Message {
    let stream_id = stream_id.unwrap_or_else(|| default_stream_id(data_type));
    Message::new(data_type, stream_id, mime_type, data, origin)
}

fn log_handler_error(e: &HubError) {
    warn!(target: "hub.relay", error = %e, kind = e.kind(), "Relay handler failed");
}
