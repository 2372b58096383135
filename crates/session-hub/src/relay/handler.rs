//! Relay handler seam and the default admission and forwarding policy.
//!
//! The [`Hub`] does the protocol work (reassembly, decoding, permission
//! checks, header capture) and hands each surviving event to a
//! [`RelayHandler`]. Every handler method has a default implementation that
//! delegates to the matching function in this module, so a custom handler can
//! override one event and still reuse the default for the others.

use super::Hub;
use crate::communication::Communication;
use crate::errors::HubError;
use crate::observability::metrics;
use crate::registry::Admission;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use common::types::SessionId;
use relay_protocol::{Constraint, ControlObject, DataType, Message, Status};
use std::sync::Arc;
use tracing::debug;

/// A connection that has just connected.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub connection_id: String,
    /// Session ID the client asked for, if any.
    pub session_id: Option<String>,
    /// The requested session, if it is registered.
    pub communication: Option<Arc<Communication>>,
}

/// A connection that belongs to a registered session.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub connection_id: String,
    pub communication: Arc<Communication>,
}

/// Policy invoked by the [`Hub`] for connection events and received
/// messages.
///
/// Received messages reach the handler only after the sender's permission
/// for the data type has been checked.
#[async_trait::async_trait]
pub trait RelayHandler: Send + Sync {
    async fn on_connected(&self, hub: &Hub, info: ConnectionInfo) -> Result<(), HubError> {
        connect(hub, info).await
    }

    async fn on_disconnected(&self, hub: &Hub, ctx: &ConnectionContext) -> Result<(), HubError> {
        disconnect(hub, ctx).await
    }

    /// A known connection reconnected. No-op by default.
    async fn on_reconnected(&self, _hub: &Hub, _ctx: &ConnectionContext) -> Result<(), HubError> {
        Ok(())
    }

    async fn on_control(
        &self,
        hub: &Hub,
        ctx: &ConnectionContext,
        stream_id: u32,
        control: ControlObject,
    ) -> Result<(), HubError> {
        control_default(hub, ctx, stream_id, control).await
    }

    async fn on_text(
        &self,
        hub: &Hub,
        ctx: &ConnectionContext,
        stream_id: u32,
        text: String,
        mime_type: String,
    ) -> Result<(), HubError> {
        forward_when_ready(hub, ctx, DataType::Text, stream_id, Bytes::from(text), mime_type).await
    }

    async fn on_binary(
        &self,
        hub: &Hub,
        ctx: &ConnectionContext,
        stream_id: u32,
        data: Bytes,
        mime_type: String,
    ) -> Result<(), HubError> {
        forward_when_ready(hub, ctx, DataType::Binary, stream_id, data, mime_type).await
    }

    async fn on_audio(
        &self,
        hub: &Hub,
        ctx: &ConnectionContext,
        stream_id: u32,
        data: Bytes,
        mime_type: String,
    ) -> Result<(), HubError> {
        forward_when_ready(hub, ctx, DataType::Audio, stream_id, data, mime_type).await
    }

    async fn on_video(
        &self,
        hub: &Hub,
        ctx: &ConnectionContext,
        stream_id: u32,
        data: Bytes,
        mime_type: String,
    ) -> Result<(), HubError> {
        forward_when_ready(hub, ctx, DataType::Video, stream_id, data, mime_type).await
    }
}

/// Handler that uses every default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHandler;

#[async_trait::async_trait]
impl RelayHandler for DefaultHandler {}

/// Default connect policy.
///
/// - No registered session: create one of the configured topology, admit the
///   connection as master and tell it the session status, ID and master
///   constraint. A requested session that is dropped before the connection
///   could be admitted counts as not registered.
/// - Full session, or admission refused: tell the connection `Full` with a
///   deny-all constraint.
/// - Otherwise: admit and broadcast status, session ID and slave constraint to
///   every participant.
pub async fn connect(hub: &Hub, info: ConnectionInfo) -> Result<(), HubError> {
    let connection_id = info.connection_id.as_str();

    let Some(communication) = info.communication else {
        return create_session(hub, connection_id).await;
    };

    let admission = if communication.is_full() {
        Admission::Refused
    } else {
        hub.registry().admit(&communication, connection_id).await
    };

    match admission {
        Admission::Admitted => {
            metrics::record_connection_event("connect");
            let control = ControlObject::Connect {
                status: communication.status(),
                session_id: communication.session_id().to_string(),
                constraint: Some(communication.slave_constraint()),
            };
            hub.broadcast_control(&communication, connection_id, &control, None, &[])
                .await
        }
        Admission::Refused => {
            metrics::record_connection_event("full");
            debug!(
                target: "hub.relay",
                session_id = %communication.session_id(),
                connection_id = %connection_id,
                "Session full, connection refused"
            );
            let control = ControlObject::Connect {
                status: Status::Full,
                session_id: info
                    .session_id
                    .unwrap_or_else(|| communication.session_id().to_string()),
                constraint: Some(Constraint::deny_all()),
            };
            hub.send_control(&[connection_id.to_string()], connection_id, &control, None)
                .await
        }
        Admission::Unregistered => {
            debug!(
                target: "hub.relay",
                session_id = %communication.session_id(),
                connection_id = %connection_id,
                "Requested session was dropped, creating a new one"
            );
            create_session(hub, connection_id).await
        }
    }
}

/// Create and register a session with `connection_id` as master, then tell
/// the master the session status, ID and master constraint.
async fn create_session(hub: &Hub, connection_id: &str) -> Result<(), HubError> {
    let communication = Arc::new(Communication::new(SessionId::new(), hub.config().topology));
    communication.admit(connection_id);
    hub.registry().add(Arc::clone(&communication)).await;
    metrics::record_connection_event("connect");

    let control = ControlObject::Connect {
        status: communication.status(),
        session_id: communication.session_id().to_string(),
        constraint: Some(communication.master_constraint()),
    };
    hub.send_control(&[connection_id.to_string()], connection_id, &control, None)
        .await
}

/// Default disconnect policy: remove the connection and, unless the session
/// is now empty, broadcast the new status and the stream IDs that went away.
pub async fn disconnect(hub: &Hub, ctx: &ConnectionContext) -> Result<(), HubError> {
    let communication = &ctx.communication;
    let stream_ids = hub.registry().remove(communication, &ctx.connection_id).await;
    hub.inner
        .media
        .discard_streams(communication.session_id(), &stream_ids);
    metrics::record_connection_event("disconnect");

    if communication.connection_count() == 0 {
        return Ok(());
    }

    let control = ControlObject::Disconnect {
        status: communication.status(),
        session_id: communication.session_id().to_string(),
        disconnected_stream_ids: stream_ids,
    };
    hub.broadcast_control(communication, &ctx.connection_id, &control, None, &[])
        .await
}

/// Default control handling. Replies go out on the stream ID of the request.
pub async fn control_default(
    hub: &Hub,
    ctx: &ConnectionContext,
    stream_id: u32,
    control: ControlObject,
) -> Result<(), HubError> {
    let communication = &ctx.communication;
    let connection_id = ctx.connection_id.as_str();
    let requester = [ctx.connection_id.clone()];

    match control {
        ControlObject::RequestStreamId { .. } => {
            if !communication.is_stream_id_request_allowed(connection_id) {
                metrics::record_message_dropped("not_allowed", DataType::Control.as_str());
                debug!(
                    target: "hub.relay",
                    connection_id = %connection_id,
                    "Stream ID request not allowed"
                );
                return Ok(());
            }
            let allocated = communication.allocate_stream_id(connection_id);
            if allocated == 0 {
                return Ok(());
            }
            let reply = ControlObject::RequestStreamId {
                stream_id: allocated,
            };
            hub.send_control(&requester, connection_id, &reply, Some(stream_id))
                .await
        }
        ControlObject::MediaNotSupported { mime_type } => {
            communication.disable_mime_type(connection_id, &mime_type);
            debug!(
                target: "hub.relay",
                connection_id = %connection_id,
                mime_type = %mime_type,
                "Mime type disabled for connection"
            );
            Ok(())
        }
        ControlObject::RequestMediaHeader {
            stream_id: requested,
            ..
        } => {
            let Some(header) = communication.media_header(requested) else {
                return Ok(());
            };
            let reply = ControlObject::RequestMediaHeader {
                stream_id: requested,
                media_header: Some(STANDARD.encode(&header)),
            };
            hub.send_control(&requester, connection_id, &reply, Some(stream_id))
                .await
        }
        ControlObject::StopStream { stream_id: stopped } => {
            if !communication.stop_stream(stopped, connection_id) {
                return Ok(());
            }
            hub.inner
                .media
                .discard_streams(communication.session_id(), &[stopped]);
            let notice = ControlObject::StopStream { stream_id: stopped };
            hub.broadcast_control(
                communication,
                connection_id,
                &notice,
                Some(stream_id),
                &requester,
            )
            .await
        }
        lifecycle @ (ControlObject::Connect { .. } | ControlObject::Disconnect { .. }) => {
            // Server-originated only
            debug!(
                target: "hub.relay",
                connection_id = %connection_id,
                action = lifecycle.action(),
                "Ignoring client-sent lifecycle control"
            );
            Ok(())
        }
    }
}

/// Default data handling: forward to every other participant that accepts the
/// mime type, but only while the session is ready.
pub async fn forward_when_ready(
    hub: &Hub,
    ctx: &ConnectionContext,
    data_type: DataType,
    stream_id: u32,
    data: Bytes,
    mime_type: String,
) -> Result<(), HubError> {
    let communication = &ctx.communication;
    if communication.status() != Status::Ready {
        metrics::record_message_dropped("not_ready", data_type.as_str());
        debug!(
            target: "hub.relay",
            session_id = %communication.session_id(),
            connection_id = %ctx.connection_id,
            data_type = data_type.as_str(),
            "Session not ready, message dropped"
        );
        return Ok(());
    }

    let message = Message::new(data_type, stream_id, mime_type, data, ctx.connection_id.as_str());
    hub.broadcast(communication, message, &[ctx.connection_id.clone()])
        .await
}
