//! Outgoing transport seam.

use crate::errors::HubError;

/// Text-frame transport the hub sends through.
///
/// The transport delivers each frame to every listed connection, in call
/// order per connection. Unknown connection IDs are the transport's concern.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Send one frame to the given connections.
    async fn send(&self, connection_ids: &[String], frame: String) -> Result<(), HubError>;
}
