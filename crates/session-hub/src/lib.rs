//! Session Hub Library
//!
//! The hub groups transport-level connections into communication sessions
//! and relays multiplexed data streams between the participants:
//!
//! - Session topologies (one-to-one, one-to-many, many-to-many) with their
//!   admission caps and status state machines
//! - Master/slave constraint model deciding who may send which data type
//! - Unique stream ID allocation and media-header caching for late joiners
//! - Chunk reassembly, batch decoding and per-message dispatch
//!
//! # Architecture
//!
//! ```text
//! Transport (external)
//!   │ on_connect / on_disconnect / on_reconnect / on_receive
//!   ▼
//! Hub ──► SessionRegistry ──► Communication (one per session)
//!   │                           ├── connections, master, constraints
//!   │                           └── StreamTable (ids, owners, headers)
//!   ├── ChunkAssembler (per connection)
//!   ├── MediaAccumulator (per session, per stream)
//!   └── RelayHandler (policy, DefaultHandler by default)
//!         │ send / broadcast
//!         ▼
//!       Transport::send(ids, frame)
//! ```
//!
//! # Modules
//!
//! - [`communication`] - Sessions, topologies and the stream table
//! - [`registry`] - Session and connection indexes
//! - [`relay`] - The [`Hub`] and the [`RelayHandler`] seam
//! - [`transport`] - The outgoing [`Transport`] seam
//! - [`config`] - Hub configuration from environment
//! - [`errors`] - Error types

pub mod communication;
pub mod config;
pub mod errors;
pub mod observability;
pub mod registry;
pub mod relay;
pub mod transport;

pub use communication::{Communication, StreamTable, Topology};
pub use config::{ConfigError, DispatchMode, HubConfig};
pub use errors::HubError;
pub use registry::{Admission, SessionRegistry};
pub use relay::{ConnectionContext, ConnectionInfo, DefaultHandler, Hub, HubBuilder, RelayHandler};
pub use transport::Transport;
