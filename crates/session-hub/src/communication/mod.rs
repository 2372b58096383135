//! Communication sessions.
//!
//! A [`Communication`] owns the participant connections of one session, the
//! master/slave [`Constraint`] pair, per-connection mime-type opt-outs and the
//! [`StreamTable`]. The three [`Topology`] variants share this state and
//! differ only in their admission cap and status derivation:
//!
//! | Topology | Cap | Status |
//! |----------|-----|--------|
//! | one-to-one | 2 | 0: Disconnected, 2: Ready, 1: Waiting when climbing from zero, Disconnected when draining |
//! | one-to-many | none | Ready while the master is connected, else Disconnected |
//! | many-to-many | none | 0: Disconnected, 1: Waiting, 2+: Ready |
//!
//! All state sits behind one mutex per session, so sessions never contend
//! with each other and no lock is held across an await point.

mod streams;

pub use streams::StreamTable;

use bytes::Bytes;
use common::types::SessionId;
use relay_protocol::{Constraint, DataType, Status};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Routing topology of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topology {
    OneToOne,
    OneToMany,
    ManyToMany,
}

impl Topology {
    /// Maximum number of simultaneous connections, `None` for unbounded.
    #[must_use]
    pub const fn max_connections(&self) -> Option<usize> {
        match self {
            Topology::OneToOne => Some(2),
            Topology::OneToMany | Topology::ManyToMany => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Topology::OneToOne => "one-to-one",
            Topology::OneToMany => "one-to-many",
            Topology::ManyToMany => "many-to-many",
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topology {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "one-to-one" => Ok(Topology::OneToOne),
            "one-to-many" => Ok(Topology::OneToMany),
            "many-to-many" => Ok(Topology::ManyToMany),
            _ => Err(()),
        }
    }
}

#[derive(Debug)]
struct CommunicationState {
    /// Insertion order; the first ever admitted is the master.
    connections: Vec<String>,
    master_connection_id: Option<String>,
    master_connected: bool,
    master_constraint: Constraint,
    slave_constraint: Constraint,
    streams: StreamTable,
    disabled_mime_types: HashMap<String, HashSet<String>>,
    /// One-to-one only: status after the last admission or removal.
    last_status: Option<Status>,
}

impl CommunicationState {
    fn is_member(&self, connection_id: &str) -> bool {
        self.connections.iter().any(|c| c == connection_id)
    }

    fn is_master(&self, connection_id: &str) -> bool {
        self.master_connection_id.as_deref() == Some(connection_id)
    }

    fn one_to_one_status(&self) -> Status {
        match self.connections.len() {
            0 => Status::Disconnected,
            1 => match self.last_status {
                Some(Status::Ready | Status::Disconnected) => Status::Disconnected,
                _ => Status::Waiting,
            },
            _ => Status::Ready,
        }
    }

    /// Record the one-to-one status after a membership change. The memory is
    /// cleared once the session is empty so that a fresh climb reports
    /// Waiting again.
    fn observe_transition(&mut self) {
        self.last_status = if self.connections.is_empty() {
            None
        } else {
            Some(self.one_to_one_status())
        };
    }
}

/// One communication session.
#[derive(Debug)]
pub struct Communication {
    session_id: SessionId,
    topology: Topology,
    state: Mutex<CommunicationState>,
}

impl Communication {
    /// Create an empty session.
    ///
    /// One-to-many sessions start with a deny-all slave constraint, so slaves
    /// are receive-only until the constraint is changed.
    #[must_use]
    pub fn new(session_id: SessionId, topology: Topology) -> Self {
        let slave_constraint = match topology {
            Topology::OneToMany => Constraint::deny_all(),
            Topology::OneToOne | Topology::ManyToMany => Constraint::default(),
        };

        Self {
            session_id,
            topology,
            state: Mutex::new(CommunicationState {
                connections: Vec::new(),
                master_connection_id: None,
                master_connected: false,
                master_constraint: Constraint::default(),
                slave_constraint,
                streams: StreamTable::new(),
                disabled_mime_types: HashMap::new(),
                last_status: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, CommunicationState> {
        // No critical section leaves the state half-updated, so a poisoned
        // lock still guards consistent data.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    #[must_use]
    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// Add a connection.
    ///
    /// Returns `false`, leaving the session unchanged, if the session is full
    /// or the connection is already a member. The first connection ever
    /// admitted becomes the master.
    pub fn admit(&self, connection_id: &str) -> bool {
        let mut state = self.state();

        if let Some(max) = self.topology.max_connections() {
            if state.connections.len() >= max {
                debug!(
                    target: "hub.session",
                    session_id = %self.session_id,
                    connection_id = %connection_id,
                    "Admission refused, session full"
                );
                return false;
            }
        }
        if state.is_member(connection_id) {
            return false;
        }

        if state.master_connection_id.is_none() {
            state.master_connection_id = Some(connection_id.to_string());
            state.master_connected = true;
        }
        state.connections.push(connection_id.to_string());
        state.observe_transition();

        debug!(
            target: "hub.session",
            session_id = %self.session_id,
            connection_id = %connection_id,
            connections = state.connections.len(),
            "Connection admitted"
        );
        true
    }

    /// Remove a connection together with its stream IDs, their cached headers
    /// and its mime-type opt-outs.
    ///
    /// Removing a connection that is not a member is a no-op. Removing the
    /// master clears `is_master_connected` but keeps the master identity.
    ///
    /// Returns the released stream IDs, ascending.
    pub fn remove(&self, connection_id: &str) -> Vec<u32> {
        let mut state = self.state();

        let before = state.connections.len();
        state.connections.retain(|c| c != connection_id);
        if state.connections.len() == before {
            return Vec::new();
        }

        let released = state.streams.release_owner(connection_id);
        state.disabled_mime_types.remove(connection_id);
        if state.is_master(connection_id) {
            state.master_connected = false;
        }
        state.observe_transition();

        debug!(
            target: "hub.session",
            session_id = %self.session_id,
            connection_id = %connection_id,
            released_streams = released.len(),
            connections = state.connections.len(),
            "Connection removed"
        );
        released
    }

    /// Allocate a unique stream ID to a member connection.
    ///
    /// Returns 0 if `connection_id` is not a member.
    pub fn allocate_stream_id(&self, connection_id: &str) -> u32 {
        let mut state = self.state();
        if !state.is_member(connection_id) {
            return 0;
        }
        state.streams.allocate(connection_id).unwrap_or(0)
    }

    /// Whether `connection_id` may send `data_type`.
    ///
    /// Control is always allowed. The master needs only the master
    /// constraint; everyone else needs both constraints.
    #[must_use]
    pub fn is_allowed(&self, connection_id: &str, data_type: DataType) -> bool {
        if data_type == DataType::Control {
            return true;
        }
        let state = self.state();
        let master_allows = state.master_constraint.is_allowed(data_type);
        if state.is_master(connection_id) {
            return master_allows;
        }
        master_allows && state.slave_constraint.is_allowed(data_type)
    }

    /// Whether `connection_id` may request a stream ID. Same rule as
    /// [`Communication::is_allowed`].
    #[must_use]
    pub fn is_stream_id_request_allowed(&self, connection_id: &str) -> bool {
        let state = self.state();
        let master_allows = state.master_constraint.request_stream_id_allowed;
        if state.is_master(connection_id) {
            return master_allows;
        }
        master_allows && state.slave_constraint.request_stream_id_allowed
    }

    /// Stop sending `mime_type` to `connection_id`. Ignored for non-members.
    pub fn disable_mime_type(&self, connection_id: &str, mime_type: &str) {
        let mut state = self.state();
        if !state.is_member(connection_id) {
            return;
        }
        state
            .disabled_mime_types
            .entry(connection_id.to_string())
            .or_default()
            .insert(mime_type.to_string());
    }

    #[must_use]
    pub fn is_mime_type_enabled(&self, connection_id: &str, mime_type: &str) -> bool {
        let state = self.state();
        !state
            .disabled_mime_types
            .get(connection_id)
            .is_some_and(|disabled| disabled.contains(mime_type))
    }

    /// Members that have not opted out of `mime_type`, in admission order.
    #[must_use]
    pub fn connection_ids_supporting_mime_type(&self, mime_type: &str) -> Vec<String> {
        let state = self.state();
        state
            .connections
            .iter()
            .filter(|id| {
                !state
                    .disabled_mime_types
                    .get(id.as_str())
                    .is_some_and(|disabled| disabled.contains(mime_type))
            })
            .cloned()
            .collect()
    }

    /// Cache a media header. Ignored for unique stream IDs that are not
    /// currently allocated.
    pub fn set_media_header(&self, stream_id: u32, header: Bytes) -> bool {
        self.state().streams.set_header(stream_id, header)
    }

    /// Whether a media header can still be cached for `stream_id`.
    #[must_use]
    pub fn accepts_media_header(&self, stream_id: u32) -> bool {
        self.state().streams.accepts_header(stream_id)
    }

    #[must_use]
    pub fn media_header(&self, stream_id: u32) -> Option<Bytes> {
        self.state().streams.header(stream_id)
    }

    #[must_use]
    pub fn has_media_header(&self, stream_id: u32) -> bool {
        self.state().streams.has_header(stream_id)
    }

    /// End a stream allocated to `connection_id`, discarding its header.
    ///
    /// Returns `false` if the stream was not allocated to that connection,
    /// including on a repeated call.
    pub fn stop_stream(&self, stream_id: u32, connection_id: &str) -> bool {
        self.state().streams.stop(stream_id, connection_id)
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        match self.topology.max_connections() {
            Some(max) => self.state().connections.len() >= max,
            None => false,
        }
    }

    #[must_use]
    pub fn is_master_connected(&self) -> bool {
        self.state().master_connected
    }

    /// Current status of the session.
    #[must_use]
    pub fn status(&self) -> Status {
        let state = self.state();
        match self.topology {
            Topology::OneToOne => state.one_to_one_status(),
            Topology::OneToMany => {
                if state.master_connected {
                    Status::Ready
                } else {
                    Status::Disconnected
                }
            }
            Topology::ManyToMany => match state.connections.len() {
                0 => Status::Disconnected,
                1 => Status::Waiting,
                _ => Status::Ready,
            },
        }
    }

    /// Member connections in admission order.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<String> {
        self.state().connections.clone()
    }

    /// Stream IDs currently allocated to `connection_id`, ascending.
    #[must_use]
    pub fn connection_stream_ids(&self, connection_id: &str) -> Vec<u32> {
        self.state().streams.owned_by(connection_id)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state().connections.len()
    }

    #[must_use]
    pub fn is_member(&self, connection_id: &str) -> bool {
        self.state().is_member(connection_id)
    }

    /// The first connection ever admitted, even if it has since left.
    #[must_use]
    pub fn master_connection_id(&self) -> Option<String> {
        self.state().master_connection_id.clone()
    }

    #[must_use]
    pub fn master_constraint(&self) -> Constraint {
        self.state().master_constraint
    }

    #[must_use]
    pub fn slave_constraint(&self) -> Constraint {
        self.state().slave_constraint
    }

    pub fn set_master_constraint(&self, constraint: &Constraint) {
        self.state().master_constraint.set_from(constraint);
    }

    pub fn set_slave_constraint(&self, constraint: &Constraint) {
        self.state().slave_constraint.set_from(constraint);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn session(topology: Topology) -> Communication {
        Communication::new(SessionId::from("session-1"), topology)
    }

    #[test]
    fn test_one_to_one_status_hysteresis() {
        let comm = session(Topology::OneToOne);
        assert_eq!(comm.status(), Status::Disconnected);

        assert!(comm.admit("a"));
        assert_eq!(comm.status(), Status::Waiting);
        assert!(comm.admit("b"));
        assert_eq!(comm.status(), Status::Ready);
        comm.remove("b");
        assert_eq!(comm.status(), Status::Disconnected);
        comm.remove("a");
        assert_eq!(comm.status(), Status::Disconnected);
    }

    #[test]
    fn test_one_to_one_hysteresis_does_not_depend_on_reads() {
        let comm = session(Topology::OneToOne);
        comm.admit("a");
        comm.admit("b");
        comm.remove("a");
        assert_eq!(comm.status(), Status::Disconnected);
        // Re-reading does not flip the state
        assert_eq!(comm.status(), Status::Disconnected);
    }

    #[test]
    fn test_one_to_one_refill_after_drain_stays_consistent() {
        let comm = session(Topology::OneToOne);
        comm.admit("a");
        comm.admit("b");
        comm.remove("b");
        assert!(comm.admit("c"));
        assert_eq!(comm.status(), Status::Ready);
        comm.remove("a");
        comm.remove("c");
        // Empty again; the next climb starts from zero
        assert!(comm.admit("d"));
        assert_eq!(comm.status(), Status::Waiting);
    }

    #[test]
    fn test_one_to_one_admission_cap() {
        let comm = session(Topology::OneToOne);
        assert!(comm.admit("a"));
        assert!(!comm.is_full());
        assert!(comm.admit("b"));
        assert!(comm.is_full());

        assert!(!comm.admit("c"));
        assert_eq!(comm.connection_ids(), vec!["a", "b"]);
        assert_eq!(comm.status(), Status::Ready);
    }

    #[test]
    fn test_many_to_many_status_by_count() {
        let comm = session(Topology::ManyToMany);
        let mut observed = vec![comm.status()];
        for id in ["a", "b", "c"] {
            assert!(comm.admit(id));
            observed.push(comm.status());
        }
        assert_eq!(
            observed,
            vec![
                Status::Disconnected,
                Status::Waiting,
                Status::Ready,
                Status::Ready
            ]
        );
        assert!(!comm.is_full());
    }

    #[test]
    fn test_one_to_many_status_follows_master() {
        let comm = session(Topology::OneToMany);
        assert_eq!(comm.status(), Status::Disconnected);

        comm.admit("master");
        assert_eq!(comm.status(), Status::Ready);
        for i in 0..5 {
            comm.admit(&format!("slave-{i}"));
            assert_eq!(comm.status(), Status::Ready);
        }

        comm.remove("master");
        assert_eq!(comm.connection_count(), 5);
        assert_eq!(comm.status(), Status::Disconnected);
        assert!(!comm.is_master_connected());
    }

    #[test]
    fn test_one_to_many_slaves_are_receive_only() {
        let comm = session(Topology::OneToMany);
        comm.admit("master");
        comm.admit("slave");

        assert!(comm.is_allowed("master", DataType::Video));
        assert!(!comm.is_allowed("slave", DataType::Video));
        assert!(!comm.is_allowed("slave", DataType::Text));
        assert!(comm.is_allowed("slave", DataType::Control));
        assert!(comm.is_stream_id_request_allowed("master"));
        assert!(!comm.is_stream_id_request_allowed("slave"));
    }

    #[test]
    fn test_master_identity_survives_disconnect() {
        let comm = session(Topology::ManyToMany);
        comm.admit("a");
        comm.admit("b");
        comm.remove("a");
        comm.admit("c");

        assert_eq!(comm.master_connection_id().as_deref(), Some("a"));
        assert!(!comm.is_master_connected());
        // Rejoining under the same ID is still the master
        comm.admit("a");
        assert_eq!(comm.master_connection_id().as_deref(), Some("a"));
    }

    #[test]
    fn test_permission_rule_master_vs_slave() {
        let comm = session(Topology::ManyToMany);
        comm.admit("master");
        comm.admit("slave");

        let mut slave = Constraint::default();
        slave.set_allowed(DataType::Audio, false);
        comm.set_slave_constraint(&slave);
        assert!(comm.is_allowed("master", DataType::Audio));
        assert!(!comm.is_allowed("slave", DataType::Audio));

        let mut master = Constraint::default();
        master.set_allowed(DataType::Text, false);
        master.request_stream_id_allowed = false;
        comm.set_master_constraint(&master);
        assert!(!comm.is_allowed("master", DataType::Text));
        assert!(!comm.is_allowed("slave", DataType::Text));
        assert!(!comm.is_stream_id_request_allowed("master"));
        assert!(!comm.is_stream_id_request_allowed("slave"));

        comm.set_master_constraint(&Constraint::deny_all());
        comm.set_slave_constraint(&Constraint::deny_all());
        assert!(comm.is_allowed("master", DataType::Control));
        assert!(comm.is_allowed("slave", DataType::Control));
    }

    #[test]
    fn test_stream_ids_are_shared_and_member_only() {
        let comm = session(Topology::ManyToMany);
        comm.admit("a");
        comm.admit("b");

        assert_eq!(comm.allocate_stream_id("a"), 50000);
        assert_eq!(comm.allocate_stream_id("b"), 50001);
        assert_eq!(comm.allocate_stream_id("a"), 50002);
        assert_eq!(comm.allocate_stream_id("stranger"), 0);
        assert_eq!(comm.connection_stream_ids("a"), vec![50000, 50002]);
    }

    #[test]
    fn test_remove_purges_streams_headers_and_mime_opt_outs() {
        let comm = session(Topology::ManyToMany);
        comm.admit("a");
        comm.admit("b");
        let id = comm.allocate_stream_id("a");
        comm.set_media_header(id, Bytes::from_static(b"header"));
        comm.disable_mime_type("a", "video/webm");

        assert_eq!(comm.remove("a"), vec![id]);

        assert!(comm.connection_stream_ids("a").is_empty());
        assert!(!comm.has_media_header(id));
        assert!(comm.is_mime_type_enabled("a", "video/webm"));
        assert!(!comm.stop_stream(id, "a"));
    }

    #[test]
    fn test_remove_unknown_connection_is_noop() {
        let comm = session(Topology::OneToOne);
        comm.admit("a");
        assert!(comm.remove("ghost").is_empty());
        assert_eq!(comm.connection_ids(), vec!["a"]);
        assert_eq!(comm.status(), Status::Waiting);
    }

    #[test]
    fn test_duplicate_admission_is_refused() {
        let comm = session(Topology::ManyToMany);
        assert!(comm.admit("a"));
        assert!(!comm.admit("a"));
        assert_eq!(comm.connection_count(), 1);
    }

    #[test]
    fn test_mime_type_opt_out() {
        let comm = session(Topology::ManyToMany);
        for id in ["a", "b", "c"] {
            comm.admit(id);
        }
        comm.disable_mime_type("b", "text/plain");
        comm.disable_mime_type("stranger", "text/plain");

        assert!(!comm.is_mime_type_enabled("b", "text/plain"));
        assert!(comm.is_mime_type_enabled("b", "video/webm"));
        assert!(comm.is_mime_type_enabled("stranger", "text/plain"));
        assert_eq!(
            comm.connection_ids_supporting_mime_type("text/plain"),
            vec!["a", "c"]
        );
    }

    #[test]
    fn test_stop_stream() {
        let comm = session(Topology::ManyToMany);
        comm.admit("a");
        comm.admit("b");
        let id = comm.allocate_stream_id("a");
        comm.set_media_header(id, Bytes::from_static(b"hdr"));

        assert!(!comm.stop_stream(id, "b"));
        assert!(comm.stop_stream(id, "a"));
        assert!(!comm.has_media_header(id));
        assert!(!comm.stop_stream(id, "a"));
    }

    #[test]
    fn test_topology_parse() {
        assert_eq!("one-to-one".parse::<Topology>(), Ok(Topology::OneToOne));
        assert_eq!(" One-To-Many ".parse::<Topology>(), Ok(Topology::OneToMany));
        assert_eq!("many-to-many".parse::<Topology>(), Ok(Topology::ManyToMany));
        assert!("mesh".parse::<Topology>().is_err());
        assert_eq!(Topology::OneToMany.to_string(), "one-to-many");
    }
}
