//! Session registry.
//!
//! Indexes sessions by ID and connections by the session they belong to.
//! Admission and removal of registered sessions go through the registry so
//! both indexes change together with the session itself, and a session whose
//! last connection leaves is dropped in the same critical section.
//!
//! Lock order is registry, then session.

use crate::communication::Communication;
use crate::observability::metrics;
use common::types::SessionId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Outcome of [`SessionRegistry::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// The session is full or the connection is already a member.
    Refused,
    /// The session is no longer registered; nothing was changed.
    Unregistered,
}

#[derive(Debug, Default)]
struct RegistryMaps {
    sessions: HashMap<SessionId, Arc<Communication>>,
    connections: HashMap<String, SessionId>,
}

/// Maps session IDs and connection IDs to their [`Communication`].
#[derive(Debug, Default)]
pub struct SessionRegistry {
    maps: RwLock<RegistryMaps>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and index its current connections.
    ///
    /// Registering a session ID that is already present replaces the old
    /// session in the session index.
    pub async fn add(&self, communication: Arc<Communication>) {
        let mut maps = self.maps.write().await;
        let session_id = communication.session_id().clone();

        for connection_id in communication.connection_ids() {
            maps.connections.insert(connection_id, session_id.clone());
        }
        maps.sessions.insert(session_id.clone(), communication);
        metrics::set_sessions_active(maps.sessions.len());

        info!(
            target: "hub.registry",
            session_id = %session_id,
            sessions = maps.sessions.len(),
            "Session registered"
        );
    }

    /// Session the connection belongs to.
    pub async fn by_connection(&self, connection_id: &str) -> Option<Arc<Communication>> {
        let maps = self.maps.read().await;
        let session_id = maps.connections.get(connection_id)?;
        maps.sessions.get(session_id).cloned()
    }

    /// Session with the given ID. An absent ID is looked up as `""`.
    pub async fn by_session(&self, session_id: Option<&str>) -> Option<Arc<Communication>> {
        let key = SessionId::from(session_id.unwrap_or_default());
        self.maps.read().await.sessions.get(&key).cloned()
    }

    /// Admit `connection_id` to a registered session and index it.
    ///
    /// A session that was dropped after the caller looked it up is left
    /// untouched and reported as [`Admission::Unregistered`].
    pub async fn admit(&self, communication: &Arc<Communication>, connection_id: &str) -> Admission {
        let mut maps = self.maps.write().await;
        let session_id = communication.session_id();
        let registered = maps
            .sessions
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current, communication));
        if !registered {
            debug!(
                target: "hub.registry",
                session_id = %session_id,
                connection_id = %connection_id,
                "Admission to unregistered session refused"
            );
            return Admission::Unregistered;
        }

        if !communication.admit(connection_id) {
            return Admission::Refused;
        }
        maps.connections
            .insert(connection_id.to_string(), session_id.clone());
        Admission::Admitted
    }

    /// Remove `connection_id` from a session and drop its index entry.
    ///
    /// If the session is left without connections it is dropped from the
    /// registry. Returns the stream IDs released with the connection.
    pub async fn remove(&self, communication: &Arc<Communication>, connection_id: &str) -> Vec<u32> {
        let mut maps = self.maps.write().await;
        let released = communication.remove(connection_id);

        let session_id = communication.session_id();
        if maps
            .connections
            .get(connection_id)
            .is_some_and(|indexed| indexed == session_id)
        {
            maps.connections.remove(connection_id);
        }

        if communication.connection_count() == 0 && maps.sessions.remove(session_id).is_some() {
            metrics::set_sessions_active(maps.sessions.len());
            debug!(
                target: "hub.registry",
                session_id = %session_id,
                sessions = maps.sessions.len(),
                "Empty session dropped"
            );
        }
        released
    }

    /// Number of registered sessions.
    pub async fn len(&self) -> usize {
        self.maps.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.maps.read().await.sessions.is_empty()
    }

    /// IDs of all registered sessions, in no particular order.
    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.maps.read().await.sessions.keys().cloned().collect()
    }
}
