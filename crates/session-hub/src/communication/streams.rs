//! Per-session stream table.
//!
//! One entry per stream ID the session knows about, holding the connection
//! that was granted the ID and the cached media header. Keeping both in one
//! table means removing a connection removes its IDs and their headers in a
//! single step.

use bytes::Bytes;
use relay_protocol::UNIQUE_STREAM_ID_START;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
struct StreamEntry {
    /// Connection the ID was allocated to. `None` for default stream IDs
    /// that only carry a cached header.
    owner: Option<String>,
    header: Option<Bytes>,
}

/// Stream IDs, their owners and cached media headers for one session.
#[derive(Debug, Clone)]
pub struct StreamTable {
    next_id: u32,
    entries: BTreeMap<u32, StreamEntry>,
}

impl Default for StreamTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: UNIQUE_STREAM_ID_START,
            entries: BTreeMap::new(),
        }
    }

    /// Allocate the next unique ID to `owner`.
    ///
    /// Returns `None` once the ID space is exhausted.
    pub fn allocate(&mut self, owner: &str) -> Option<u32> {
        let id = self.next_id;
        self.next_id = self.next_id.checked_add(1)?;
        self.entries.insert(
            id,
            StreamEntry {
                owner: Some(owner.to_string()),
                header: None,
            },
        );
        Some(id)
    }

    /// IDs currently allocated to `owner`, ascending.
    #[must_use]
    pub fn owned_by(&self, owner: &str) -> Vec<u32> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.owner.as_deref() == Some(owner))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Drop every ID owned by `owner` together with its header.
    ///
    /// Returns the dropped IDs, ascending.
    pub fn release_owner(&mut self, owner: &str) -> Vec<u32> {
        let released = self.owned_by(owner);
        for id in &released {
            self.entries.remove(id);
        }
        released
    }

    /// Drop `stream_id` if it is owned by `owner`.
    ///
    /// Returns `false` if the ID is unknown or owned by someone else.
    pub fn stop(&mut self, stream_id: u32, owner: &str) -> bool {
        let owned = self
            .entries
            .get(&stream_id)
            .is_some_and(|entry| entry.owner.as_deref() == Some(owner));
        if owned {
            self.entries.remove(&stream_id);
        }
        owned
    }

    /// Whether a header may be cached for `stream_id`: any default ID, or a
    /// unique ID that is still allocated.
    #[must_use]
    pub fn accepts_header(&self, stream_id: u32) -> bool {
        stream_id < UNIQUE_STREAM_ID_START || self.entries.contains_key(&stream_id)
    }

    /// Cache a header for `stream_id`, replacing any previous one.
    ///
    /// Returns `false`, caching nothing, for a unique ID that was never
    /// allocated or has been stopped or released.
    pub fn set_header(&mut self, stream_id: u32, header: Bytes) -> bool {
        if !self.accepts_header(stream_id) {
            return false;
        }
        self.entries.entry(stream_id).or_default().header = Some(header);
        true
    }

    #[must_use]
    pub fn header(&self, stream_id: u32) -> Option<Bytes> {
        self.entries
            .get(&stream_id)
            .and_then(|entry| entry.header.clone())
    }

    #[must_use]
    pub fn has_header(&self, stream_id: u32) -> bool {
        self.entries
            .get(&stream_id)
            .is_some_and(|entry| entry.header.is_some())
    }

    /// Owner of `stream_id`, if it was allocated.
    #[must_use]
    pub fn owner(&self, stream_id: u32) -> Option<&str> {
        self.entries
            .get(&stream_id)
            .and_then(|entry| entry.owner.as_deref())
    }
}
