//! Chunk framing for oversized transport frames.
//!
//! An encoded batch whose length reaches [`CHUNK_THRESHOLD`] characters is cut
//! into threshold-sized pieces. Every piece is prefixed with
//! [`CHUNK_SENTINEL`]; the last piece also ends with it:
//!
//! ```text
//! "!AAAA…"  "!BBBB…"  "!CC!"
//! ```
//!
//! Frames that do not start with the sentinel are complete payloads. The
//! base64 alphabet never contains the sentinel, so the framing is unambiguous.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Maximum frame length before an outgoing payload is chunked.
pub const CHUNK_THRESHOLD: usize = 32766;

/// Marker character for chunk fragments.
pub const CHUNK_SENTINEL: char = '!';

/// Split a payload into transport frames.
///
/// Payloads shorter than `threshold` characters are returned unframed.
/// A `threshold` of zero disables chunking.
#[must_use]
pub fn split_frames(payload: &str, threshold: usize) -> Vec<String> {
    if threshold == 0 || payload.chars().count() < threshold {
        return vec![payload.to_string()];
    }

    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::with_capacity(threshold + 2);
    current.push(CHUNK_SENTINEL);
    let mut count = 0usize;

    for c in payload.chars() {
        current.push(c);
        count += 1;
        if count == threshold {
            pieces.push(std::mem::replace(
                &mut current,
                String::with_capacity(threshold + 2),
            ));
            current.push(CHUNK_SENTINEL);
            count = 0;
        }
    }

    if count > 0 {
        pieces.push(current);
    }

    if let Some(last) = pieces.last_mut() {
        last.push(CHUNK_SENTINEL);
    }

    pieces
}

/// Outcome of feeding one frame to a [`ChunkAssembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembly {
    /// A complete payload is ready for decoding.
    Complete(String),
    /// A fragment was buffered; more are expected.
    Pending,
}

/// Error type for reassembly
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChunkError {
    /// The partial payload grew past the configured cap and was discarded
    #[error("Reassembly buffer exceeded {limit} bytes")]
    Overflow { limit: usize },
}

/// In-progress reassembly for one connection.
#[derive(Debug)]
struct ChunkBuffer {
    data: String,
    started_at: Instant,
}

/// What one fragment did to its buffer.
enum Step {
    Pending,
    Last(String),
    Overflow,
}

/// Per-connection chunk reassembly state.
///
/// Each connection owns at most one in-progress buffer. Buffers are removed
/// when the final fragment arrives, when they exceed `max_bytes`, when the
/// connection goes away ([`ChunkAssembler::discard`]), or when they are older
/// than a caller-supplied age ([`ChunkAssembler::purge_older_than`]).
///
/// Buffers live in a sharded map, so connections only contend when they hash
/// to the same shard.
#[derive(Debug)]
pub struct ChunkAssembler {
    buffers: DashMap<String, ChunkBuffer>,
    max_bytes: usize,
}

impl ChunkAssembler {
    /// Create an assembler that caps each partial payload at `max_bytes`.
    #[must_use]
    pub fn new(max_bytes: usize) -> Self {
        Self {
            buffers: DashMap::new(),
            max_bytes,
        }
    }

    /// Feed one received frame for `connection_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::Overflow`] if appending the fragment would push
    /// the buffer past the cap. The buffer is dropped in that case.
    pub fn push(
        &self,
        connection_id: &str,
        frame: &str,
        now: Instant,
    ) -> Result<Reassembly, ChunkError> {
        let Some(body) = frame.strip_prefix(CHUNK_SENTINEL) else {
            return Ok(Reassembly::Complete(frame.to_string()));
        };

        let (content, is_last) = match body.strip_suffix(CHUNK_SENTINEL) {
            Some(inner) => (inner, true),
            None => (body, false),
        };

        // The shard guard must be released before the entry is removed.
        let step = {
            let mut buffer = self
                .buffers
                .entry(connection_id.to_string())
                .or_insert_with(|| ChunkBuffer {
                    data: String::new(),
                    started_at: now,
                });

            if buffer.data.len() + content.len() > self.max_bytes {
                Step::Overflow
            } else {
                buffer.data.push_str(content);
                if is_last {
                    Step::Last(std::mem::take(&mut buffer.data))
                } else {
                    Step::Pending
                }
            }
        };

        match step {
            Step::Pending => Ok(Reassembly::Pending),
            Step::Overflow => {
                self.buffers.remove(connection_id);
                warn!(
                    target: "hub.chunk",
                    connection_id = %connection_id,
                    limit = self.max_bytes,
                    "Reassembly buffer overflow, discarding partial payload"
                );
                Err(ChunkError::Overflow {
                    limit: self.max_bytes,
                })
            }
            Step::Last(payload) => {
                self.buffers.remove(connection_id);
                debug!(
                    target: "hub.chunk",
                    connection_id = %connection_id,
                    length = payload.len(),
                    "Chunked payload reassembled"
                );
                Ok(Reassembly::Complete(payload))
            }
        }
    }

    /// Drop any partial payload for `connection_id`.
    ///
    /// Returns `true` if a buffer existed.
    pub fn discard(&self, connection_id: &str) -> bool {
        self.buffers.remove(connection_id).is_some()
    }

    /// Drop every partial payload started more than `max_age` before `now`.
    ///
    /// Returns the number of buffers dropped.
    pub fn purge_older_than(&self, now: Instant, max_age: Duration) -> usize {
        let mut purged = 0;
        self.buffers.retain(|_, buffer| {
            let keep = now.saturating_duration_since(buffer.started_at) <= max_age;
            if !keep {
                purged += 1;
            }
            keep
        });
        purged
    }

    /// Whether `connection_id` has a partial payload buffered.
    #[must_use]
    pub fn is_pending(&self, connection_id: &str) -> bool {
        self.buffers.contains_key(connection_id)
    }

    /// Number of connections with a partial payload.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.buffers.len()
    }
}
