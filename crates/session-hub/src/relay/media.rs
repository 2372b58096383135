//! Media header capture.
//!
//! The first bytes of each WebM stream are accumulated per session and per
//! stream until the probe size is exceeded, then handed to the header
//! extractor once. The result (or an empty header if the container is
//! malformed) is cached on the session so late joiners can request it.

use crate::communication::Communication;
use crate::observability::metrics;
use bytes::Bytes;
use common::types::SessionId;
use relay_protocol::HeaderExtractor;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// Whether header capture applies to this mime type.
#[must_use]
pub fn is_webm(mime_type: &str) -> bool {
    mime_type.to_ascii_lowercase().contains("webm")
}

/// Per-session, per-stream accumulation buffers.
#[derive(Debug)]
pub struct MediaAccumulator {
    probe_bytes: usize,
    pending: Mutex<HashMap<SessionId, HashMap<u32, Vec<u8>>>>,
}

impl MediaAccumulator {
    #[must_use]
    pub fn new(probe_bytes: usize) -> Self {
        Self {
            probe_bytes,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Feed one media chunk. Caches a header on `communication` once enough
    /// bytes have been seen for a stream without a cached header.
    ///
    /// Media on a unique stream ID that has been stopped or released is not
    /// buffered, and any bytes already buffered for it are dropped.
    pub fn observe(
        &self,
        communication: &Communication,
        stream_id: u32,
        data: &[u8],
        mime_type: &str,
        extractor: &dyn HeaderExtractor,
    ) {
        if !is_webm(mime_type) || communication.has_media_header(stream_id) {
            return;
        }

        let session_id = communication.session_id();
        if !communication.accepts_media_header(stream_id) {
            self.discard_streams(session_id, &[stream_id]);
            return;
        }

        let probe = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let streams = pending.entry(session_id.clone()).or_default();
            let buffer = streams.entry(stream_id).or_default();
            buffer.extend_from_slice(data);
            if buffer.len() <= self.probe_bytes {
                return;
            }
            let probe = streams.remove(&stream_id).unwrap_or_default();
            if streams.is_empty() {
                pending.remove(session_id);
            }
            probe
        };

        let header = match extractor.extract_header(&probe) {
            Ok(header) => {
                metrics::record_media_header("extracted");
                debug!(
                    target: "hub.media",
                    session_id = %session_id,
                    stream_id = stream_id,
                    header_len = header.len(),
                    "Media header cached"
                );
                Bytes::from(header)
            }
            Err(e) => {
                metrics::record_media_header("malformed");
                warn!(
                    target: "hub.media",
                    session_id = %session_id,
                    stream_id = stream_id,
                    error = %e,
                    "Malformed media container, caching empty header"
                );
                Bytes::new()
            }
        };
        if !communication.set_media_header(stream_id, header) {
            debug!(
                target: "hub.media",
                session_id = %session_id,
                stream_id = stream_id,
                "Stream ended during extraction, header dropped"
            );
        }
    }

    /// Drop the buffers of the given streams of a session.
    pub fn discard_streams(&self, session_id: &SessionId, stream_ids: &[u32]) {
        if stream_ids.is_empty() {
            return;
        }
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(streams) = pending.get_mut(session_id) else {
            return;
        };
        for stream_id in stream_ids {
            streams.remove(stream_id);
        }
        if streams.is_empty() {
            pending.remove(session_id);
        }
    }

    /// Drop all buffers of a session.
    pub fn discard_session(&self, session_id: &SessionId) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
    }

    /// Bytes buffered for one stream.
    #[must_use]
    pub fn buffered(&self, session_id: &SessionId, stream_id: u32) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .and_then(|streams| streams.get(&stream_id))
            .map_or(0, Vec::len)
    }

    /// Whether any buffer exists for the session.
    #[must_use]
    pub fn has_session(&self, session_id: &SessionId) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(session_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::communication::Topology;
    use relay_protocol::WebmError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExtractor {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingExtractor {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    impl HeaderExtractor for CountingExtractor {
        fn extract_header(&self, data: &[u8]) -> Result<Vec<u8>, WebmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(WebmError::NotEbml);
            }
            Ok(data.get(..4).unwrap_or(data).to_vec())
        }
    }

    fn session() -> Communication {
        let comm = Communication::new(SessionId::from("s"), Topology::ManyToMany);
        comm.admit("a");
        comm
    }

    #[test]
    fn test_webm_detection_is_case_insensitive() {
        assert!(is_webm("video/webm;codecs=vp8"));
        assert!(is_webm("audio/WebM"));
        assert!(!is_webm("video/mp4"));
        assert!(!is_webm(""));
    }

    #[test]
    fn test_extracts_once_after_threshold() {
        let accumulator = MediaAccumulator::new(8);
        let extractor = CountingExtractor::new(false);
        let comm = session();

        accumulator.observe(&comm, 5, &[1, 2, 3, 4, 5], "video/webm", &extractor);
        assert_eq!(accumulator.buffered(comm.session_id(), 5), 5);
        // Exactly at the threshold is not enough
        accumulator.observe(&comm, 5, &[6, 7, 8], "video/webm", &extractor);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);

        accumulator.observe(&comm, 5, &[9], "video/webm", &extractor);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(comm.media_header(5).unwrap(), Bytes::from_static(&[1, 2, 3, 4]));
        assert!(!accumulator.has_session(comm.session_id()));

        // Cached: no more accumulation
        accumulator.observe(&comm, 5, &[0; 32], "video/webm", &extractor);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(accumulator.buffered(comm.session_id(), 5), 0);
    }

    #[test]
    fn test_malformed_container_caches_empty_header() {
        let accumulator = MediaAccumulator::new(2);
        let extractor = CountingExtractor::new(true);
        let comm = session();

        accumulator.observe(&comm, 4, &[0; 3], "audio/webm", &extractor);

        assert!(comm.has_media_header(4));
        assert!(comm.media_header(4).unwrap().is_empty());
        accumulator.observe(&comm, 4, &[0; 3], "audio/webm", &extractor);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_non_webm_is_ignored() {
        let accumulator = MediaAccumulator::new(2);
        let extractor = CountingExtractor::new(false);
        let comm = session();

        accumulator.observe(&comm, 4, &[0; 16], "audio/ogg", &extractor);

        assert!(!comm.has_media_header(4));
        assert!(!accumulator.has_session(comm.session_id()));
    }

    #[test]
    fn test_stopped_stream_is_not_buffered_or_cached() {
        let accumulator = MediaAccumulator::new(8);
        let extractor = CountingExtractor::new(false);
        let comm = session();
        let id = comm.allocate_stream_id("a");

        accumulator.observe(&comm, id, &[0; 4], "video/webm", &extractor);
        assert_eq!(accumulator.buffered(comm.session_id(), id), 4);

        assert!(comm.stop_stream(id, "a"));
        accumulator.observe(&comm, id, &[0; 16], "video/webm", &extractor);

        assert_eq!(accumulator.buffered(comm.session_id(), id), 0);
        assert!(!accumulator.has_session(comm.session_id()));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
        assert!(!comm.has_media_header(id));
    }

    #[test]
    fn test_discard_streams_keeps_other_streams() {
        let accumulator = MediaAccumulator::new(64);
        let extractor = CountingExtractor::new(false);
        let comm = session();
        let id = comm.allocate_stream_id("a");

        accumulator.observe(&comm, id, &[0; 4], "video/webm", &extractor);
        accumulator.observe(&comm, 4, &[0; 4], "audio/webm", &extractor);
        accumulator.discard_streams(comm.session_id(), &[id]);

        assert_eq!(accumulator.buffered(comm.session_id(), id), 0);
        assert_eq!(accumulator.buffered(comm.session_id(), 4), 4);

        accumulator.discard_streams(comm.session_id(), &[4]);
        assert!(!accumulator.has_session(comm.session_id()));
    }

    #[test]
    fn test_session_map_kept_while_other_stream_pending() {
        let accumulator = MediaAccumulator::new(4);
        let extractor = CountingExtractor::new(false);
        let comm = session();

        accumulator.observe(&comm, 4, &[0; 2], "audio/webm", &extractor);
        accumulator.observe(&comm, 5, &[0; 8], "video/webm", &extractor);

        assert!(comm.has_media_header(5));
        assert!(accumulator.has_session(comm.session_id()));
        assert_eq!(accumulator.buffered(comm.session_id(), 4), 2);

        accumulator.discard_session(comm.session_id());
        assert!(!accumulator.has_session(comm.session_id()));
    }
}
