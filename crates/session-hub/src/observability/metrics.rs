//! Metrics definitions for the session hub.
//!
//! All metrics follow Prometheus naming conventions:
//! - `hub_` prefix
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `event`: connect, disconnect, reconnect, full
//! - `reason`: `not_allowed`, `not_ready`, codec, control, chunk
//! - `data_type`: the five wire data types
//! - `outcome`: extracted, malformed
//!
//! Recording without an installed recorder is a no-op.

use metrics::{counter, gauge};

/// Set the number of registered sessions.
///
/// Metric: `hub_sessions_active`
pub fn set_sessions_active(count: usize) {
    // usize to f64 conversion is safe for realistic session counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("hub_sessions_active").set(count as f64);
}

/// Record a connection lifecycle event.
///
/// Metric: `hub_connection_events_total`
/// Labels: `event`
pub fn record_connection_event(event: &'static str) {
    counter!("hub_connection_events_total", "event" => event).increment(1);
}

/// Record a received message that was dropped without a reply.
///
/// Metric: `hub_messages_dropped_total`
/// Labels: `reason`, `data_type`
pub fn record_message_dropped(reason: &'static str, data_type: &'static str) {
    counter!(
        "hub_messages_dropped_total",
        "reason" => reason,
        "data_type" => data_type
    )
    .increment(1);
}

/// Record a received frame that was rejected as a whole.
///
/// Metric: `hub_frames_rejected_total`
/// Labels: `reason`
pub fn record_frame_rejected(reason: &'static str) {
    counter!("hub_frames_rejected_total", "reason" => reason).increment(1);
}

/// Record transport frames handed to the transport.
///
/// Metric: `hub_frames_sent_total`
pub fn record_frames_sent(count: usize) {
    counter!("hub_frames_sent_total").increment(count as u64);
}

/// Record a media header extraction result.
///
/// Metric: `hub_media_headers_total`
/// Labels: `outcome`
pub fn record_media_header(outcome: &'static str) {
    counter!("hub_media_headers_total", "outcome" => outcome).increment(1);
}

/// Record partial chunk payloads dropped for age.
///
/// Metric: `hub_reassembly_purged_total`
pub fn record_reassembly_purged(count: usize) {
    counter!("hub_reassembly_purged_total").increment(count as u64);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_recording_without_recorder_is_noop() {
        set_sessions_active(0);
        record_connection_event("connect");
        record_message_dropped("not_allowed", "text");
        record_frame_rejected("codec");
        record_frames_sent(3);
        record_media_header("extracted");
        record_reassembly_purged(1);
    }

    #[test]
    fn test_metrics_are_recorded_with_bounded_labels() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            set_sessions_active(4);
            record_connection_event("connect");
            record_connection_event("connect");
            record_connection_event("full");
            record_message_dropped("not_ready", "video");
            record_frame_rejected("chunk");
            record_frames_sent(2);
            record_media_header("malformed");
            record_reassembly_purged(5);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let connects = snapshot
            .iter()
            .find(|(key, _, _, _)| {
                key.key().name() == "hub_connection_events_total"
                    && key.key().labels().any(|l| l.value() == "connect")
            })
            .map(|(_, _, _, value)| value.clone())
            .expect("connect counter should be recorded");
        assert_eq!(connects, &DebugValue::Counter(2));

        let sessions = snapshot
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "hub_sessions_active")
            .map(|(_, _, _, value)| value.clone())
            .expect("sessions gauge should be recorded");
        assert_eq!(sessions, &DebugValue::Gauge(4.0.into()));

        assert!(snapshot.len() >= 7);
    }
}
