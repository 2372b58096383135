//! Observability for the session hub.
//!
//! Logging uses `tracing` with the targets `hub.relay`, `hub.registry`,
//! `hub.session`, `hub.media` and `hub.chunk`. Connection and session IDs are
//! logged as fields, never as metric labels.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `hub_sessions_active` | Gauge | none | Registered sessions |
//! | `hub_connection_events_total` | Counter | `event` | Connect, disconnect, reconnect, full |
//! | `hub_messages_dropped_total` | Counter | `reason`, `data_type` | Permission and readiness drops |
//! | `hub_frames_rejected_total` | Counter | `reason` | Frames rejected as a whole |
//! | `hub_frames_sent_total` | Counter | none | Transport frames handed to `send` |
//! | `hub_media_headers_total` | Counter | `outcome` | Header extraction results |
//! | `hub_reassembly_purged_total` | Counter | none | Stale partial payloads dropped |

pub mod metrics;
