//! # Hub Test Utilities
//!
//! Shared test utilities for the session hub.
//!
//! ## Modules
//!
//! - `mock_transport` - Recording [`Transport`](session_hub::Transport) that
//!   reassembles and decodes what the hub sent to each connection
//! - `fixtures` - Frame builders, session fixtures and a synthetic WebM
//!   stream builder
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hub_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let transport = MockTransport::new();
//!     let hub = Hub::new(HubConfig::default(), Arc::new(transport.clone()));
//!
//!     hub.on_connect("alice", None).await.unwrap();
//!
//!     let controls = transport.controls_to("alice");
//!     assert!(matches!(controls[0], ControlObject::Connect { .. }));
//! }
//! ```

pub mod fixtures;
pub mod mock_transport;

pub use fixtures::*;
pub use mock_transport::*;
