//! Connection lifecycle integration tests.
//!
//! Drives connect, disconnect and reconnect through the `Hub` with the
//! default handler and checks the notifications each connection receives.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use hub_test_utils::{connect_session_id, control_frame, register_session, MockTransport};
use relay_protocol::{Constraint, ControlObject, DataType, Status};
use session_hub::relay::connect;
use session_hub::{ConnectionInfo, Hub, HubConfig, HubError, Topology};
use std::sync::Arc;

fn hub(topology: Topology) -> (Hub, MockTransport) {
    let transport = MockTransport::new();
    let config = HubConfig {
        topology,
        ..HubConfig::default()
    };
    (Hub::new(config, Arc::new(transport.clone())), transport)
}

fn status_of(control: &ControlObject) -> Status {
    match control {
        ControlObject::Connect { status, .. } | ControlObject::Disconnect { status, .. } => {
            *status
        }
        other => panic!("expected Connect or Disconnect, got {}", other.action()),
    }
}

#[tokio::test]
async fn test_first_connection_creates_session_and_gets_master_constraint() {
    let (hub, transport) = hub(Topology::ManyToMany);

    hub.on_connect("alice", None).await.unwrap();

    let controls = transport.controls_to("alice");
    assert_eq!(controls.len(), 1);
    let ControlObject::Connect {
        status,
        session_id,
        constraint,
    } = &controls[0]
    else {
        panic!("expected Connect");
    };
    assert_eq!(*status, Status::Waiting);
    assert!(!session_id.is_empty());
    assert_eq!(*constraint, Some(Constraint::allow_all()));

    let communication = hub.registry().by_connection("alice").await.unwrap();
    assert_eq!(communication.session_id().as_str(), session_id);
    assert_eq!(communication.master_connection_id().as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_unresolvable_session_id_creates_new_session() {
    let (hub, transport) = hub(Topology::ManyToMany);

    hub.on_connect("alice", Some("no-such-session")).await.unwrap();

    let session_id = connect_session_id(&transport.last_control_to("alice"));
    assert_ne!(session_id, "no-such-session");
    assert_eq!(hub.registry().len().await, 1);
}

#[tokio::test]
async fn test_one_to_one_status_sequence_and_full_rejection() {
    let (hub, transport) = hub(Topology::OneToOne);

    hub.on_connect("alice", None).await.unwrap();
    let session_id = connect_session_id(&transport.last_control_to("alice"));
    assert_eq!(status_of(&transport.last_control_to("alice")), Status::Waiting);

    hub.on_connect("bob", Some(&session_id)).await.unwrap();
    // Join is broadcast to everyone, the newcomer included
    for who in ["alice", "bob"] {
        let control = transport.last_control_to(who);
        assert_eq!(
            control,
            ControlObject::Connect {
                status: Status::Ready,
                session_id: session_id.clone(),
                constraint: Some(Constraint::allow_all()),
            }
        );
    }

    hub.on_connect("carol", Some(&session_id)).await.unwrap();
    assert_eq!(
        transport.controls_to("carol"),
        vec![ControlObject::Connect {
            status: Status::Full,
            session_id: session_id.clone(),
            constraint: Some(Constraint::deny_all()),
        }]
    );
    let communication = hub.registry().by_session(Some(&session_id)).await.unwrap();
    assert_eq!(communication.connection_ids(), vec!["alice", "bob"]);
    assert!(hub.registry().by_connection("carol").await.is_none());

    // Draining from two to one reports Disconnected, not Waiting
    hub.on_disconnect("bob").await.unwrap();
    assert_eq!(
        transport.last_control_to("alice"),
        ControlObject::Disconnect {
            status: Status::Disconnected,
            session_id: session_id.clone(),
            disconnected_stream_ids: vec![],
        }
    );
    assert_eq!(communication.status(), Status::Disconnected);

    transport.clear();
    hub.on_disconnect("alice").await.unwrap();
    assert_eq!(transport.send_count(), 0);
    assert_eq!(communication.status(), Status::Disconnected);
    assert!(hub.registry().is_empty().await);
}

#[tokio::test]
async fn test_one_to_many_slaves_are_receive_only() {
    let (hub, transport) = hub(Topology::OneToMany);

    hub.on_connect("master", None).await.unwrap();
    let session_id = connect_session_id(&transport.last_control_to("master"));
    assert_eq!(status_of(&transport.last_control_to("master")), Status::Ready);

    hub.on_connect("viewer", Some(&session_id)).await.unwrap();
    assert_eq!(
        transport.last_control_to("viewer"),
        ControlObject::Connect {
            status: Status::Ready,
            session_id: session_id.clone(),
            constraint: Some(Constraint::deny_all()),
        }
    );

    hub.on_receive("viewer", &hub_test_utils::text_frame("hi", "text/plain"))
        .await
        .unwrap();
    assert!(transport
        .messages_of_type_to("master", DataType::Text)
        .is_empty());

    hub.on_receive("master", &hub_test_utils::text_frame("welcome", "text/plain"))
        .await
        .unwrap();
    let texts = transport.messages_of_type_to("viewer", DataType::Text);
    assert_eq!(texts.len(), 1);
    assert_eq!(texts[0].origin, "master");

    // Master leaving takes the session down for the remaining viewers
    hub.on_disconnect("master").await.unwrap();
    assert_eq!(status_of(&transport.last_control_to("viewer")), Status::Disconnected);
}

#[tokio::test]
async fn test_disconnect_broadcasts_released_stream_ids_and_collects_session() {
    let (hub, transport) = hub(Topology::ManyToMany);
    let communication =
        register_session(&hub, "s1", Topology::ManyToMany, &["a", "b", "c"]).await;
    assert_eq!(communication.allocate_stream_id("a"), 50000);
    assert_eq!(communication.allocate_stream_id("a"), 50001);

    hub.on_disconnect("a").await.unwrap();

    let expected = ControlObject::Disconnect {
        status: Status::Ready,
        session_id: "s1".to_string(),
        disconnected_stream_ids: vec![50000, 50001],
    };
    assert_eq!(transport.controls_to("b"), vec![expected.clone()]);
    assert_eq!(transport.controls_to("c"), vec![expected]);
    assert!(transport.frames_to("a").is_empty());
    assert!(communication.connection_stream_ids("a").is_empty());

    hub.on_disconnect("b").await.unwrap();
    assert_eq!(status_of(&transport.last_control_to("c")), Status::Waiting);

    hub.on_disconnect("c").await.unwrap();
    assert!(hub.registry().by_session(Some("s1")).await.is_none());
    for who in ["a", "b", "c"] {
        assert!(hub.registry().by_connection(who).await.is_none());
    }
}

#[tokio::test]
async fn test_disconnect_of_unknown_connection_is_noop() {
    let (hub, transport) = hub(Topology::ManyToMany);
    register_session(&hub, "s1", Topology::ManyToMany, &["a", "b"]).await;

    hub.on_disconnect("stranger").await.unwrap();

    assert_eq!(transport.send_count(), 0);
    assert_eq!(hub.registry().len().await, 1);
}

#[tokio::test]
async fn test_reconnect_without_session_reports_disconnected() {
    let (hub, transport) = hub(Topology::ManyToMany);

    hub.on_reconnect("ghost", Some("old-session")).await.unwrap();
    hub.on_reconnect("phantom", None).await.unwrap();

    assert_eq!(
        transport.controls_to("ghost"),
        vec![ControlObject::Connect {
            status: Status::Disconnected,
            session_id: "old-session".to_string(),
            constraint: None,
        }]
    );
    assert_eq!(connect_session_id(&transport.last_control_to("phantom")), "");
}

#[tokio::test]
async fn test_reconnect_of_member_is_noop_by_default() {
    let (hub, transport) = hub(Topology::ManyToMany);
    register_session(&hub, "s1", Topology::ManyToMany, &["a", "b"]).await;

    hub.on_reconnect("a", Some("s1")).await.unwrap();

    assert_eq!(transport.send_count(), 0);
}

#[tokio::test]
async fn test_failed_connect_notification_is_returned() {
    let transport = MockTransport::failing();
    let hub = Hub::new(HubConfig::default(), Arc::new(transport.clone()));

    let err = hub.on_connect("alice", None).await.unwrap_err();

    assert!(matches!(err, HubError::Transport(_)));
    // The session was still created and registered
    assert!(hub.registry().by_connection("alice").await.is_some());
}

#[tokio::test]
async fn test_connect_to_session_dropped_after_lookup_creates_new_session() {
    let (hub, transport) = hub(Topology::ManyToMany);
    register_session(&hub, "s1", Topology::ManyToMany, &["a"]).await;
    let stale = hub.registry().by_session(Some("s1")).await.unwrap();

    // The last member leaves between lookup and admission
    hub.on_disconnect("a").await.unwrap();
    let info = ConnectionInfo {
        connection_id: "b".to_string(),
        session_id: Some("s1".to_string()),
        communication: Some(Arc::clone(&stale)),
    };
    connect(&hub, info).await.unwrap();

    assert!(!stale.is_member("b"));
    let ControlObject::Connect {
        status,
        session_id,
        constraint,
    } = transport.last_control_to("b")
    else {
        panic!("expected Connect");
    };
    assert_ne!(session_id, "s1");
    assert_eq!(status, Status::Waiting);
    assert_eq!(constraint, Some(Constraint::allow_all()));

    let joined = hub.registry().by_connection("b").await.unwrap();
    assert_eq!(joined.session_id().as_str(), session_id);
    assert_eq!(joined.master_connection_id().as_deref(), Some("b"));
    assert!(hub.registry().by_session(Some("s1")).await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disconnect_reports_ids_allocated_while_leaving() {
    let request = control_frame(&ControlObject::RequestStreamId { stream_id: 0 }, 1);

    for _ in 0..32 {
        let (hub, transport) = hub(Topology::ManyToMany);
        let communication = register_session(&hub, "s1", Topology::ManyToMany, &["a", "b"]).await;
        let first = communication.allocate_stream_id("a");

        let receiving = {
            let hub = hub.clone();
            let request = request.clone();
            tokio::spawn(async move { hub.on_receive("a", &request).await })
        };
        let leaving = {
            let hub = hub.clone();
            tokio::spawn(async move { hub.on_disconnect("a").await })
        };
        receiving.await.unwrap().unwrap();
        leaving.await.unwrap().unwrap();

        let mut expected = vec![first];
        expected.extend(transport.controls_to("a").into_iter().map(|reply| match reply {
            ControlObject::RequestStreamId { stream_id } => stream_id,
            other => panic!("unexpected {}", other.action()),
        }));

        let ControlObject::Disconnect {
            disconnected_stream_ids,
            ..
        } = transport.last_control_to("b")
        else {
            panic!("expected Disconnect");
        };
        assert_eq!(disconnected_stream_ids, expected);
        assert!(communication.connection_stream_ids("a").is_empty());
    }
}
