//! Integration tests for the connection facade
//!
//! Drives a `RemoteConnection` through a standalone `MockTransport`, injecting
//! server messages by hand and watching the roster and the outbound traffic.

use std::sync::Arc;
use std::time::Duration;

use watercooler_core::{
    IceCandidate, InboundSignal, LocalMediaSource, MediaTrack, NegotiationStep, OutboundSignal,
    SessionDescription, SignalKind, StateUpdate, TransportError,
};
use watercooler_harness::{wait_until, MockPeerConnectionFactory, MockTransport, RecordingVolumeFactory, ScriptedSampler};
use watercooler_runtime::{
    MediaKind, ParticipantId, Position, RemoteConnection, RemoteConnectionBuilder, SessionPhase,
    WatercoolerError,
};

fn id(s: &str) -> ParticipantId {
    ParticipantId::from(s)
}

fn builder(transport: &MockTransport, factory: &MockPeerConnectionFactory) -> RemoteConnectionBuilder {
    RemoteConnection::builder(Arc::new(transport.clone()), Arc::new(factory.clone()))
}

fn hello(self_id: &str, others: &[&str]) -> InboundSignal {
    InboundSignal::Hello {
        id: id(self_id),
        user_ids: others.iter().map(|o| id(o)).collect(),
    }
}

fn offers_to(transport: &MockTransport, target: &ParticipantId) -> usize {
    transport
        .sent()
        .iter()
        .filter(|s| matches!(s, OutboundSignal::Offer { target: t, .. } if t == target))
        .count()
}

fn answers_to(transport: &MockTransport, target: &ParticipantId) -> usize {
    transport
        .sent()
        .iter()
        .filter(|s| matches!(s, OutboundSignal::Answer { target: t, .. } if t == target))
        .count()
}

fn state_updates(transport: &MockTransport) -> Vec<StateUpdate> {
    transport
        .sent()
        .into_iter()
        .filter_map(|s| match s {
            OutboundSignal::StateUpdate(update) => Some(update),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_hello_populates_roster_passively() {
    let transport = MockTransport::new();
    let factory = MockPeerConnectionFactory::new();
    let mut connection = builder(&transport, &factory).build_and_start().await.unwrap();
    assert_eq!(transport.registered_kinds().len(), SignalKind::ALL.len());

    transport.deliver(hello("a", &["b", "c"]));
    assert!(wait_until(|| connection.roster().len() == 2).await);

    let roster = connection.roster();
    assert_eq!(roster.ids(), vec![id("b"), id("c")]);
    assert!(roster.iter().all(|p| p.streams.is_empty()));
    assert_eq!(connection.self_id(), Some(id("a")));
    assert_eq!(factory.created_count(), 2);
    assert_eq!(offers_to(&transport, &id("b")), 0);
    assert_eq!(offers_to(&transport, &id("c")), 0);

    connection.stop().await.unwrap();
}

#[tokio::test]
async fn test_join_and_leave() {
    let transport = MockTransport::new();
    let factory = MockPeerConnectionFactory::new();
    let media = Arc::new(LocalMediaSource::audio_video("local"));
    let mut connection = builder(&transport, &factory)
        .with_media_source(media)
        .build_and_start()
        .await
        .unwrap();

    transport.deliver(hello("a", &[]));
    transport.deliver(InboundSignal::UserJoined { user_id: id("a") });
    transport.deliver(InboundSignal::UserJoined { user_id: id("d") });
    assert!(wait_until(|| connection.roster().contains(&id("d"))).await);
    assert!(!connection.roster().contains(&id("a")));

    // The existing member offers to the newcomer once its tracks are attached.
    assert!(wait_until(|| offers_to(&transport, &id("d")) == 1).await);
    let peer = factory.latest(&id("d")).unwrap();
    assert_eq!(peer.local_tracks().len(), 2);

    transport.deliver(InboundSignal::UserLeft { user_id: id("d") });
    assert!(wait_until(|| !connection.roster().contains(&id("d"))).await);
    assert_eq!(peer.close_count(), 1);

    // A second leave for the same id is a no-op.
    transport.deliver(InboundSignal::UserLeft { user_id: id("d") });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(peer.close_count(), 1);

    connection.stop().await.unwrap();
}

#[tokio::test]
async fn test_state_updates_merge_last_write_wins() {
    let transport = MockTransport::new();
    let factory = MockPeerConnectionFactory::new();
    let mut connection = builder(&transport, &factory).build_and_start().await.unwrap();

    transport.deliver(hello("a", &["c"]));
    transport.deliver(InboundSignal::StateUpdate(StateUpdate {
        user_id: Some(id("c")),
        position: Some(Position(12.0, 34.0)),
        angle: Some(0.5),
        speed: Some(2.0),
        ..StateUpdate::default()
    }));
    assert!(wait_until(|| connection.participant_position(&id("c")) == Some(Position(12.0, 34.0))).await);

    transport.deliver(InboundSignal::StateUpdate(StateUpdate {
        user_id: Some(id("c")),
        position: Some(Position(1.0, 1.0)),
        ..StateUpdate::default()
    }));
    assert!(wait_until(|| connection.participant_position(&id("c")) == Some(Position(1.0, 1.0))).await);

    let state = connection.roster().get(&id("c")).unwrap().state.unwrap();
    assert_eq!(state.angle, 0.5);
    assert_eq!(state.speed, 2.0);

    // Updates about ourselves and anonymous updates are ignored.
    transport.deliver(InboundSignal::StateUpdate(StateUpdate {
        user_id: Some(id("a")),
        position: Some(Position(9.0, 9.0)),
        ..StateUpdate::default()
    }));
    transport.deliver(InboundSignal::StateUpdate(StateUpdate::default()));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(connection.roster().len(), 1);

    // An unknown sender is referenced lazily.
    transport.deliver(InboundSignal::StateUpdate(StateUpdate {
        user_id: Some(id("e")),
        angle: Some(1.0),
        ..StateUpdate::default()
    }));
    assert!(wait_until(|| connection.roster().contains(&id("e"))).await);

    connection.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_identical_samples_broadcast_once() {
    let transport = MockTransport::new();
    let factory = MockPeerConnectionFactory::new();
    let sampler = Arc::new(ScriptedSampler::new(Position(430.0, 150.0), 0.0, 0.0));
    let mut connection = builder(&transport, &factory)
        .with_sampler(sampler.clone())
        .build_and_start()
        .await
        .unwrap();

    // Nothing goes out before an identity is known.
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(state_updates(&transport).is_empty());

    transport.deliver(hello("a", &[]));
    tokio::time::sleep(Duration::from_millis(1000)).await;
    let sent = state_updates(&transport);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].user_id, Some(id("a")));
    assert_eq!(sent[0].position, Some(Position(430.0, 150.0)));

    // Sub-precision jitter is filtered out.
    sampler.set(Position(430.2, 149.9), 0.01, 0.0);
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(state_updates(&transport).len(), 1);

    sampler.set(Position(440.0, 150.0), 0.0, 0.0);
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(state_updates(&transport).len(), 2);

    connection.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_undelivered_broadcast_is_retried() {
    let transport = MockTransport::new();
    let factory = MockPeerConnectionFactory::new();
    let sampler = Arc::new(ScriptedSampler::new(Position(1.0, 1.0), 0.0, 0.0));
    let mut connection = builder(&transport, &factory)
        .with_sampler(sampler)
        .build_and_start()
        .await
        .unwrap();

    transport.set_connected(false);
    transport.deliver(hello("a", &[]));
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(state_updates(&transport).is_empty());

    transport.set_connected(true);
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(state_updates(&transport).len(), 1);

    connection.stop().await.unwrap();
}

#[tokio::test]
async fn test_push_state_goes_through_filter() {
    let transport = MockTransport::new();
    let factory = MockPeerConnectionFactory::new();
    let mut connection = builder(&transport, &factory).build_and_start().await.unwrap();
    transport.deliver(hello("a", &[]));
    assert!(wait_until(|| connection.self_id().is_some()).await);

    let snapshot = watercooler_runtime::StateSnapshot::new(Position(5.0, 5.0), 0.0, 0.0);
    connection.push_state(snapshot).await.unwrap();
    connection.push_state(snapshot).await.unwrap();
    assert!(wait_until(|| state_updates(&transport).len() == 1).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(state_updates(&transport).len(), 1);

    connection.stop().await.unwrap();
    assert!(matches!(
        connection.push_state(snapshot).await,
        Err(WatercoolerError::Channel { .. })
    ));
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let transport = MockTransport::new();
    let factory = MockPeerConnectionFactory::new();
    let mut connection = builder(&transport, &factory).build_and_start().await.unwrap();
    assert!(matches!(connection.start().await, Err(WatercoolerError::AlreadyRunning)));

    transport.deliver(hello("a", &["b", "c"]));
    assert!(wait_until(|| connection.roster().len() == 2).await);

    connection.stop().await.unwrap();
    connection.stop().await.unwrap();

    assert!(!connection.is_running());
    assert_eq!(transport.disconnect_count(), 1);
    assert_eq!(transport.off_calls().len(), SignalKind::ALL.len());
    assert!(transport.registered_kinds().is_empty());
    assert!(connection.roster().is_empty());
    assert_eq!(connection.self_id(), None);
    for peer in ["b", "c"] {
        assert_eq!(factory.latest(&id(peer)).unwrap().close_count(), 1);
    }

    // Signals after stop reach nobody.
    assert!(!transport.deliver(hello("a", &["d"])));
}

#[tokio::test]
async fn test_restart_after_stop() {
    let transport = MockTransport::new();
    let factory = MockPeerConnectionFactory::new();
    let mut connection = builder(&transport, &factory).build_and_start().await.unwrap();
    connection.stop().await.unwrap();

    connection.start().await.unwrap();
    transport.deliver(hello("a", &["b"]));
    assert!(wait_until(|| connection.roster().contains(&id("b"))).await);
    assert_eq!(transport.connect_count(), 2);
    connection.stop().await.unwrap();
}

#[tokio::test]
async fn test_connect_failure_leaves_no_handlers() {
    let transport = MockTransport::new();
    let factory = MockPeerConnectionFactory::new();
    transport.fail_next_connect(TransportError::ConnectionFailed {
        url: "ws://localhost:3000/".to_string(),
        reason: "refused".to_string(),
    });

    let mut connection = builder(&transport, &factory).build();
    let result = connection.start().await;
    assert!(matches!(result, Err(WatercoolerError::Transport(_))));
    assert!(!connection.is_running());
    assert!(transport.registered_kinds().is_empty());
}

#[tokio::test]
async fn test_invalid_config_is_rejected_before_connect() {
    let transport = MockTransport::new();
    let factory = MockPeerConnectionFactory::new();
    let mut connection = builder(&transport, &factory).with_signaling_url("").build();

    let result = connection.start().await;
    assert!(matches!(result, Err(WatercoolerError::Configuration { .. })));
    assert_eq!(transport.connect_count(), 0);
    assert!(transport.on_calls().is_empty());
}

#[tokio::test]
async fn test_early_candidate_applied_after_offer() {
    let transport = MockTransport::new();
    let factory = MockPeerConnectionFactory::new();
    let mut connection = builder(&transport, &factory).build_and_start().await.unwrap();

    transport.deliver(hello("a", &["b"]));
    let early = IceCandidate::new("candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host");
    transport.deliver(InboundSignal::IceCandidate {
        user_id: id("b"),
        candidate: early.clone(),
    });
    assert!(wait_until(|| connection.roster().contains(&id("b"))).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    let peer = factory.latest(&id("b")).unwrap();
    assert!(peer.applied_candidates().is_empty());

    transport.deliver(InboundSignal::Offer {
        user_id: id("b"),
        offer: SessionDescription::offer("v=0\r\n"),
    });
    assert!(wait_until(|| answers_to(&transport, &id("b")) == 1).await);
    assert!(wait_until(|| peer.applied_candidates() == vec![early.clone()]).await);
    assert_eq!(peer.rejected_candidates(), 0);
    assert!(wait_until(|| {
        connection.roster().get(&id("b")).map(|p| p.phase) == Some(SessionPhase::Connected)
    })
    .await);

    // Our own candidate from the answer side was relayed back to b.
    assert!(transport
        .sent()
        .iter()
        .any(|s| matches!(s, OutboundSignal::IceCandidate { target, .. } if *target == id("b"))));

    connection.stop().await.unwrap();
}

#[tokio::test]
async fn test_negotiation_error_is_isolated() {
    let transport = MockTransport::new();
    let factory = MockPeerConnectionFactory::new();
    let mut connection = builder(&transport, &factory).build_and_start().await.unwrap();

    // The first creation (b) fails; c is unaffected.
    factory.fail_next_creates(1);
    transport.deliver(hello("a", &["b", "c"]));
    assert!(wait_until(|| connection.roster().len() == 2).await);

    let roster = connection.roster();
    let b = roster.get(&id("b")).unwrap();
    assert_eq!(b.phase, SessionPhase::Uninitialized);
    assert_eq!(b.error.as_ref().unwrap().step, NegotiationStep::CreateConnection);
    assert!(roster.get(&id("c")).unwrap().error.is_none());

    transport.deliver(InboundSignal::Offer {
        user_id: id("c"),
        offer: SessionDescription::offer("v=0\r\n"),
    });
    assert!(wait_until(|| answers_to(&transport, &id("c")) == 1).await);

    // The next reference to b retries creation.
    transport.deliver(InboundSignal::Offer {
        user_id: id("b"),
        offer: SessionDescription::offer("v=0\r\n"),
    });
    assert!(wait_until(|| answers_to(&transport, &id("b")) == 1).await);
    assert!(wait_until(|| connection.roster().get(&id("b")).is_some_and(|p| p.error.is_none())).await);

    connection.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_step_is_reported_on_the_participant() {
    let transport = MockTransport::new();
    let factory = MockPeerConnectionFactory::new();
    let mut connection = builder(&transport, &factory).build_and_start().await.unwrap();

    transport.deliver(hello("a", &["b"]));
    assert!(wait_until(|| connection.roster().contains(&id("b"))).await);
    factory.fail_step(NegotiationStep::SetRemoteDescription);
    transport.deliver(InboundSignal::Offer {
        user_id: id("b"),
        offer: SessionDescription::offer("v=0\r\n"),
    });

    assert!(wait_until(|| {
        connection
            .roster()
            .get(&id("b"))
            .and_then(|p| p.error.clone())
            .is_some_and(|e| e.step == NegotiationStep::SetRemoteDescription)
    })
    .await);
    assert!(connection.roster().contains(&id("b")));
    assert_eq!(answers_to(&transport, &id("b")), 0);

    connection.stop().await.unwrap();
}

#[tokio::test]
async fn test_max_participants_reached() {
    let transport = MockTransport::new();
    let factory = MockPeerConnectionFactory::new();
    let mut connection = builder(&transport, &factory).build_and_start().await.unwrap();
    assert!(!connection.max_participants_reached());

    transport.deliver(InboundSignal::MaxUsersReached);
    assert!(wait_until(|| connection.max_participants_reached()).await);
    assert!(connection.roster().is_empty());

    connection.stop().await.unwrap();
    assert!(!connection.max_participants_reached());
}

#[tokio::test]
async fn test_volume_controls_cached_per_stream() {
    let transport = MockTransport::new();
    let factory = MockPeerConnectionFactory::new();
    let volumes = RecordingVolumeFactory::new();
    let mut connection = builder(&transport, &factory)
        .with_volume_controls(Arc::new(volumes.clone()))
        .build_and_start()
        .await
        .unwrap();

    let offer_with_audio = SessionDescription::offer("v=0\r\na=track:bs bs-audio audio\r\n");
    transport.deliver(hello("a", &["b"]));
    transport.deliver(InboundSignal::Offer {
        user_id: id("b"),
        offer: offer_with_audio.clone(),
    });
    assert!(wait_until(|| connection.roster().get(&id("b")).is_some_and(|p| p.streams.len() == 1)).await);

    connection.set_volume(&id("b"), 0.4).await.unwrap();
    connection.set_volume(&id("b"), 2.0).await.unwrap();
    connection.set_volume(&id("b"), f64::NAN).await.unwrap();
    assert!(wait_until(|| volumes.volumes("bs") == vec![0.4, 1.0, 0.0]).await);
    assert_eq!(volumes.created_count(), 1);

    // Leaving evicts the cached control; a returning participant gets a new one.
    transport.deliver(InboundSignal::UserLeft { user_id: id("b") });
    assert!(wait_until(|| !connection.roster().contains(&id("b"))).await);
    transport.deliver(InboundSignal::Offer {
        user_id: id("b"),
        offer: offer_with_audio,
    });
    assert!(wait_until(|| connection.roster().get(&id("b")).is_some_and(|p| p.streams.len() == 1)).await);
    connection.set_volume(&id("b"), 0.5).await.unwrap();
    assert!(wait_until(|| volumes.created_count() == 2).await);

    connection.stop().await.unwrap();
}

#[tokio::test]
async fn test_new_identity_resets_sessions() {
    let transport = MockTransport::new();
    let factory = MockPeerConnectionFactory::new();
    let mut connection = builder(&transport, &factory).build_and_start().await.unwrap();

    transport.deliver(hello("a", &["b"]));
    assert!(wait_until(|| connection.roster().contains(&id("b"))).await);

    transport.deliver(hello("z", &["b"]));
    assert!(wait_until(|| connection.self_id() == Some(id("z"))).await);
    assert!(wait_until(|| factory.connections_for(&id("b")).len() == 2).await);
    let generations = factory.connections_for(&id("b"));
    assert_eq!(generations[0].close_count(), 1);
    assert_eq!(generations[1].close_count(), 0);

    connection.stop().await.unwrap();
}

#[tokio::test]
async fn test_repeated_hello_reconciles_members() {
    let transport = MockTransport::new();
    let factory = MockPeerConnectionFactory::new();
    let mut connection = builder(&transport, &factory).build_and_start().await.unwrap();

    transport.deliver(hello("a", &["b", "c"]));
    assert!(wait_until(|| connection.roster().len() == 2).await);

    transport.deliver(hello("a", &["c", "d"]));
    assert!(wait_until(|| connection.roster().ids() == vec![id("c"), id("d")]).await);
    assert_eq!(factory.latest(&id("b")).unwrap().close_count(), 1);
    assert_eq!(factory.connections_for(&id("c")).len(), 1);

    connection.stop().await.unwrap();
}

#[tokio::test]
async fn test_media_source_lifecycle() {
    let transport = MockTransport::new();
    let factory = MockPeerConnectionFactory::new();
    let mut connection = builder(&transport, &factory).build_and_start().await.unwrap();
    assert!(!connection.set_media_enabled(MediaKind::Audio, false));

    transport.deliver(hello("a", &["b"]));
    assert!(wait_until(|| connection.roster().contains(&id("b"))).await);

    connection.media_unavailable("camera permission denied").await.unwrap();
    assert_eq!(connection.media_error().as_deref(), Some("camera permission denied"));

    // Supplying media later attaches it to open sessions, which then offer.
    let media = Arc::new(LocalMediaSource::audio_video("local"));
    connection.set_media_source(media.clone()).await.unwrap();
    assert_eq!(connection.media_error(), None);
    assert!(wait_until(|| offers_to(&transport, &id("b")) == 1).await);

    assert!(connection.set_media_enabled(MediaKind::Video, false));
    assert!(!watercooler_core::MediaSource::has_enabled(media.as_ref(), MediaKind::Video));

    connection.stop().await.unwrap();
}

fn track_ids(factory: &MockPeerConnectionFactory, participant: &ParticipantId) -> Vec<String> {
    factory
        .latest(participant)
        .map(|peer| peer.local_tracks().into_iter().map(|t| t.id).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_switching_media_replaces_attached_tracks() {
    let transport = MockTransport::new();
    let factory = MockPeerConnectionFactory::new();
    let mut connection = builder(&transport, &factory)
        .with_media_source(Arc::new(LocalMediaSource::audio_video("cam1")))
        .build_and_start()
        .await
        .unwrap();

    transport.deliver(hello("a", &[]));
    transport.deliver(InboundSignal::UserJoined { user_id: id("d") });
    assert!(wait_until(|| track_ids(&factory, &id("d")).len() == 2).await);

    let cam2 = Arc::new(LocalMediaSource::new(
        "cam2",
        vec![MediaTrack::new("cam2-audio", MediaKind::Audio)],
    ));
    connection.set_media_source(cam2).await.unwrap();
    assert!(wait_until(|| track_ids(&factory, &id("d")) == vec!["cam2-audio".to_string()]).await);

    connection.media_unavailable("denied").await.unwrap();
    assert!(wait_until(|| track_ids(&factory, &id("d")).is_empty()).await);
    assert_eq!(connection.media_error().as_deref(), Some("denied"));

    connection.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_answer_does_not_strand_candidates() {
    let transport = MockTransport::new();
    let factory = MockPeerConnectionFactory::new();
    let mut connection = builder(&transport, &factory).build_and_start().await.unwrap();

    transport.deliver(hello("a", &["b"]));
    assert!(wait_until(|| connection.roster().contains(&id("b"))).await);
    factory.fail_step(NegotiationStep::CreateAnswer);
    transport.deliver(InboundSignal::Offer {
        user_id: id("b"),
        offer: SessionDescription::offer("v=0\r\n"),
    });
    assert!(wait_until(|| {
        connection
            .roster()
            .get(&id("b"))
            .and_then(|p| p.error.clone())
            .is_some_and(|e| e.step == NegotiationStep::CreateAnswer)
    })
    .await);

    factory.clear_failures();
    transport.deliver(InboundSignal::IceCandidate {
        user_id: id("b"),
        candidate: IceCandidate::new("candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host"),
    });
    let peer = factory.latest(&id("b")).unwrap();
    assert!(wait_until(|| peer.applied_candidates().len() == 1).await);
    assert_eq!(
        connection.roster().get(&id("b")).map(|p| p.phase),
        Some(SessionPhase::Negotiating)
    );

    // A fresh offer completes the exchange.
    transport.deliver(InboundSignal::Offer {
        user_id: id("b"),
        offer: SessionDescription::offer("v=0\r\n"),
    });
    assert!(wait_until(|| answers_to(&transport, &id("b")) == 1).await);
    assert!(wait_until(|| connection.roster().get(&id("b")).is_some_and(|p| p.error.is_none())).await);

    connection.stop().await.unwrap();
}
