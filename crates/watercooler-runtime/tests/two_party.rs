//! End-to-end tests with two facades joined through a mock rendezvous server

use std::sync::Arc;

use watercooler_core::LocalMediaSource;
use watercooler_harness::{wait_until, MockPeerConnectionFactory, MockSignalingServer, ScriptedSampler};
use watercooler_runtime::{ParticipantId, Position, RemoteConnection, SessionPhase, WatercoolerResult};

async fn join(server: &MockSignalingServer, media: &str, position: Position) -> WatercoolerResult<RemoteConnection> {
    RemoteConnection::builder(Arc::new(server.transport()), Arc::new(MockPeerConnectionFactory::new()))
        .with_media_source(Arc::new(LocalMediaSource::audio_video(media)))
        .with_sampler(Arc::new(ScriptedSampler::new(position, 0.0, 0.0)))
        .build_and_start()
        .await
}

fn has_stream(connection: &RemoteConnection, participant: &ParticipantId, stream: &str) -> bool {
    connection
        .roster()
        .get(participant)
        .is_some_and(|p| p.streams.iter().any(|s| s.id == stream))
}

fn phase(connection: &RemoteConnection, participant: &ParticipantId) -> Option<SessionPhase> {
    connection.roster().get(participant).map(|p| p.phase)
}

#[tokio::test]
async fn test_two_participants_exchange_media_and_state() {
    let server = MockSignalingServer::new();
    let mut alice = join(&server, "alice", Position(100.0, 100.0)).await.unwrap();
    assert!(wait_until(|| alice.self_id().is_some()).await);
    let alice_id = alice.self_id().unwrap();

    let mut bob = join(&server, "bob", Position(300.0, 200.0)).await.unwrap();
    assert!(wait_until(|| bob.self_id().is_some()).await);
    let bob_id = bob.self_id().unwrap();
    assert_ne!(alice_id, bob_id);

    assert!(wait_until(|| has_stream(&alice, &bob_id, "bob")).await);
    assert!(wait_until(|| has_stream(&bob, &alice_id, "alice")).await);
    assert!(wait_until(|| phase(&alice, &bob_id) == Some(SessionPhase::Connected)).await);
    assert!(wait_until(|| phase(&bob, &alice_id) == Some(SessionPhase::Connected)).await);

    assert!(wait_until(|| bob.participant_position(&alice_id) == Some(Position(100.0, 100.0))).await);
    assert!(wait_until(|| alice.participant_position(&bob_id) == Some(Position(300.0, 200.0))).await);

    bob.stop().await.unwrap();
    assert!(wait_until(|| !alice.roster().contains(&bob_id)).await);
    assert_eq!(server.participants(), vec![alice_id]);

    alice.stop().await.unwrap();
    assert!(server.participants().is_empty());
}

#[tokio::test]
async fn test_full_room_reports_max_participants() {
    let server = MockSignalingServer::new().with_max_users(1);
    let mut first = join(&server, "first", Position(0.0, 0.0)).await.unwrap();
    let mut second = join(&server, "second", Position(0.0, 0.0)).await.unwrap();

    assert!(wait_until(|| second.max_participants_reached()).await);
    assert_eq!(second.self_id(), None);
    assert!(first.roster().is_empty());

    second.stop().await.unwrap();
    first.stop().await.unwrap();
}
