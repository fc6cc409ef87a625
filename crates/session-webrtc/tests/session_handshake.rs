use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

use session_webrtc::connection::{MediaKind, RemoteTrackEvent, SessionDescription};
use session_webrtc::mock::{
    ConnectionCall, MOCK_ANSWER_SDP, MOCK_OFFER_SDP, MockConnection, MockMedia, signaling_pair,
};
use session_webrtc::protocol::{CandidateInit, ProtocolError, SignalMessage};
use session_webrtc::session::{SessionCoordinator, SessionError, SessionRole};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

fn candidate(tag: &str) -> CandidateInit {
    CandidateInit::new(format!("candidate:{tag}"))
}

async fn finish(
    task: tokio::task::JoinHandle<Result<(), SessionError>>,
) -> Result<(), SessionError> {
    timeout(TEST_TIMEOUT, task)
        .await
        .expect("session finished in time")
        .expect("session task panicked")
}

#[tokio::test]
async fn buffered_candidates_apply_in_arrival_order_after_answer() {
    init_tracing();
    let connection = MockConnection::new();
    let (signaling, mut probe) = signaling_pair();
    let session = SessionCoordinator::new(
        SessionRole::Offerer,
        connection.clone(),
        Box::new(signaling),
    );
    let task = tokio::spawn(session.run());

    let offer = timeout(TEST_TIMEOUT, probe.next_message())
        .await
        .expect("offer in time")
        .expect("offer sent");
    assert!(matches!(offer, SignalMessage::Offer { .. }));

    probe.send_message(&SignalMessage::Candidate {
        candidate: candidate("a"),
    });
    probe.send_message(&SignalMessage::Candidate {
        candidate: candidate("b"),
    });
    probe.send_message(&SignalMessage::Answer {
        sdp: MOCK_ANSWER_SDP.to_string(),
    });
    probe.disconnect();

    finish(task).await.expect("clean session end");

    assert_eq!(
        connection.calls(),
        vec![
            ConnectionCall::CreateOffer,
            ConnectionCall::SetLocalDescription(SessionDescription::offer(MOCK_OFFER_SDP)),
            ConnectionCall::SetRemoteDescription(SessionDescription::answer(MOCK_ANSWER_SDP)),
            ConnectionCall::AddCandidate(candidate("a")),
            ConnectionCall::AddCandidate(candidate("b")),
            ConnectionCall::Close,
        ]
    );
}

#[tokio::test]
async fn candidate_after_answer_applies_directly_without_buffering() {
    init_tracing();
    let connection = MockConnection::new();
    let (signaling, mut probe) = signaling_pair();
    let session = SessionCoordinator::new(
        SessionRole::Offerer,
        connection.clone(),
        Box::new(signaling),
    );
    let task = tokio::spawn(session.run());

    timeout(TEST_TIMEOUT, probe.next_message())
        .await
        .expect("offer in time")
        .expect("offer sent");

    probe.send_message(&SignalMessage::Answer {
        sdp: MOCK_ANSWER_SDP.to_string(),
    });
    probe.send_message(&SignalMessage::Candidate {
        candidate: candidate("c"),
    });
    probe.disconnect();

    finish(task).await.expect("clean session end");

    assert_eq!(
        connection.calls(),
        vec![
            ConnectionCall::CreateOffer,
            ConnectionCall::SetLocalDescription(SessionDescription::offer(MOCK_OFFER_SDP)),
            ConnectionCall::SetRemoteDescription(SessionDescription::answer(MOCK_ANSWER_SDP)),
            ConnectionCall::AddCandidate(candidate("c")),
            ConnectionCall::Close,
        ]
    );
}

#[tokio::test]
async fn no_candidate_is_lost_across_the_buffer_boundary() {
    init_tracing();
    let connection = MockConnection::new();
    let (signaling, mut probe) = signaling_pair();
    let session = SessionCoordinator::new(
        SessionRole::Offerer,
        connection.clone(),
        Box::new(signaling),
    );
    let task = tokio::spawn(session.run());

    timeout(TEST_TIMEOUT, probe.next_message())
        .await
        .expect("offer in time")
        .expect("offer sent");

    probe.send_message(&SignalMessage::Candidate {
        candidate: candidate("a"),
    });
    probe.send_message(&SignalMessage::Answer {
        sdp: MOCK_ANSWER_SDP.to_string(),
    });
    probe.send_message(&SignalMessage::Candidate {
        candidate: candidate("b"),
    });
    probe.send_message(&SignalMessage::Candidate {
        candidate: candidate("c"),
    });
    probe.disconnect();

    finish(task).await.expect("clean session end");

    assert_eq!(
        connection.applied_candidates(),
        vec!["candidate:a", "candidate:b", "candidate:c"]
    );
}

#[tokio::test]
async fn transport_close_before_answer_aborts_and_tears_down_once() {
    init_tracing();
    let connection = MockConnection::new();
    let (signaling, mut probe) = signaling_pair();
    let session = SessionCoordinator::new(
        SessionRole::Offerer,
        connection.clone(),
        Box::new(signaling),
    );
    let task = tokio::spawn(session.run());

    probe.send_message(&SignalMessage::Candidate {
        candidate: candidate("a"),
    });
    probe.disconnect();

    let err = finish(task).await.expect_err("mid-handshake close is fatal");
    assert!(matches!(err, SessionError::TransportClosed));

    let calls = connection.calls();
    assert!(
        !calls
            .iter()
            .any(|call| matches!(call, ConnectionCall::SetRemoteDescription(_)))
    );
    assert!(connection.applied_candidates().is_empty());
    assert_eq!(connection.close_calls(), 1);
    assert!(probe.session_closed());
}

#[tokio::test]
async fn negotiation_failure_is_fatal_and_tears_down_once() {
    init_tracing();
    let connection = MockConnection::new();
    connection.fail_next_remote_description();
    let (signaling, mut probe) = signaling_pair();
    let session = SessionCoordinator::new(
        SessionRole::Offerer,
        connection.clone(),
        Box::new(signaling),
    );
    let task = tokio::spawn(session.run());

    timeout(TEST_TIMEOUT, probe.next_message())
        .await
        .expect("offer in time")
        .expect("offer sent");

    probe.send_message(&SignalMessage::Answer {
        sdp: MOCK_ANSWER_SDP.to_string(),
    });
    probe.disconnect();

    let err = finish(task).await.expect_err("scripted failure propagates");
    assert!(matches!(err, SessionError::Negotiation(_)));
    assert_eq!(connection.close_calls(), 1);
    assert!(probe.session_closed());
}

#[tokio::test]
async fn unknown_message_type_is_fatal() {
    init_tracing();
    let connection = MockConnection::new();
    let (signaling, mut probe) = signaling_pair();
    let session = SessionCoordinator::new(
        SessionRole::Offerer,
        connection.clone(),
        Box::new(signaling),
    );
    let task = tokio::spawn(session.run());

    probe.send_raw(r#"{"type":"ping"}"#);

    let err = finish(task).await.expect_err("unknown type is fatal");
    assert!(matches!(
        err,
        SessionError::Protocol(ProtocolError::UnknownMessageType(_))
    ));
    assert_eq!(connection.close_calls(), 1);
}

#[tokio::test]
async fn malformed_message_is_fatal() {
    init_tracing();
    let connection = MockConnection::new();
    let (signaling, mut probe) = signaling_pair();
    let session = SessionCoordinator::new(
        SessionRole::Offerer,
        connection.clone(),
        Box::new(signaling),
    );
    let task = tokio::spawn(session.run());

    probe.send_raw(r#"{"sdp":"x"}"#);

    let err = finish(task).await.expect_err("untagged payload is fatal");
    assert!(matches!(
        err,
        SessionError::Protocol(ProtocolError::MalformedMessage(_))
    ));
    assert_eq!(connection.close_calls(), 1);
}

#[tokio::test]
async fn answerer_applies_offer_then_buffered_candidates_then_answers() {
    init_tracing();
    let connection = MockConnection::new();
    let (signaling, mut probe) = signaling_pair();
    let session = SessionCoordinator::new(
        SessionRole::Answerer,
        connection.clone(),
        Box::new(signaling),
    );
    let task = tokio::spawn(session.run());

    probe.send_message(&SignalMessage::Candidate {
        candidate: candidate("early"),
    });
    probe.send_message(&SignalMessage::Offer {
        sdp: "v=0\r\ns=remote-offer\r\n".to_string(),
    });

    let answer = timeout(TEST_TIMEOUT, probe.next_message())
        .await
        .expect("answer in time")
        .expect("answer sent");
    assert_eq!(
        answer,
        SignalMessage::Answer {
            sdp: MOCK_ANSWER_SDP.to_string()
        }
    );

    probe.disconnect();
    finish(task).await.expect("clean session end");

    assert_eq!(
        connection.calls(),
        vec![
            ConnectionCall::SetRemoteDescription(SessionDescription::offer(
                "v=0\r\ns=remote-offer\r\n"
            )),
            ConnectionCall::AddCandidate(candidate("early")),
            ConnectionCall::CreateAnswer,
            ConnectionCall::SetLocalDescription(SessionDescription::answer(MOCK_ANSWER_SDP)),
            ConnectionCall::Close,
        ]
    );
}

#[tokio::test]
async fn locally_discovered_candidates_are_forwarded() {
    init_tracing();
    let connection = MockConnection::new();
    let (signaling, mut probe) = signaling_pair();
    let session = SessionCoordinator::new(
        SessionRole::Offerer,
        connection.clone(),
        Box::new(signaling),
    );
    let task = tokio::spawn(session.run());

    timeout(TEST_TIMEOUT, probe.next_message())
        .await
        .expect("offer in time")
        .expect("offer sent");

    connection.push_local_candidate(candidate("local-1"));
    let forwarded = timeout(TEST_TIMEOUT, probe.next_message())
        .await
        .expect("candidate in time")
        .expect("candidate sent");
    assert_eq!(
        forwarded,
        SignalMessage::Candidate {
            candidate: candidate("local-1")
        }
    );

    // gathering end must not end the session
    connection.finish_candidate_gathering();
    probe.send_message(&SignalMessage::Answer {
        sdp: MOCK_ANSWER_SDP.to_string(),
    });
    probe.disconnect();

    finish(task).await.expect("clean session end");
}

#[tokio::test]
async fn remote_media_announcements_reach_the_sink() {
    init_tracing();
    let connection = MockConnection::new();
    let (signaling, mut probe) = signaling_pair();
    let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
    let session = SessionCoordinator::new(
        SessionRole::Offerer,
        connection.clone(),
        Box::new(signaling),
    )
    .with_media_sink(sink_tx);
    let task = tokio::spawn(session.run());

    timeout(TEST_TIMEOUT, probe.next_message())
        .await
        .expect("offer in time")
        .expect("offer sent");

    let announced = RemoteTrackEvent {
        track_id: "track-1".to_string(),
        stream_id: "stream-1".to_string(),
        kind: MediaKind::Video,
    };
    connection.push_remote_track(announced.clone());

    let received = timeout(TEST_TIMEOUT, sink_rx.recv())
        .await
        .expect("announcement in time")
        .expect("announcement forwarded");
    assert_eq!(received, announced);

    probe.send_message(&SignalMessage::Answer {
        sdp: MOCK_ANSWER_SDP.to_string(),
    });
    probe.disconnect();
    finish(task).await.expect("clean session end");
}

#[tokio::test]
async fn shutdown_handle_stops_the_session_and_releases_media() {
    init_tracing();
    let connection = MockConnection::new();
    let (signaling, mut probe) = signaling_pair();
    let (media, stops) = MockMedia::new();
    let session = SessionCoordinator::new(
        SessionRole::Offerer,
        connection.clone(),
        Box::new(signaling),
    )
    .with_local_media(Box::new(media));
    let handle = session.shutdown_handle();
    let task = tokio::spawn(session.run());

    timeout(TEST_TIMEOUT, probe.next_message())
        .await
        .expect("offer in time")
        .expect("offer sent");

    handle.shutdown();
    finish(task).await.expect("owner shutdown ends cleanly");

    assert_eq!(stops.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(connection.close_calls(), 1);
    assert!(probe.session_closed());
}

#[tokio::test]
async fn stray_second_answer_is_ignored_once_active() {
    init_tracing();
    let connection = MockConnection::new();
    let (signaling, mut probe) = signaling_pair();
    let session = SessionCoordinator::new(
        SessionRole::Offerer,
        connection.clone(),
        Box::new(signaling),
    );
    let task = tokio::spawn(session.run());

    timeout(TEST_TIMEOUT, probe.next_message())
        .await
        .expect("offer in time")
        .expect("offer sent");

    probe.send_message(&SignalMessage::Answer {
        sdp: MOCK_ANSWER_SDP.to_string(),
    });
    probe.send_message(&SignalMessage::Answer {
        sdp: "v=0\r\ns=duplicate\r\n".to_string(),
    });
    probe.send_message(&SignalMessage::Candidate {
        candidate: candidate("after"),
    });
    probe.disconnect();

    finish(task).await.expect("clean session end");

    let remote_descriptions = connection
        .calls()
        .iter()
        .filter(|call| matches!(call, ConnectionCall::SetRemoteDescription(_)))
        .count();
    assert_eq!(remote_descriptions, 1);
    assert_eq!(connection.applied_candidates(), vec!["candidate:after"]);
}

#[tokio::test]
async fn connection_streams_can_only_be_taken_once() {
    init_tracing();
    let connection: Arc<MockConnection> = MockConnection::new();
    let first = session_webrtc::connection::PeerConnection::local_candidates(&*connection).await;
    assert!(first.is_ok());
    let second = session_webrtc::connection::PeerConnection::local_candidates(&*connection).await;
    assert!(second.is_err());
}
