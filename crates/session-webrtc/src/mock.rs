//! Deterministic facade doubles: a connection that records every call in
//! order and can be driven to emit candidate/track events, and an in-memory
//! signaling channel with a test-side probe.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use crate::connection::{
    LocalMedia, NegotiationError, PeerConnection, RemoteTrackEvent, SessionDescription,
};
use crate::protocol::{self, CandidateInit, SignalMessage};
use crate::signaling::{SignalingChannel, SignalingError};

pub const MOCK_OFFER_SDP: &str = "v=0\r\ns=mock-offer\r\n";
pub const MOCK_ANSWER_SDP: &str = "v=0\r\ns=mock-answer\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionCall {
    CreateOffer,
    CreateAnswer,
    SetLocalDescription(SessionDescription),
    SetRemoteDescription(SessionDescription),
    AddCandidate(CandidateInit),
    Close,
}

pub struct MockConnection {
    calls: Mutex<Vec<ConnectionCall>>,
    fail_remote_description: AtomicBool,
    fail_add_candidate: AtomicBool,
    candidate_tx: Mutex<Option<mpsc::UnboundedSender<CandidateInit>>>,
    candidates_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<CandidateInit>>>,
    track_tx: Mutex<Option<mpsc::UnboundedSender<RemoteTrackEvent>>>,
    tracks_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<RemoteTrackEvent>>>,
}

impl MockConnection {
    pub fn new() -> Arc<Self> {
        let (candidate_tx, candidate_rx) = mpsc::unbounded_channel();
        let (track_tx, track_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail_remote_description: AtomicBool::new(false),
            fail_add_candidate: AtomicBool::new(false),
            candidate_tx: Mutex::new(Some(candidate_tx)),
            candidates_rx: AsyncMutex::new(Some(candidate_rx)),
            track_tx: Mutex::new(Some(track_tx)),
            tracks_rx: AsyncMutex::new(Some(track_rx)),
        })
    }

    pub fn calls(&self) -> Vec<ConnectionCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Candidates applied to the engine, in application order.
    pub fn applied_candidates(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|call| match call {
                ConnectionCall::AddCandidate(candidate) => Some(candidate.candidate.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn close_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| matches!(call, ConnectionCall::Close))
            .count()
    }

    /// Arms a one-shot failure for the next remote-description application.
    pub fn fail_next_remote_description(&self) {
        self.fail_remote_description.store(true, Ordering::SeqCst);
    }

    /// Arms a one-shot failure for the next candidate application.
    pub fn fail_next_add_candidate(&self) {
        self.fail_add_candidate.store(true, Ordering::SeqCst);
    }

    /// Emits a locally discovered candidate, as the engine would.
    pub fn push_local_candidate(&self, candidate: CandidateInit) {
        if let Some(tx) = self.candidate_tx.lock().unwrap().as_ref() {
            let _ = tx.send(candidate);
        }
    }

    /// Ends the local candidate stream (gathering complete).
    pub fn finish_candidate_gathering(&self) {
        self.candidate_tx.lock().unwrap().take();
    }

    /// Announces inbound media, as the engine would.
    pub fn push_remote_track(&self, event: RemoteTrackEvent) {
        if let Some(tx) = self.track_tx.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    fn record(&self, call: ConnectionCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PeerConnection for MockConnection {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        self.record(ConnectionCall::CreateOffer);
        Ok(SessionDescription::offer(MOCK_OFFER_SDP))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        self.record(ConnectionCall::CreateAnswer);
        Ok(SessionDescription::answer(MOCK_ANSWER_SDP))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.record(ConnectionCall::SetLocalDescription(description));
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.record(ConnectionCall::SetRemoteDescription(description));
        if self.fail_remote_description.swap(false, Ordering::SeqCst) {
            return Err(NegotiationError::new("scripted remote description failure"));
        }
        Ok(())
    }

    async fn add_candidate(&self, candidate: CandidateInit) -> Result<(), NegotiationError> {
        self.record(ConnectionCall::AddCandidate(candidate));
        if self.fail_add_candidate.swap(false, Ordering::SeqCst) {
            return Err(NegotiationError::new("scripted candidate failure"));
        }
        Ok(())
    }

    async fn close(&self) {
        self.record(ConnectionCall::Close);
    }

    async fn local_candidates(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<CandidateInit>, NegotiationError> {
        self.candidates_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| NegotiationError::new("local candidate stream already taken"))
    }

    async fn remote_tracks(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<RemoteTrackEvent>, NegotiationError> {
        self.tracks_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| NegotiationError::new("remote track stream already taken"))
    }
}

/// In-memory signaling channel handed to the session under test.
pub struct MockSignaling {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

/// Test-side end of the in-memory channel: injects inbound payloads and
/// observes what the session sent.
pub struct SignalingProbe {
    to_session: Option<mpsc::UnboundedSender<String>>,
    from_session: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

pub fn signaling_pair() -> (MockSignaling, SignalingProbe) {
    let (to_session, inbound) = mpsc::unbounded_channel();
    let (outbound, from_session) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    (
        MockSignaling {
            inbound,
            outbound,
            closed: Arc::clone(&closed),
        },
        SignalingProbe {
            to_session: Some(to_session),
            from_session,
            closed,
        },
    )
}

impl SignalingProbe {
    pub fn send_message(&self, message: &SignalMessage) {
        let payload = protocol::encode(message).expect("encode test message");
        self.send_raw(payload);
    }

    pub fn send_raw(&self, payload: impl Into<String>) {
        if let Some(tx) = &self.to_session {
            tx.send(payload.into()).expect("session inbound channel");
        }
    }

    /// Simulates the remote side (or the transport) going away.
    pub fn disconnect(&mut self) {
        self.to_session.take();
    }

    pub async fn next_message(&mut self) -> Option<SignalMessage> {
        let payload = self.from_session.recv().await?;
        Some(protocol::decode(&payload).expect("decode session outbound message"))
    }

    /// Whether the session closed its end of the channel.
    pub fn session_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalingChannel for MockSignaling {
    async fn send(&mut self, payload: String) -> Result<(), SignalingError> {
        self.outbound
            .send(payload)
            .map_err(|_| SignalingError::ChannelClosed)
    }

    async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.inbound.close();
    }
}

/// Local media double counting how often it was released.
pub struct MockMedia {
    stops: Arc<AtomicUsize>,
}

impl MockMedia {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let stops = Arc::new(AtomicUsize::new(0));
        (
            Self {
                stops: Arc::clone(&stops),
            },
            stops,
        )
    }
}

impl LocalMedia for MockMedia {
    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}
