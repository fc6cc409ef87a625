use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

use crate::candidates::CandidateBuffer;
use crate::connection::{
    LocalMedia, NegotiationError, PeerConnection, RemoteTrackEvent, SessionDescription,
};
use crate::protocol::{self, CandidateInit, ProtocolError, SignalMessage};
use crate::signaling::SignalingChannel;

/// Which side of the handshake this session drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Offerer,
    Answerer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Created,
    OfferSent,
    AwaitingAnswer,
    AwaitingOffer,
    AnswerApplied,
    Active,
    Closed,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error("signaling transport closed before the handshake completed")]
    TransportClosed,
}

struct SessionState {
    phase: SessionPhase,
    has_remote_description: bool,
    buffer: CandidateBuffer,
}

struct ShutdownFlag {
    requested: AtomicBool,
    notify: Notify,
}

/// Owner-side teardown handle. Signaling shutdown stops event processing;
/// the session then releases media and closes the engine before returning.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<ShutdownFlag>,
}

impl SessionHandle {
    pub fn shutdown(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }
}

enum Reaction {
    Inbound(Option<String>),
    LocalCandidate(Option<CandidateInit>),
    RemoteTrack(Option<RemoteTrackEvent>),
    Shutdown,
}

/// Drives one two-party handshake over an already-open signaling channel:
/// sends the local description, waits for the remote one, keeps candidate
/// delivery ordered across the buffer boundary, and tears down exactly once
/// on any exit path.
///
/// All event handling runs on the single task that owns the session, so
/// applying the remote description and draining the buffer are atomic with
/// respect to every other reaction.
pub struct SessionCoordinator {
    id: Uuid,
    role: SessionRole,
    connection: Arc<dyn PeerConnection>,
    signaling: Box<dyn SignalingChannel>,
    media: Option<Box<dyn LocalMedia>>,
    media_sink: Option<mpsc::UnboundedSender<RemoteTrackEvent>>,
    state: SessionState,
    shutdown: Arc<ShutdownFlag>,
}

impl SessionCoordinator {
    pub fn new(
        role: SessionRole,
        connection: Arc<dyn PeerConnection>,
        signaling: Box<dyn SignalingChannel>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            connection,
            signaling,
            media: None,
            media_sink: None,
            state: SessionState {
                phase: SessionPhase::Created,
                has_remote_description: false,
                buffer: CandidateBuffer::new(),
            },
            shutdown: Arc::new(ShutdownFlag {
                requested: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Local capture sources to release at teardown.
    pub fn with_local_media(mut self, media: Box<dyn LocalMedia>) -> Self {
        self.media = Some(media);
        self
    }

    /// Presentation sink for inbound media announcements.
    pub fn with_media_sink(mut self, sink: mpsc::UnboundedSender<RemoteTrackEvent>) -> Self {
        self.media_sink = Some(sink);
        self
    }

    pub fn shutdown_handle(&self) -> SessionHandle {
        SessionHandle {
            inner: Arc::clone(&self.shutdown),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase
    }

    /// Runs the handshake to completion. Returns `Ok` when the session ends
    /// cleanly (transport closed after the handshake completed, or the owner
    /// requested shutdown); any failure propagates after teardown.
    pub async fn run(mut self) -> Result<(), SessionError> {
        tracing::debug!(
            target = "session",
            session = %self.id,
            role = ?self.role,
            "session starting"
        );
        let result = self.drive().await;
        self.teardown().await;
        match &result {
            Ok(()) => tracing::debug!(target = "session", session = %self.id, "session ended"),
            Err(err) => tracing::warn!(
                target = "session",
                session = %self.id,
                error = %err,
                "session ended with error"
            ),
        }
        result
    }

    async fn drive(&mut self) -> Result<(), SessionError> {
        let mut local_candidates = self.connection.local_candidates().await?;
        let mut remote_tracks = self.connection.remote_tracks().await?;

        match self.role {
            SessionRole::Offerer => self.send_offer().await?,
            SessionRole::Answerer => self.state.phase = SessionPhase::AwaitingOffer,
        }

        let shutdown = Arc::clone(&self.shutdown);
        let mut candidates_open = true;
        let mut tracks_open = true;

        loop {
            if shutdown.requested.load(Ordering::SeqCst) {
                tracing::debug!(target = "session", session = %self.id, "shutdown requested");
                return Ok(());
            }

            let reaction = tokio::select! {
                payload = self.signaling.recv() => Reaction::Inbound(payload),
                candidate = local_candidates.recv(), if candidates_open => {
                    Reaction::LocalCandidate(candidate)
                }
                track = remote_tracks.recv(), if tracks_open => Reaction::RemoteTrack(track),
                _ = shutdown.notify.notified() => Reaction::Shutdown,
            };

            match reaction {
                Reaction::Inbound(Some(payload)) => {
                    let message = protocol::decode(&payload)?;
                    self.handle_message(message).await?;
                }
                Reaction::Inbound(None) => {
                    return if self.state.phase == SessionPhase::Active {
                        tracing::debug!(
                            target = "session",
                            session = %self.id,
                            "signaling channel closed after handshake"
                        );
                        Ok(())
                    } else {
                        Err(SessionError::TransportClosed)
                    };
                }
                Reaction::LocalCandidate(Some(candidate)) => {
                    self.send_message(SignalMessage::Candidate { candidate })
                        .await?;
                }
                Reaction::LocalCandidate(None) => {
                    tracing::trace!(
                        target = "session",
                        session = %self.id,
                        "local candidate gathering finished"
                    );
                    candidates_open = false;
                }
                Reaction::RemoteTrack(Some(event)) => self.announce_track(event),
                Reaction::RemoteTrack(None) => tracks_open = false,
                Reaction::Shutdown => {
                    tracing::debug!(target = "session", session = %self.id, "shutdown requested");
                    return Ok(());
                }
            }
        }
    }

    async fn send_offer(&mut self) -> Result<(), SessionError> {
        let offer = self.connection.create_offer().await?;
        self.connection.set_local_description(offer.clone()).await?;
        self.state.phase = SessionPhase::OfferSent;
        self.send_message(SignalMessage::Offer { sdp: offer.sdp })
            .await?;
        self.state.phase = SessionPhase::AwaitingAnswer;
        tracing::debug!(target = "session", session = %self.id, "offer sent, awaiting answer");
        Ok(())
    }

    async fn handle_message(&mut self, message: SignalMessage) -> Result<(), SessionError> {
        match message {
            SignalMessage::Offer { sdp } => {
                if self.role == SessionRole::Answerer
                    && self.state.phase == SessionPhase::AwaitingOffer
                {
                    self.accept_offer(sdp).await
                } else {
                    tracing::warn!(
                        target = "session",
                        session = %self.id,
                        phase = ?self.state.phase,
                        "ignoring stray offer"
                    );
                    Ok(())
                }
            }
            SignalMessage::Answer { sdp } => {
                if self.role == SessionRole::Offerer
                    && self.state.phase == SessionPhase::AwaitingAnswer
                {
                    self.accept_answer(sdp).await
                } else {
                    tracing::warn!(
                        target = "session",
                        session = %self.id,
                        phase = ?self.state.phase,
                        "ignoring stray answer"
                    );
                    Ok(())
                }
            }
            SignalMessage::Candidate { candidate } => self.accept_candidate(candidate).await,
        }
    }

    async fn accept_answer(&mut self, sdp: String) -> Result<(), SessionError> {
        self.connection
            .set_remote_description(SessionDescription::answer(sdp))
            .await?;
        self.state.has_remote_description = true;
        self.state.phase = SessionPhase::AnswerApplied;
        self.flush_buffered_candidates().await?;
        self.state.phase = SessionPhase::Active;
        tracing::info!(target = "session", session = %self.id, "handshake complete");
        Ok(())
    }

    async fn accept_offer(&mut self, sdp: String) -> Result<(), SessionError> {
        self.connection
            .set_remote_description(SessionDescription::offer(sdp))
            .await?;
        self.state.has_remote_description = true;
        self.state.phase = SessionPhase::AnswerApplied;
        self.flush_buffered_candidates().await?;
        let answer = self.connection.create_answer().await?;
        self.connection
            .set_local_description(answer.clone())
            .await?;
        self.send_message(SignalMessage::Answer { sdp: answer.sdp })
            .await?;
        self.state.phase = SessionPhase::Active;
        tracing::info!(target = "session", session = %self.id, "handshake complete");
        Ok(())
    }

    async fn accept_candidate(&mut self, candidate: CandidateInit) -> Result<(), SessionError> {
        if self.state.has_remote_description {
            self.connection.add_candidate(candidate).await?;
        } else {
            self.state.buffer.enqueue(candidate);
            tracing::debug!(
                target = "session",
                session = %self.id,
                buffered = self.state.buffer.len(),
                "buffered remote candidate until the remote description applies"
            );
        }
        Ok(())
    }

    /// Applies every buffered candidate in arrival order. Runs as part of
    /// the same reaction that applied the remote description, so no other
    /// candidate handling can interleave.
    async fn flush_buffered_candidates(&mut self) -> Result<(), SessionError> {
        let pending = self.state.buffer.drain_in_order();
        if pending.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            target = "session",
            session = %self.id,
            count = pending.len(),
            "applying buffered remote candidates"
        );
        for candidate in pending {
            self.connection.add_candidate(candidate).await?;
        }
        Ok(())
    }

    fn announce_track(&mut self, event: RemoteTrackEvent) {
        tracing::debug!(
            target = "session",
            session = %self.id,
            track = %event.track_id,
            kind = ?event.kind,
            "remote media announced"
        );
        if let Some(sink) = &self.media_sink {
            if sink.send(event).is_err() {
                tracing::warn!(
                    target = "session",
                    session = %self.id,
                    "media sink dropped; no longer forwarding announcements"
                );
                self.media_sink = None;
            }
        }
    }

    async fn send_message(&mut self, message: SignalMessage) -> Result<(), SessionError> {
        let payload = protocol::encode(&message)?;
        self.signaling
            .send(payload)
            .await
            .map_err(|_| SessionError::TransportClosed)
    }

    /// Releases local media, closes the engine, and closes the signaling
    /// channel. Runs exactly once; every exit path of `run` funnels here,
    /// including the one where the transport is already gone.
    async fn teardown(&mut self) {
        if self.state.phase == SessionPhase::Closed {
            return;
        }
        tracing::debug!(target = "session", session = %self.id, "tearing down session");
        if let Some(media) = self.media.take() {
            media.stop();
        }
        self.connection.close().await;
        self.signaling.close().await;
        self.state.phase = SessionPhase::Closed;
    }
}
