use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::CandidateInit;

/// Failure while creating or applying a description or candidate. The
/// underlying engine reports one coarse rejection; no local/remote
/// distinction is surfaced.
#[derive(Debug, Error)]
#[error("negotiation failed: {0}")]
pub struct NegotiationError(pub String);

impl NegotiationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionKind {
    Offer,
    Answer,
}

/// Opaque negotiation payload produced and consumed by the connection
/// engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: DescriptionKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Announcement of inbound media surfaced by the connection engine. The
/// coordinator forwards these to the owner's presentation sink untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackEvent {
    pub track_id: String,
    pub stream_id: String,
    pub kind: MediaKind,
}

/// Capability surface the coordinator needs from the negotiation engine.
/// The engine owns all negotiation state; the coordinator never looks past
/// these calls.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn add_candidate(&self, candidate: CandidateInit) -> Result<(), NegotiationError>;

    /// Closes the engine. Infallible from the coordinator's point of view;
    /// implementations log their own failures.
    async fn close(&self);

    /// Stream of locally discovered candidates. Hand out once; the stream
    /// ends when gathering completes.
    async fn local_candidates(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<CandidateInit>, NegotiationError>;

    /// Stream of inbound media announcements. Hand out once.
    async fn remote_tracks(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<RemoteTrackEvent>, NegotiationError>;
}

/// Local capture sources bound to the connection. Released exactly once at
/// teardown.
pub trait LocalMedia: Send + Sync {
    fn stop(&self);
}
