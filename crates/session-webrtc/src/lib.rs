pub mod candidates;
pub mod config;
pub mod connection;
pub mod mock;
pub mod protocol;
pub mod session;
pub mod signaling;
pub mod webrtc;

pub use config::RtcConfig;
pub use connection::{
    DescriptionKind, LocalMedia, MediaKind, NegotiationError, PeerConnection, RemoteTrackEvent,
    SessionDescription,
};
pub use protocol::{CandidateInit, ProtocolError, SignalMessage};
pub use session::{SessionCoordinator, SessionError, SessionHandle, SessionPhase, SessionRole};
pub use signaling::{SignalingChannel, SignalingError, WebSocketSignaling};
