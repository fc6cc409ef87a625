use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

use crate::config::RtcConfig;
use crate::connection::{
    DescriptionKind, MediaKind, NegotiationError, PeerConnection, RemoteTrackEvent,
    SessionDescription,
};
use crate::protocol::CandidateInit;

fn to_negotiation_error(err: impl std::fmt::Display) -> NegotiationError {
    NegotiationError::new(err.to_string())
}

fn build_api() -> Result<API, NegotiationError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(to_negotiation_error)?;

    let mut registry = Registry::new();
    registry =
        register_default_interceptors(registry, &mut media_engine).map_err(to_negotiation_error)?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

fn to_rtc_description(
    description: &SessionDescription,
) -> Result<RTCSessionDescription, NegotiationError> {
    match description.kind {
        DescriptionKind::Offer => {
            RTCSessionDescription::offer(description.sdp.clone()).map_err(to_negotiation_error)
        }
        DescriptionKind::Answer => {
            RTCSessionDescription::answer(description.sdp.clone()).map_err(to_negotiation_error)
        }
    }
}

/// Connection facade over a `webrtc` crate peer connection. The engine owns
/// negotiation and media transport; this adapter surfaces exactly the
/// capability set the coordinator consumes.
pub struct WebRtcConnection {
    pc: Arc<RTCPeerConnection>,
    candidates_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<CandidateInit>>>,
    tracks_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<RemoteTrackEvent>>>,
}

impl WebRtcConnection {
    pub async fn new(config: RtcConfig) -> Result<Self, NegotiationError> {
        let api = build_api()?;
        let rtc_config = RTCConfiguration {
            ice_servers: config.ice_servers,
            bundle_policy: config.bundle_policy,
            rtcp_mux_policy: config.rtcp_mux_policy,
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(to_negotiation_error)?,
        );

        let (candidate_tx, candidate_rx) = mpsc::unbounded_channel();
        let candidate_slot = Arc::new(Mutex::new(Some(candidate_tx)));
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let slot = Arc::clone(&candidate_slot);
            Box::pin(async move {
                match candidate {
                    Some(candidate) => match candidate.to_json() {
                        Ok(init) => {
                            if let Ok(guard) = slot.lock() {
                                if let Some(tx) = guard.as_ref() {
                                    let _ = tx.send(CandidateInit {
                                        candidate: init.candidate,
                                        sdp_mid: init.sdp_mid,
                                        sdp_mline_index: init.sdp_mline_index,
                                        username_fragment: init.username_fragment,
                                    });
                                }
                            }
                        }
                        Err(err) => {
                            tracing::warn!(
                                target = "webrtc",
                                error = %err,
                                "failed to serialize local candidate"
                            );
                        }
                    },
                    // gathering complete; dropping the sender ends the stream
                    None => {
                        if let Ok(mut guard) = slot.lock() {
                            guard.take();
                        }
                    }
                }
            })
        }));

        let (track_tx, track_rx) = mpsc::unbounded_channel();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let track_tx = track_tx.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => MediaKind::Audio,
                    RTPCodecType::Video => MediaKind::Video,
                    _ => {
                        tracing::warn!(
                            target = "webrtc",
                            track = %track.id(),
                            "ignoring track of unspecified kind"
                        );
                        return;
                    }
                };
                let _ = track_tx.send(RemoteTrackEvent {
                    track_id: track.id(),
                    stream_id: track.stream_id(),
                    kind,
                });
            })
        }));

        Ok(Self {
            pc,
            candidates_rx: AsyncMutex::new(Some(candidate_rx)),
            tracks_rx: AsyncMutex::new(Some(track_rx)),
        })
    }

    /// The underlying peer connection, for binding local media tracks before
    /// the handshake starts.
    pub fn peer_connection(&self) -> Arc<RTCPeerConnection> {
        Arc::clone(&self.pc)
    }
}

#[async_trait]
impl PeerConnection for WebRtcConnection {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(to_negotiation_error)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(to_negotiation_error)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let desc = to_rtc_description(&description)?;
        self.pc
            .set_local_description(desc)
            .await
            .map_err(to_negotiation_error)
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let desc = to_rtc_description(&description)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(to_negotiation_error)
    }

    async fn add_candidate(&self, candidate: CandidateInit) -> Result<(), NegotiationError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(to_negotiation_error)
    }

    async fn close(&self) {
        if let Err(err) = self.pc.close().await {
            tracing::warn!(target = "webrtc", error = %err, "peer connection close failed");
        }
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
