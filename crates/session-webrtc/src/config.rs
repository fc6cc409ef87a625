use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;

/// Configuration for the webrtc-backed connection engine.
#[derive(Clone)]
pub struct RtcConfig {
    /// ICE servers for connection establishment
    pub ice_servers: Vec<RTCIceServer>,
    /// Bundle policy; the session multiplexes everything on one transport
    pub bundle_policy: RTCBundlePolicy,
    /// RTCP mux policy
    pub rtcp_mux_policy: RTCRtcpMuxPolicy,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![RTCIceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                ..Default::default()
            }],
            bundle_policy: RTCBundlePolicy::MaxBundle,
            rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        }
    }
}

impl RtcConfig {
    /// Localhost-only configuration (no STUN/TURN).
    pub fn localhost() -> Self {
        Self {
            ice_servers: vec![],
            ..Default::default()
        }
    }

    pub fn builder() -> RtcConfigBuilder {
        RtcConfigBuilder::new()
    }
}

pub struct RtcConfigBuilder {
    ice_servers: Vec<RTCIceServer>,
    bundle_policy: Option<RTCBundlePolicy>,
    rtcp_mux_policy: Option<RTCRtcpMuxPolicy>,
}

impl RtcConfigBuilder {
    pub fn new() -> Self {
        Self {
            ice_servers: vec![],
            bundle_policy: None,
            rtcp_mux_policy: None,
        }
    }

    pub fn add_ice_server(mut self, urls: Vec<String>) -> Self {
        self.ice_servers.push(RTCIceServer {
            urls,
            ..Default::default()
        });
        self
    }

    pub fn add_ice_server_with_credentials(
        mut self,
        urls: Vec<String>,
        username: String,
        credential: String,
    ) -> Self {
        self.ice_servers.push(RTCIceServer {
            urls,
            username,
            credential,
            ..Default::default()
        });
        self
    }

    pub fn bundle_policy(mut self, policy: RTCBundlePolicy) -> Self {
        self.bundle_policy = Some(policy);
        self
    }

    pub fn rtcp_mux_policy(mut self, policy: RTCRtcpMuxPolicy) -> Self {
        self.rtcp_mux_policy = Some(policy);
        self
    }

    pub fn build(self) -> RtcConfig {
        let mut config = RtcConfig::default();
        if !self.ice_servers.is_empty() {
            config.ice_servers = self.ice_servers;
        }
        if let Some(policy) = self.bundle_policy {
            config.bundle_policy = policy;
        }
        if let Some(policy) = self.rtcp_mux_policy {
            config.rtcp_mux_policy = policy;
        }
        config
    }
}

impl Default for RtcConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
