//! WebRTC configuration

use std::time::Duration;
use webrtc::ice_transport::ice_server::RTCIceServer;

use crate::config::{AppConfig, IceServerConfig};

/// Settings shared by every viewer peer connection
#[derive(Debug, Clone)]
pub struct WebRtcConfig {
    /// STUN/TURN servers
    pub ice_servers: Vec<IceServerConfig>,
    /// Upper bound on full ICE candidate gathering
    pub gathering_timeout: Duration,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            // Host candidates work directly on a LAN; configure STUN/TURN for remote viewers
            ice_servers: vec![],
            gathering_timeout: Duration::from_secs(10),
        }
    }
}

impl WebRtcConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            ice_servers: config.ice_servers.clone(),
            gathering_timeout: config.ice_gathering_timeout(),
        }
    }

    /// Build ICE servers for an `RTCConfiguration`, skipping entries without URLs
    pub fn rtc_ice_servers(&self) -> Vec<RTCIceServer> {
        self.ice_servers
            .iter()
            .filter(|s| !s.urls.is_empty())
            .map(|s| RTCIceServer {
                urls: s.urls.clone(),
                username: s.username.clone(),
                credential: s.credential.clone(),
                ..Default::default()
            })
            .collect()
    }
}
