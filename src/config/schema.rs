use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main relay configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP listen port
    pub port: u16,
    /// HTTP listen address
    pub bind_address: String,
    /// RTSP control connection timeout in seconds (0 = no timeout)
    pub rtsp_timeout: u64,
    /// RTP keep-alive timeout in seconds (0 = no timeout)
    pub rtp_timeout: u64,
    /// Delay before reconnecting after an upstream read error, in seconds
    pub reconnect_delay: u64,
    /// Base URL handed to clients for signaling (e.g. "https://relay.example.com").
    /// When unset, it is derived from the request's Host header.
    pub public_base_url: Option<String>,
    /// STUN/TURN servers offered to every viewer peer connection
    pub ice_servers: Vec<IceServerConfig>,
    /// Upper bound on full ICE candidate gathering per viewer, in seconds
    pub ice_gathering_timeout: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            rtsp_timeout: 0,
            rtp_timeout: 0,
            reconnect_delay: 5,
            public_base_url: None,
            ice_servers: vec![],
            ice_gathering_timeout: 10,
        }
    }
}

impl AppConfig {
    /// Dial timeout for the upstream RTSP connection, if any
    pub fn rtsp_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.rtsp_timeout)
    }

    /// Maximum wait for the next upstream packet, if any
    pub fn rtp_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.rtp_timeout)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay)
    }

    pub fn ice_gathering_timeout(&self) -> Duration {
        Duration::from_secs(self.ice_gathering_timeout.max(1))
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

/// A STUN or TURN server entry
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IceServerConfig {
    /// Server URLs (e.g. ["turn:turn.example.com:3478?transport=udp"])
    pub urls: Vec<String>,
    /// Username for TURN authentication
    pub username: String,
    /// Credential for TURN authentication
    pub credential: String,
}
