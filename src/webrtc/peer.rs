//! Viewer peer connections

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::config::WebRtcConfig;
use super::mdns::{default_mdns_host_name, mdns_mode};
use crate::error::{AppError, Result};
use crate::relay::Session;

/// Build a WebRTC API instance with default codecs and interceptors
pub(crate) fn build_api(viewer_id: &str) -> Result<API> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| AppError::WebRtcError(format!("Failed to register codecs: {}", e)))?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .map_err(|e| AppError::WebRtcError(format!("Failed to register interceptors: {}", e)))?;

    let mut setting_engine = SettingEngine::default();
    let mode = mdns_mode();
    setting_engine.set_ice_multicast_dns_mode(mode);
    if mode == MulticastDnsMode::QueryAndGather {
        setting_engine.set_multicast_dns_host_name(default_mdns_host_name(viewer_id));
    }
    debug!("WebRTC mDNS mode: {:?} (viewer {})", mode, viewer_id);

    Ok(APIBuilder::new()
        .with_setting_engine(setting_engine)
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

/// State shared between a viewer and its ICE callback
struct ViewerState {
    viewer_id: String,
    session: Arc<Session>,
    /// Set once the viewer has been counted on the session
    counted: AtomicBool,
    /// Set while the session track is bound to this connection
    bound: AtomicBool,
    torn_down: AtomicBool,
    closed: CancellationToken,
}

impl ViewerState {
    fn mark_connected(&self) {
        if self.counted.swap(true, Ordering::SeqCst) {
            return;
        }
        let viewers = self.session.viewer_attached();
        info!(
            session = %self.session.id(),
            viewer = %self.viewer_id,
            "Viewer connected to {} ({} watching)",
            self.session.source_url(),
            viewers
        );
    }

    fn unbind_track(&self) {
        if self.bound.swap(false, Ordering::SeqCst) {
            self.session.track().unbind();
        }
    }

    /// Undo `mark_connected`, at most once
    fn release(&self) {
        if !self.counted.swap(false, Ordering::SeqCst) {
            return;
        }
        let viewers = self.session.viewer_detached();
        info!(
            session = %self.session.id(),
            viewer = %self.viewer_id,
            "Viewer left ({} watching)",
            viewers
        );
    }
}

/// Stop every transceiver and close the connection; later calls do nothing
async fn teardown(pc: &RTCPeerConnection, state: &ViewerState) {
    if state.torn_down.swap(true, Ordering::SeqCst) {
        return;
    }
    state.unbind_track();

    for transceiver in pc.get_transceivers().await {
        // Also stops the transceiver's sender and receiver
        if let Err(e) = transceiver.stop().await {
            debug!(viewer = %state.viewer_id, "Failed to stop transceiver: {}", e);
        }
    }
    if let Err(e) = pc.close().await {
        warn!(viewer = %state.viewer_id, "Failed to close peer connection: {}", e);
    }

    state.release();
    state.closed.cancel();
}

/// React to an ICE connection state change of one viewer
fn on_ice_state(state: Arc<ViewerState>, pc: Weak<RTCPeerConnection>, s: RTCIceConnectionState) {
    debug!(viewer = %state.viewer_id, "ICE connection state: {}", s);
    match s {
        RTCIceConnectionState::Connected => state.mark_connected(),
        RTCIceConnectionState::Disconnected | RTCIceConnectionState::Failed => {
            let Some(pc) = pc.upgrade() else {
                return;
            };
            // Closing from inside the callback would wait on itself
            tokio::spawn(async move {
                teardown(&pc, &state).await;
            });
        }
        _ => {}
    }
}

/// One browser watching one relay session
pub struct ViewerPeer {
    state: Arc<ViewerState>,
    pc: Arc<RTCPeerConnection>,
}

impl ViewerPeer {
    /// Create a peer connection carrying the session's shared track
    pub async fn new(session: Arc<Session>, config: &WebRtcConfig) -> Result<Self> {
        let viewer_id = uuid::Uuid::new_v4().to_string();
        let api = build_api(&viewer_id)?;

        let rtc_config = RTCConfiguration {
            ice_servers: config.rtc_ice_servers(),
            ..Default::default()
        };
        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to create peer connection: {}", e))
        })?;
        let pc = Arc::new(pc);

        let state = Arc::new(ViewerState {
            viewer_id,
            session,
            counted: AtomicBool::new(false),
            bound: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            closed: CancellationToken::new(),
        });
        let peer = Self { state, pc };

        if let Err(e) = peer.add_session_track().await {
            peer.close().await;
            return Err(e);
        }
        peer.setup_event_handlers();

        Ok(peer)
    }

    async fn add_session_track(&self) -> Result<()> {
        let track = self.state.session.track();
        if track.is_closed() {
            return Err(AppError::SourceUnavailable {
                url: self.state.session.source_url().to_string(),
                reason: "session has ended".to_string(),
            });
        }
        let sender = self
            .pc
            .add_track(track.as_track_local())
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to add video track: {}", e)))?;
        track.bind();
        self.state.bound.store(true, Ordering::SeqCst);

        // Interceptors (NACK, reports) only run while RTCP is read
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    fn setup_event_handlers(&self) {
        let state = self.state.clone();
        let pc: Weak<RTCPeerConnection> = Arc::downgrade(&self.pc);

        self.pc
            .on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
                let state = state.clone();
                let pc = pc.clone();
                Box::pin(async move { on_ice_state(state, pc, s) })
            }));
    }

    /// Feed an ICE state change as if the connection had reported it
    #[cfg(test)]
    pub(crate) fn ice_state_changed(&self, s: RTCIceConnectionState) {
        on_ice_state(self.state.clone(), Arc::downgrade(&self.pc), s);
    }

    /// Answer a browser offer
    ///
    /// Returns the local description after candidate gathering has
    /// finished, so the answer carries every candidate.
    pub async fn answer(
        &self,
        offer: RTCSessionDescription,
        gathering_timeout: Duration,
    ) -> Result<RTCSessionDescription> {
        self.pc.set_remote_description(offer).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to set remote description: {}", e))
        })?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create answer: {}", e)))?;

        let mut gather_complete = self.pc.gathering_complete_promise().await;

        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to set local description: {}", e)))?;

        if tokio::time::timeout(gathering_timeout, gather_complete.recv())
            .await
            .is_err()
        {
            return Err(AppError::Timeout(format!(
                "ICE gathering did not finish within {:?}",
                gathering_timeout
            )));
        }

        self.pc
            .local_description()
            .await
            .ok_or_else(|| AppError::WebRtcError("No local description".to_string()))
    }

    pub fn viewer_id(&self) -> &str {
        &self.state.viewer_id
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.state.session
    }

    pub fn connection_state(&self) -> RTCPeerConnectionState {
        self.pc.connection_state()
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.state.closed.is_cancelled()
    }

    /// Resolves once the viewer has been torn down
    pub async fn closed(&self) {
        self.state.closed.cancelled().await
    }

    /// Tear the viewer down; safe to call more than once
    pub async fn close(&self) {
        teardown(&self.pc, &self.state).await;
    }
}

/// A browser-like peer that only wants to receive video
#[cfg(test)]
pub(crate) async fn browser_offer() -> (RTCPeerConnection, RTCSessionDescription) {
    use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
    use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
    use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

    let api = build_api("browser").unwrap();
    let pc = api
        .new_peer_connection(RTCConfiguration::default())
        .await
        .unwrap();
    pc.add_transceiver_from_kind(
        RTPCodecType::Video,
        Some(RTCRtpTransceiverInit {
            direction: RTCRtpTransceiverDirection::Recvonly,
            send_encodings: vec![],
        }),
    )
    .await
    .unwrap();

    let offer = pc.create_offer(None).await.unwrap();
    let mut gather_complete = pc.gathering_complete_promise().await;
    pc.set_local_description(offer).await.unwrap();
    let _ = gather_complete.recv().await;
    let offer = pc.local_description().await.unwrap();
    (pc, offer)
}
