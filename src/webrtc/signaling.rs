//! Viewer signaling
//!
//! Turns a browser's SDP offer into an answer carrying the session's shared
//! track. Each successful answer leaves behind one tracked viewer, which is
//! dropped again once its connection is torn down. A retired session's
//! viewers are not closed; they simply stop receiving samples.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::config::WebRtcConfig;
use super::peer::ViewerPeer;
use crate::error::{AppError, Result};
use crate::relay::SessionRegistry;

/// Answers offers for relay sessions and keeps their viewers alive
#[derive(Clone)]
pub struct SignalingHandler {
    registry: SessionRegistry,
    config: WebRtcConfig,
    viewers: Arc<RwLock<HashMap<String, Arc<ViewerPeer>>>>,
}

impl SignalingHandler {
    pub fn new(registry: SessionRegistry, config: WebRtcConfig) -> Self {
        Self {
            registry,
            config,
            viewers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Attach a new viewer to `session_id`
    ///
    /// Any failure after the peer connection exists closes that connection
    /// only; the session and its other viewers are untouched.
    pub async fn answer(
        &self,
        session_id: &str,
        offer: RTCSessionDescription,
    ) -> Result<RTCSessionDescription> {
        let session = self
            .registry
            .get(session_id)
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;

        if offer.sdp_type != RTCSdpType::Offer {
            return Err(AppError::BadRequest(format!(
                "expected an offer, got {}",
                offer.sdp_type
            )));
        }

        session.wait_ready().await?;

        let viewer = Arc::new(ViewerPeer::new(session, &self.config).await?);
        match viewer.answer(offer, self.config.gathering_timeout).await {
            Ok(answer) => {
                debug!(
                    session = %session_id,
                    viewer = %viewer.viewer_id(),
                    "Answered offer"
                );
                self.keep(viewer);
                Ok(answer)
            }
            Err(e) => {
                warn!(session = %session_id, "Negotiation failed: {}", e);
                viewer.close().await;
                Err(e)
            }
        }
    }

    /// Hold the viewer until it is torn down
    fn keep(&self, viewer: Arc<ViewerPeer>) {
        self.viewers
            .write()
            .insert(viewer.viewer_id().to_string(), viewer.clone());

        let viewers = self.viewers.clone();
        tokio::spawn(async move {
            viewer.closed().await;
            debug!(
                session = %viewer.session().id(),
                viewer = %viewer.viewer_id(),
                "Viewer released"
            );
            viewers.write().remove(viewer.viewer_id());
        });
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.read().len()
    }

    #[cfg(test)]
    pub(crate) fn viewers(&self) -> Vec<Arc<ViewerPeer>> {
        self.viewers.read().values().cloned().collect()
    }

    /// Close every viewer, used on process shutdown
    pub async fn close_all(&self) {
        let viewers: Vec<Arc<ViewerPeer>> = self.viewers.read().values().cloned().collect();
        for viewer in viewers {
            viewer.close().await;
        }
    }
}
