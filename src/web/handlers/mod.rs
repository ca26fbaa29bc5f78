use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::error::{AppError, Result};
use crate::relay::SessionInfo;
use crate::state::AppState;

// ============================================================================
// Health & Info
// ============================================================================

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub sessions: usize,
    pub viewers: usize,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        sessions: state.registry.len(),
        viewers: state.signaling.viewer_count(),
    })
}

/// List relay sessions
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionInfo>> {
    Json(state.registry.list())
}

// ============================================================================
// Relay & Signaling
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RelayRequest {
    pub rtsp: String,
}

#[derive(Debug, Serialize)]
pub struct RelayResponse {
    pub webrtc: String,
}

/// Start (or reuse) a relay for an RTSP URL
///
/// Returns once the upstream is negotiated, so an unreachable camera is
/// reported here rather than on the first viewer attach.
pub async fn rtsp_to_webrtc(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RelayResponse>> {
    let req: RelayRequest = serde_json::from_slice(&body)?;
    let base = state.public_base(&headers)?;

    let session = state.registry.start_relay(&req.rtsp, &base).await?;
    info!(session = %session.id(), "Relay ready for {}", session.source_url());

    Ok(Json(RelayResponse {
        webrtc: session.public_url().to_string(),
    }))
}

/// Answer a viewer's SDP offer for a session
pub async fn webrtc_offer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<RTCSessionDescription>> {
    let offer: RTCSessionDescription = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid session description: {}", e)))?;

    let answer = state.signaling.answer(&id, offer).await?;
    Ok(Json(answer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ConfigStore};
    use crate::rtsp::testing::{packet, FakeConnector, FakeScript};
    use crate::rtsp::SourceError;
    use axum::http::{header, HeaderValue, StatusCode};
    use axum::response::IntoResponse;

    fn state(connector: FakeConnector) -> Arc<AppState> {
        AppState::new(
            ConfigStore::from_config(AppConfig::default()),
            Arc::new(connector),
        )
    }

    fn host() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("relay.local:8080"));
        headers
    }

    fn live() -> FakeConnector {
        FakeConnector::new(vec![Ok(
            FakeScript::h264(vec![Ok(packet(0, 0, true))]).hanging()
        )])
    }

    #[tokio::test]
    async fn test_rtsp_to_webrtc_is_idempotent() {
        let state = state(live());
        let body = Bytes::from_static(br#"{"rtsp": "rtsp://cam/1"}"#);

        let Json(first) = rtsp_to_webrtc(State(state.clone()), host(), body.clone())
            .await
            .unwrap();
        let Json(second) = rtsp_to_webrtc(State(state.clone()), host(), body)
            .await
            .unwrap();

        assert!(first.webrtc.starts_with("http://relay.local:8080/webrtc/"));
        assert_eq!(first.webrtc, second.webrtc);
        assert_eq!(state.registry.len(), 1);
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_rtsp_to_webrtc_bad_body() {
        let state = state(live());
        let err = rtsp_to_webrtc(State(state), host(), Bytes::from_static(b"{"))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rtsp_to_webrtc_unreachable_source() {
        let state = state(FakeConnector::new(vec![Err(SourceError::Dial(
            "no route to host".to_string(),
        ))]));
        let body = Bytes::from_static(br#"{"rtsp": "rtsp://10.255.0.1/none"}"#);

        let err = rtsp_to_webrtc(State(state.clone()), host(), body)
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn test_offer_for_unknown_session() {
        let state = state(live());
        let body = Bytes::from_static(br#"{"type": "offer", "sdp": "v=0\r\n"}"#);

        let err = webrtc_offer(State(state), Path("nope".to_string()), body)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SessionNotFound(_)));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_offer_malformed_json() {
        let state = state(live());
        let err = webrtc_offer(
            State(state),
            Path("any".to_string()),
            Bytes::from_static(b"not json"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_sessions_and_health() {
        let state = state(live());
        let body = Bytes::from_static(br#"{"rtsp": "rtsp://cam/1"}"#);
        let Json(relay) = rtsp_to_webrtc(State(state.clone()), host(), body)
            .await
            .unwrap();

        let Json(sessions) = list_sessions(State(state.clone())).await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].rtsp, "rtsp://cam/1");
        assert_eq!(sessions[0].status, "live");
        assert_eq!(sessions[0].webrtc, relay.webrtc);

        let Json(health) = health_check(State(state.clone())).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.sessions, 1);
        state.shutdown().await;
    }
}
