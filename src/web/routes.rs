use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use crate::state::AppState;

/// Create the relay router
pub fn create_router(state: Arc<AppState>) -> Router {
    // Browsers call signaling from arbitrary pages
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/sessions", get(handlers::list_sessions))
        .route("/rtsp-to-webrtc", post(handlers::rtsp_to_webrtc))
        .route("/webrtc/:id", post(handlers::webrtc_offer))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
