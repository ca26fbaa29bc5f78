use axum::http::{header, HeaderMap};
use std::sync::Arc;
use tracing::info;

use crate::config::ConfigStore;
use crate::error::{AppError, Result};
use crate::relay::{IngestOptions, SessionRegistry};
use crate::rtsp::SourceConnector;
use crate::webrtc::{SignalingHandler, WebRtcConfig};

/// State shared by every HTTP handler
pub struct AppState {
    pub config: ConfigStore,
    pub registry: SessionRegistry,
    pub signaling: SignalingHandler,
}

impl AppState {
    /// Wire the registry and signaling handler from configuration
    pub fn new(config: ConfigStore, connector: Arc<dyn SourceConnector>) -> Arc<Self> {
        let app_config = config.get();
        let registry = SessionRegistry::new(connector, IngestOptions::from_app_config(&app_config));
        let signaling =
            SignalingHandler::new(registry.clone(), WebRtcConfig::from_app_config(&app_config));

        Arc::new(Self {
            config,
            registry,
            signaling,
        })
    }

    /// Scheme and authority clients should use to reach the relay
    ///
    /// The configured `public_base_url` wins; otherwise the request's Host
    /// header is used.
    pub fn public_base(&self, headers: &HeaderMap) -> Result<String> {
        if let Some(base) = &self.config.get().public_base_url {
            return Ok(base.trim_end_matches('/').to_string());
        }
        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| AppError::BadRequest("missing Host header".to_string()))?;
        Ok(format!("http://{}", host))
    }

    /// Stop every session and drop every viewer
    pub async fn shutdown(&self) {
        info!("Shutting down relay sessions");
        self.registry.shutdown();
        self.signaling.close_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::rtsp::testing::FakeConnector;
    use axum::http::HeaderValue;

    fn state(config: AppConfig) -> Arc<AppState> {
        AppState::new(
            ConfigStore::from_config(config),
            Arc::new(FakeConnector::new(vec![])),
        )
    }

    #[test]
    fn test_public_base_from_host() {
        let state = state(AppConfig::default());
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("relay.local:8080"));
        assert_eq!(
            state.public_base(&headers).unwrap(),
            "http://relay.local:8080"
        );

        assert!(matches!(
            state.public_base(&HeaderMap::new()),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_public_base_override() {
        let state = state(AppConfig {
            public_base_url: Some("https://relay.example.com/".to_string()),
            ..Default::default()
        });
        assert_eq!(
            state.public_base(&HeaderMap::new()).unwrap(),
            "https://relay.example.com"
        );
    }
}
