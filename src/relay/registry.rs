//! Process-wide session registry
//!
//! Maps session ids to sessions and RTSP URLs to session ids. Lookups and
//! inserts happen under one lock so two concurrent requests for the same
//! camera always end up sharing one session and one ingest worker.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::ingest::{IngestOptions, IngestWorker};
use super::session::{Session, SessionInfo, SessionStatus};
use crate::error::{AppError, Result};
use crate::rtsp::SourceConnector;

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<String, Arc<Session>>,
    by_source: HashMap<String, String>,
}

/// Registry of live relay sessions
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    connector: Arc<dyn SourceConnector>,
    options: IngestOptions,
}

/// URLs are matched ignoring ASCII case
fn source_key(url: &str) -> String {
    url.trim().to_ascii_lowercase()
}

impl SessionRegistry {
    pub fn new(connector: Arc<dyn SourceConnector>, options: IngestOptions) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner::default())),
            connector,
            options,
        }
    }

    /// Session relaying `url`, if any
    pub fn find_by_source(&self, url: &str) -> Option<Arc<Session>> {
        let inner = self.inner.read();
        inner
            .by_source
            .get(&source_key(url))
            .and_then(|id| inner.sessions.get(id))
            .cloned()
    }

    /// Return the session for `url`, creating it and its worker if needed
    ///
    /// `public_base` is the scheme and authority the signaling URL is built
    /// on, e.g. `http://relay.local:8080`.
    pub fn create(&self, url: &str, public_base: &str) -> Result<Arc<Session>> {
        let url = url.trim();
        if url.is_empty() {
            return Err(AppError::BadRequest("rtsp URL is empty".to_string()));
        }
        let key = source_key(url);

        let session = {
            let mut inner = self.inner.write();
            if let Some(existing) = inner.by_source.get(&key).and_then(|id| inner.sessions.get(id))
            {
                debug!(session = %existing.id(), "Reusing session for {}", url);
                return Ok(existing.clone());
            }

            let id = uuid::Uuid::new_v4().to_string();
            let public_url = format!("{}/webrtc/{}", public_base.trim_end_matches('/'), id);
            let session = Arc::new(Session::new(id.clone(), url.to_string(), public_url));
            inner.sessions.insert(id.clone(), session.clone());
            inner.by_source.insert(key, id);
            session
        };

        info!(session = %session.id(), "Created session for {}", url);
        self.spawn_worker(session.clone());
        Ok(session)
    }

    fn spawn_worker(&self, session: Arc<Session>) {
        let worker = IngestWorker::new(session.clone(), self.connector.clone(), self.options);
        let registry = self.clone();
        tokio::spawn(async move {
            let reason = worker.run().await;
            registry.remove(session.id());
            // Attached viewers stay connected but get no further samples
            session.track().close();
            info!(session = %session.id(), "Session retired: {}", reason);
            session.set_status(SessionStatus::Retired(reason));
        });
    }

    /// Create or reuse the session for `url` and wait until it is relaying
    pub async fn start_relay(&self, url: &str, public_base: &str) -> Result<Arc<Session>> {
        let session = self.create(url, public_base)?;
        session.wait_ready().await?;
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.read().sessions.get(id).cloned()
    }

    /// Unlist a session; its worker is not stopped
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let mut inner = self.inner.write();
        let session = inner.sessions.remove(id)?;
        let key = source_key(session.source_url());
        if inner.by_source.get(&key).map(String::as_str) == Some(id) {
            inner.by_source.remove(&key);
        }
        Some(session)
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.inner.read().sessions.values().map(|s| s.info()).collect();
        sessions.sort_by(|a, b| a.rtsp.cmp(&b.rtsp));
        sessions
    }

    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every ingest worker
    pub fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self.inner.read().sessions.values().cloned().collect();
        info!("Stopping {} session(s)", sessions.len());
        for session in sessions {
            session.cancel();
        }
    }
}
