//! Relay session state

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::webrtc::track::{RelayTrack, TrackStats};

/// Why an ingest worker stopped for good
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetireReason {
    /// The upstream could not be reached or negotiated
    DialFailed(String),
    /// The first upstream stream is not H.264
    UnsupportedCodec(String),
    /// Closing the upstream connection failed
    CloseFailed(String),
    /// The outbound track rejected a sample
    TrackClosed(String),
    /// The session was shut down
    Cancelled,
}

impl fmt::Display for RetireReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetireReason::DialFailed(e) => write!(f, "connect failed: {}", e),
            RetireReason::UnsupportedCodec(c) => write!(f, "unsupported codec {}", c),
            RetireReason::CloseFailed(e) => write!(f, "close failed: {}", e),
            RetireReason::TrackClosed(e) => write!(f, "track closed: {}", e),
            RetireReason::Cancelled => write!(f, "session stopped"),
        }
    }
}

/// Lifecycle of a relay session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// Worker is connecting for the first time
    Starting,
    /// Upstream negotiated, samples are flowing
    Live,
    /// Waiting out the backoff after a read error
    Reconnecting,
    /// Worker exited; the session no longer accepts viewers
    Retired(RetireReason),
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Starting => "starting",
            SessionStatus::Live => "live",
            SessionStatus::Reconnecting => "reconnecting",
            SessionStatus::Retired(_) => "retired",
        }
    }
}

/// Snapshot used by the session listing
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub rtsp: String,
    pub webrtc: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub viewers: usize,
    pub samples_written: u64,
    pub samples_dropped: u64,
}

/// One upstream RTSP source shared by any number of viewers
pub struct Session {
    id: String,
    source_url: String,
    public_url: String,
    track: Arc<RelayTrack>,
    viewers: AtomicUsize,
    status: watch::Sender<SessionStatus>,
    cancel: CancellationToken,
}

impl Session {
    pub(crate) fn new(id: String, source_url: String, public_url: String) -> Self {
        let (status, _) = watch::channel(SessionStatus::Starting);
        Self {
            track: Arc::new(RelayTrack::new(&id)),
            id,
            source_url,
            public_url,
            viewers: AtomicUsize::new(0),
            status,
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// RTSP URL as first submitted
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// Signaling endpoint handed to clients
    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    pub fn track(&self) -> Arc<RelayTrack> {
        self.track.clone()
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.load(Ordering::SeqCst)
    }

    /// Record a connected viewer, returns the new count
    pub fn viewer_attached(&self) -> usize {
        self.viewers.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Record a departed viewer, returns the new count
    pub fn viewer_detached(&self) -> usize {
        let previous = self
            .viewers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub(crate) fn set_status(&self, status: SessionStatus) {
        self.status.send_replace(status);
    }

    pub fn is_retired(&self) -> bool {
        matches!(*self.status.borrow(), SessionStatus::Retired(_))
    }

    /// Wait until the first upstream negotiation has finished
    ///
    /// Resolves once the session went live at least once, or fails with the
    /// reason the worker gave up.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.status.subscribe();
        loop {
            let status = rx.borrow_and_update().clone();
            match status {
                SessionStatus::Live | SessionStatus::Reconnecting => return Ok(()),
                SessionStatus::Retired(reason) => return Err(self.retired_error(reason)),
                SessionStatus::Starting => {}
            }
            if rx.changed().await.is_err() {
                return Err(AppError::Internal("session status channel closed".to_string()));
            }
        }
    }

    fn retired_error(&self, reason: RetireReason) -> AppError {
        match reason {
            RetireReason::UnsupportedCodec(codec) => AppError::UnsupportedCodec(codec),
            other => AppError::SourceUnavailable {
                url: self.source_url.clone(),
                reason: other.to_string(),
            },
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask the ingest worker to stop
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn info(&self) -> SessionInfo {
        let status = self.status();
        let TrackStats {
            samples_written,
            samples_dropped,
            ..
        } = self.track.stats();
        SessionInfo {
            id: self.id.clone(),
            rtsp: self.source_url.clone(),
            webrtc: self.public_url.clone(),
            status: status.as_str(),
            reason: match status {
                SessionStatus::Retired(reason) => Some(reason.to_string()),
                _ => None,
            },
            viewers: self.viewer_count(),
            samples_written,
            samples_dropped,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("source_url", &self.source_url)
            .field("status", &*self.status.borrow())
            .field("viewers", &self.viewer_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn session() -> Session {
        Session::new(
            "abc".to_string(),
            "rtsp://cam/1".to_string(),
            "http://relay/webrtc/abc".to_string(),
        )
    }

    #[test]
    fn test_new_session() {
        let s = session();
        assert_eq!(s.id(), "abc");
        assert_eq!(s.track().id(), "abc");
        assert_eq!(s.status(), SessionStatus::Starting);
        assert_eq!(s.viewer_count(), 0);
        assert!(!s.is_retired());
    }

    #[test]
    fn test_viewer_count_never_underflows() {
        let s = session();
        assert_eq!(s.viewer_attached(), 1);
        assert_eq!(s.viewer_attached(), 2);
        assert_eq!(s.viewer_detached(), 1);
        assert_eq!(s.viewer_detached(), 0);
        assert_eq!(s.viewer_detached(), 0);
    }

    #[tokio::test]
    async fn test_wait_ready_live() {
        let s = Arc::new(session());
        let waiter = {
            let s = s.clone();
            tokio::spawn(async move { s.wait_ready().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        s.set_status(SessionStatus::Live);
        assert!(waiter.await.unwrap().is_ok());
    }

    #[test]
    fn test_wait_ready_pending_while_starting() {
        let s = session();
        let mut ready = tokio_test::task::spawn(s.wait_ready());
        tokio_test::assert_pending!(ready.poll());

        s.set_status(SessionStatus::Reconnecting);
        assert!(ready.is_woken());
        tokio_test::assert_ready_ok!(ready.poll());
    }

    #[tokio::test]
    async fn test_wait_ready_retired() {
        let s = session();
        s.set_status(SessionStatus::Retired(RetireReason::UnsupportedCodec(
            "video/h265".to_string(),
        )));
        assert!(matches!(
            s.wait_ready().await,
            Err(AppError::UnsupportedCodec(_))
        ));

        let s = session();
        s.set_status(SessionStatus::Retired(RetireReason::DialFailed(
            "refused".to_string(),
        )));
        assert!(matches!(
            s.wait_ready().await,
            Err(AppError::SourceUnavailable { .. })
        ));
    }

    #[test]
    fn test_info() {
        let s = session();
        s.set_status(SessionStatus::Retired(RetireReason::Cancelled));
        let info = s.info();
        assert_eq!(info.status, "retired");
        assert_eq!(info.reason.as_deref(), Some("session stopped"));
        assert_eq!(info.webrtc, "http://relay/webrtc/abc");
    }
}
