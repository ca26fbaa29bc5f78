//! Per-session ingest worker
//!
//! ```text
//!  Connecting ──dial error──────────────────────────────▶ retired
//!      │
//!      ▼
//!  Negotiated ──first stream not H.264──────────────────▶ retired
//!      │
//!      ▼
//!  Relaying ◀──────────────────────────────┐
//!      │ read error / timeout / eof        │
//!      ▼                                   │
//!  Disconnecting ──close error──▶ retired  │
//!      │                                   │
//!      ▼                                   │
//!  Backoff (reconnect_delay) ──▶ Connecting┘
//! ```
//!
//! The worker is the only writer to the session's track. Cancelling the
//! session token stops it at any await point.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::session::{RetireReason, Session, SessionStatus};
use crate::config::AppConfig;
use crate::rtsp::{
    repacketize, ConnectOptions, H264Parameters, SourceConnector, SourceError, SourceSession,
    StreamCodec,
};
use crate::utils::LogThrottler;
use crate::webrtc::track::{SampleSink, SinkError};
use crate::{debug_throttled, warn_throttled};

/// Settings shared by every ingest worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    pub connect: ConnectOptions,
    /// Pause between losing the upstream and dialing again
    pub reconnect_delay: Duration,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            connect: ConnectOptions::default(),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

impl IngestOptions {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            connect: ConnectOptions {
                rtsp_timeout: config.rtsp_timeout(),
                rtp_timeout: config.rtp_timeout(),
            },
            reconnect_delay: config.reconnect_delay(),
        }
    }
}

/// How one connection's relay loop ended
enum RelayEnd {
    ReadFailed(SourceError),
    TrackClosed(String),
    Cancelled,
}

/// Pulls video from one upstream source and feeds the session track
pub struct IngestWorker {
    session: Arc<Session>,
    connector: Arc<dyn SourceConnector>,
    sink: Arc<dyn SampleSink>,
    options: IngestOptions,
    cancel: CancellationToken,
    throttler: LogThrottler,
}

impl IngestWorker {
    /// Worker writing into the session's own track
    pub fn new(
        session: Arc<Session>,
        connector: Arc<dyn SourceConnector>,
        options: IngestOptions,
    ) -> Self {
        let sink: Arc<dyn SampleSink> = session.track();
        Self::with_sink(session, connector, sink, options)
    }

    pub fn with_sink(
        session: Arc<Session>,
        connector: Arc<dyn SourceConnector>,
        sink: Arc<dyn SampleSink>,
        options: IngestOptions,
    ) -> Self {
        Self {
            cancel: session.cancel_token(),
            session,
            connector,
            sink,
            options,
            throttler: LogThrottler::default(),
        }
    }

    /// Run until the session retires, returning why
    pub async fn run(self) -> RetireReason {
        let id = self.session.id().to_string();
        let url = self.session.source_url().to_string();

        loop {
            debug!(session = %id, "Connecting to {}", url);
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return RetireReason::Cancelled,
                r = self.connector.connect(&url, &self.options.connect) => r,
            };
            let mut source = match connected {
                Ok(source) => source,
                Err(e) => {
                    warn!(session = %id, "Failed to connect to {}: {}", url, e);
                    return RetireReason::DialFailed(e.to_string());
                }
            };

            let parameters = match negotiate(source.streams()) {
                Ok(parameters) => parameters,
                Err(codec) => {
                    warn!(session = %id, "First stream of {} is {}, not H264", url, codec);
                    if let Err(e) = source.close().await {
                        debug!(session = %id, "Close after codec mismatch failed: {}", e);
                    }
                    return RetireReason::UnsupportedCodec(codec);
                }
            };
            if source.streams().len() > 1 {
                debug!(
                    session = %id,
                    "Ignoring {} extra stream(s): {}",
                    source.streams().len() - 1,
                    describe_streams(&source.streams()[1..])
                );
            }

            info!(session = %id, "Relaying {}", url);
            self.session.set_status(SessionStatus::Live);

            let end = self.relay(source.as_mut(), parameters).await;

            if let Err(e) = source.close().await {
                error!(session = %id, "Failed to close {}: {}", url, e);
                return RetireReason::CloseFailed(e.to_string());
            }

            match end {
                RelayEnd::ReadFailed(e) => {
                    warn!(
                        session = %id,
                        "Lost {}: {}, reconnecting in {:?}",
                        url, e, self.options.reconnect_delay
                    );
                    self.session.set_status(SessionStatus::Reconnecting);
                    tokio::select! {
                        _ = self.cancel.cancelled() => return RetireReason::Cancelled,
                        _ = tokio::time::sleep(self.options.reconnect_delay) => {}
                    }
                }
                RelayEnd::TrackClosed(e) => {
                    error!(session = %id, "Track rejected sample: {}", e);
                    return RetireReason::TrackClosed(e);
                }
                RelayEnd::Cancelled => return RetireReason::Cancelled,
            }
        }
    }

    async fn relay(
        &self,
        source: &mut dyn SourceSession,
        mut parameters: Option<H264Parameters>,
    ) -> RelayEnd {
        let id = self.session.id();
        // Sample durations restart with every connection
        let mut previous = Duration::ZERO;

        loop {
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return RelayEnd::Cancelled,
                r = source.read_packet() => r,
            };
            let mut packet = match read {
                Ok(packet) => packet,
                Err(e) => return RelayEnd::ReadFailed(e),
            };

            if packet.stream_index != 0 {
                continue;
            }

            if let Some(fresh) = packet.new_parameters.take() {
                debug!(session = %id, "H.264 parameters updated");
                parameters = Some(fresh);
            }

            let data = match repacketize(&packet, parameters.as_ref()) {
                Ok(data) => data,
                Err(e) => {
                    warn_throttled!(self.throttler, "repacketize", session = %id, "Dropping packet: {}", e);
                    continue;
                }
            };

            let duration = packet.timestamp.saturating_sub(previous);
            previous = packet.timestamp;

            match self.sink.write_sample(data, duration).await {
                Ok(()) => {}
                Err(SinkError::NoReceiver) => {
                    debug_throttled!(self.throttler, "no_receiver", session = %id, "No viewer is receiving, sample dropped");
                }
                Err(SinkError::Closed(e)) => return RelayEnd::TrackClosed(e),
            }
        }
    }
}

/// Accept the source only if its first stream is H.264
fn negotiate(streams: &[StreamCodec]) -> Result<Option<H264Parameters>, String> {
    match streams.first() {
        Some(StreamCodec::H264 { parameters }) => Ok(parameters.clone()),
        Some(other) => Err(other.to_string()),
        None => Err("none".to_string()),
    }
}

fn describe_streams(streams: &[StreamCodec]) -> String {
    streams
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
