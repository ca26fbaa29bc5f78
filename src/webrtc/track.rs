//! Shared outbound H.264 track
//!
//! One `RelayTrack` exists per relay session. The ingest worker is its only
//! writer; every viewer peer connection binds the same underlying
//! `TrackLocalStaticSample`, which handles RTP packetization per binding.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::debug_throttled;
use crate::utils::LogThrottler;

/// H264 clock rate (always 90kHz per RFC 6184)
pub const H264_CLOCK_RATE: u32 = 90000;

/// Sample write failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    /// Nobody is consuming the track right now; the sample is dropped
    #[error("no receiver attached")]
    NoReceiver,
    /// The track can no longer carry samples
    #[error("track closed: {0}")]
    Closed(String),
}

/// Destination for relayed samples
#[async_trait]
pub trait SampleSink: Send + Sync {
    async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<(), SinkError>;
}

/// Track statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackStats {
    /// Samples handed to at least one viewer
    pub samples_written: u64,
    /// Payload bytes of those samples
    pub bytes_written: u64,
    /// Samples dropped because no viewer was bound
    pub samples_dropped: u64,
    /// Samples that failed on one or more viewer bindings
    pub binding_errors: u64,
}

/// H.264 sample track shared by all viewers of a session
pub struct RelayTrack {
    track: Arc<TrackLocalStaticSample>,
    /// Viewer peer connections carrying this track
    bound: AtomicUsize,
    closed: AtomicBool,
    stats: Mutex<TrackStats>,
    throttler: LogThrottler,
}

impl RelayTrack {
    /// Create a new track; `id` is used as both track id and stream id
    pub fn new(id: &str) -> Self {
        let codec = RTCRtpCodecCapability {
            mime_type: "video/H264".to_string(),
            clock_rate: H264_CLOCK_RATE,
            channels: 0,
            // Let browser negotiate
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        };

        let track = Arc::new(TrackLocalStaticSample::new(
            codec,
            id.to_string(),
            id.to_string(),
        ));

        Self {
            track,
            bound: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            stats: Mutex::new(TrackStats::default()),
            throttler: LogThrottler::default(),
        }
    }

    /// Get track as TrackLocal for peer connection
    pub fn as_track_local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.track.clone()
    }

    pub fn id(&self) -> &str {
        self.track.id()
    }

    /// A viewer added this track to its peer connection
    pub fn bind(&self) -> usize {
        self.bound.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// A viewer carrying this track was torn down
    pub fn unbind(&self) -> usize {
        let previous = self
            .bound
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    pub fn bound_viewers(&self) -> usize {
        self.bound.load(Ordering::SeqCst)
    }

    /// Refuse every further sample
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> TrackStats {
        self.stats.lock().clone()
    }
}

#[async_trait]
impl SampleSink for RelayTrack {
    async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<(), SinkError> {
        if self.is_closed() {
            return Err(SinkError::Closed(format!("track {} is closed", self.id())));
        }
        if self.bound_viewers() == 0 {
            self.stats.lock().samples_dropped += 1;
            return Err(SinkError::NoReceiver);
        }

        let len = data.len() as u64;
        let sample = Sample {
            data,
            duration,
            ..Default::default()
        };

        // Errors are per binding: a viewer going away mid-write does not
        // keep the sample from the other viewers
        let failed = match self.track.write_sample(&sample).await {
            Ok(()) => false,
            Err(e) => {
                debug_throttled!(
                    self.throttler,
                    "binding_write",
                    track = %self.id(),
                    "write_sample failed on a viewer binding: {}",
                    e
                );
                true
            }
        };

        let mut stats = self.stats.lock();
        stats.samples_written += 1;
        stats.bytes_written += len;
        if failed {
            stats.binding_errors += 1;
        }
        Ok(())
    }
}
