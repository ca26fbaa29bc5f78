//! Scripted upstream sources for tests

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use super::source::{
    ConnectOptions, H264Parameters, SourceConnector, SourceError, SourceSession, StreamCodec,
    VideoPacket,
};

/// What one scripted connection yields
pub struct FakeScript {
    pub streams: Vec<StreamCodec>,
    pub packets: VecDeque<Result<VideoPacket, SourceError>>,
    pub close_error: Option<String>,
    /// Block forever once the packets run out instead of failing
    pub hang_when_drained: bool,
    /// Once drained, wait for this and then fail the read
    pub fail_on: Option<Arc<Notify>>,
}

impl FakeScript {
    pub fn h264(packets: Vec<Result<VideoPacket, SourceError>>) -> Self {
        Self {
            streams: vec![StreamCodec::H264 {
                parameters: Some(test_parameters()),
            }],
            packets: packets.into(),
            close_error: None,
            hang_when_drained: false,
            fail_on: None,
        }
    }

    pub fn with_streams(mut self, streams: Vec<StreamCodec>) -> Self {
        self.streams = streams;
        self
    }

    pub fn with_close_error(mut self, error: &str) -> Self {
        self.close_error = Some(error.to_string());
        self
    }

    pub fn hanging(mut self) -> Self {
        self.hang_when_drained = true;
        self
    }

    pub fn failing_on(mut self, trigger: Arc<Notify>) -> Self {
        self.fail_on = Some(trigger);
        self
    }
}

/// Connector that plays back one script per `connect` call
///
/// Once the scripts are used up every further dial fails.
#[derive(Default)]
pub struct FakeConnector {
    scripts: Mutex<VecDeque<Result<FakeScript, SourceError>>>,
    connects: AtomicUsize,
    closes: Arc<AtomicUsize>,
    dial_delay: Option<Duration>,
}

impl FakeConnector {
    pub fn new(scripts: Vec<Result<FakeScript, SourceError>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Default::default()
        }
    }

    pub fn with_dial_delay(mut self, delay: Duration) -> Self {
        self.dial_delay = Some(delay);
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceConnector for FakeConnector {
    async fn connect(
        &self,
        _url: &str,
        _options: &ConnectOptions,
    ) -> Result<Box<dyn SourceSession>, SourceError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.dial_delay {
            tokio::time::sleep(delay).await;
        }
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SourceError::Dial("connection refused".to_string())))?;
        Ok(Box::new(FakeSession {
            script,
            closes: self.closes.clone(),
        }))
    }
}

struct FakeSession {
    script: FakeScript,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl SourceSession for FakeSession {
    fn streams(&self) -> &[StreamCodec] {
        &self.script.streams
    }

    async fn read_packet(&mut self) -> Result<VideoPacket, SourceError> {
        if let Some(result) = self.script.packets.pop_front() {
            return result;
        }
        if let Some(trigger) = &self.script.fail_on {
            trigger.notified().await;
            return Err(SourceError::Read("connection reset".to_string()));
        }
        if self.script.hang_when_drained {
            std::future::pending::<()>().await;
        }
        Err(SourceError::Eof)
    }

    async fn close(self: Box<Self>) -> Result<(), SourceError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        match self.script.close_error {
            Some(e) => Err(SourceError::Close(e)),
            None => Ok(()),
        }
    }
}

pub fn test_parameters() -> H264Parameters {
    H264Parameters::new(vec![0xAA], vec![0xBB])
}

/// A single-NAL packet carrying `0xCC 0xDD`
pub fn packet(stream_index: usize, millis: u64, is_keyframe: bool) -> VideoPacket {
    VideoPacket {
        stream_index,
        data: Bytes::from_static(&[0, 0, 0, 2, 0xCC, 0xDD]),
        is_keyframe,
        timestamp: Duration::from_millis(millis),
        new_parameters: None,
    }
}
