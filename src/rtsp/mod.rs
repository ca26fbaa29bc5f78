//! Upstream RTSP side of the relay
//!
//! `source` defines what the relay needs from a camera connection,
//! `client` implements it with retina, and `repacketizer` turns the
//! depacketized frames into samples a WebRTC track accepts.

pub mod client;
pub mod repacketizer;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

pub use client::RetinaConnector;
pub use repacketizer::{repacketize, RepacketizeError, ANNEXB_START_CODE};
pub use source::{
    ConnectOptions, H264Parameters, SourceConnector, SourceError, SourceSession, StreamCodec,
    VideoPacket,
};
