//! WebRTC side of the relay
//!
//! Every relay session owns one [`RelayTrack`]. Each viewer gets its own
//! peer connection that binds that track, so RTP packetization and
//! sequencing happen per viewer while the ingest worker writes each sample
//! once.
//!
//! ```text
//! IngestWorker ──write_sample──▶ RelayTrack (one per session)
//!                                    │
//!                ┌───────────────────┼───────────────────┐
//!                ▼                   ▼                   ▼
//!           ViewerPeer          ViewerPeer          ViewerPeer
//!                │                   │                   │
//!             Browser             Browser             Browser
//! ```

pub mod config;
pub mod mdns;
pub mod peer;
pub mod signaling;
pub mod track;

pub use config::WebRtcConfig;
pub use peer::ViewerPeer;
pub use signaling::SignalingHandler;
pub use track::{RelayTrack, SampleSink, SinkError, TrackStats};
