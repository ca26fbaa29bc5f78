//! Relay sessions
//!
//! A session owns one upstream RTSP source and one outbound WebRTC track.
//! Its ingest worker keeps the track fed (reconnecting on read errors)
//! while viewers attach and detach through signaling.

pub mod ingest;
pub mod registry;
pub mod session;

pub use ingest::{IngestOptions, IngestWorker};
pub use registry::SessionRegistry;
pub use session::{RetireReason, Session, SessionInfo, SessionStatus};
