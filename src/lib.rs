//! rtsp-webrtc-relay - RTSP camera to WebRTC relay
//!
//! Pulls H.264 video from RTSP cameras and republishes it to any number of
//! browser viewers over WebRTC. One upstream connection per camera URL is
//! shared by all of that camera's viewers.

pub mod config;
pub mod error;
pub mod relay;
pub mod rtsp;
pub mod state;
pub mod utils;
pub mod web;
pub mod webrtc;

pub use error::{AppError, Result};
