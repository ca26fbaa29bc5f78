//! Small helpers shared across the relay

pub mod net;
pub mod throttle;

pub use net::{bind_tcp_listener, listen_addr};
pub use throttle::LogThrottler;
