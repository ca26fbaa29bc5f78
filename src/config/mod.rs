//! Relay configuration
//!
//! The relay reads a single JSON document at startup. A missing or
//! malformed file is not fatal: defaults are used instead.

mod schema;
mod store;

pub use schema::{AppConfig, IceServerConfig};
pub use store::ConfigStore;
