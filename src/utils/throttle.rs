//! Log throttling
//!
//! A broken camera can fail the same way for every packet. The ingest worker
//! routes those repeated messages through a [`LogThrottler`] so each kind is
//! logged at most once per interval.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Limits how often a message with a given key is logged
pub struct LogThrottler {
    last_logged: RwLock<HashMap<String, Instant>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_logged: RwLock::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `true` if the message for `key` should be logged now
    ///
    /// A `true` result records the current time for `key`.
    pub fn should_log(&self, key: &str) -> bool {
        let now = Instant::now();

        if let Some(last) = self.last_logged.read().get(key) {
            if now.duration_since(*last) < self.interval {
                return false;
            }
        }

        let mut map = self.last_logged.write();
        // Another thread may have logged between the two locks
        if let Some(last) = map.get(key) {
            if now.duration_since(*last) < self.interval {
                return false;
            }
        }
        map.insert(key.to_string(), now);
        true
    }

    /// Forget `key`, so the next occurrence is logged immediately
    #[cfg(test)]
    pub fn clear(&self, key: &str) {
        self.last_logged.write().remove(key);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.last_logged.read().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.last_logged.read().is_empty()
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `tracing::warn!`
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::warn!($($arg)*);
        }
    };
}

/// Throttled `tracing::debug!`
#[macro_export]
macro_rules! debug_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::debug!($($arg)*);
        }
    };
}
