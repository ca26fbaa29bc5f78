use std::path::Path;
use std::sync::Arc;

use super::AppConfig;
use crate::error::{AppError, Result};

/// Configuration store backed by a JSON file
///
/// The file is read once at startup. Readers share the loaded
/// configuration through an `Arc` so handlers never copy it.
#[derive(Clone)]
pub struct ConfigStore {
    config: Arc<AppConfig>,
}

impl ConfigStore {
    /// Load configuration from `path`, falling back to defaults
    ///
    /// A missing, unreadable, or malformed file is logged and otherwise
    /// ignored; the relay then runs with zero-valued timeouts.
    pub async fn load(path: &Path) -> Self {
        let config = match Self::read_file(path).await {
            Ok(config) => {
                tracing::info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!("{}, using defaults", e);
                AppConfig::default()
            }
        };

        Self {
            config: Arc::new(config),
        }
    }

    /// Create a store from an in-memory configuration
    pub fn from_config(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    async fn read_file(path: &Path) -> Result<AppConfig> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| AppError::Config(format!("invalid {}: {}", path.display(), e)))
    }

    /// Get current configuration
    pub fn get(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    /// Apply in-process overrides (e.g. command line flags)
    pub fn update<F>(&mut self, f: F)
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = (*self.config).clone();
        f(&mut config);
        self.config = Arc::new(config);
    }
}
