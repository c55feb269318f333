//! The seam between the config entry manager and an integration

use async_trait::async_trait;
use thiserror::Error;

use crate::entry::ConfigEntry;

/// Why an integration could not set up an entry
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SetupError {
    /// Transient failure (e.g. the first refresh failed); setup is retried
    #[error("{0}")]
    NotReady(String),

    /// Permanent failure (e.g. the entry data is unusable)
    #[error("{0}")]
    Failed(String),
}

/// Implemented by each integration that owns config entries
#[async_trait]
pub trait Integration: Send + Sync {
    /// Domain whose entries this integration handles
    fn domain(&self) -> &str;

    /// Bring an entry up: create its coordinator, entities, timers
    async fn setup_entry(&self, entry: &ConfigEntry) -> Result<(), SetupError>;

    /// Tear an entry down; `false` means something could not be released
    async fn unload_entry(&self, entry: &ConfigEntry) -> bool;
}
