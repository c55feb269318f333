//! Config Entries Manager
//!
//! Owns every config entry, persists them, and drives them through setup and
//! unload by calling the registered [`Integration`].

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, instrument, warn};

use crate::entry::{ConfigEntry, ConfigEntryState};
use crate::integration::{Integration, SetupError};
use crate::state_machine::{calculate_retry_delay, InvalidTransition};
use crate::storage::{Storable, Storage, StorageError, StorageResult};

pub const STORAGE_KEY: &str = "core.config_entries";
pub const STORAGE_VERSION: u32 = 1;
pub const STORAGE_MINOR_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Setup failed: {0}")]
    SetupFailed(String),

    #[error("Setup will be retried: {0}")]
    SetupRetry(String),

    #[error("Unload failed for entry {0}")]
    UnloadFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigEntriesData {
    pub entries: Vec<ConfigEntry>,
}

impl Storable for ConfigEntriesData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

pub struct ConfigEntries {
    storage: Arc<Storage>,

    /// entry_id -> ConfigEntry
    entries: DashMap<String, ConfigEntry>,

    /// domain -> integration
    integrations: DashMap<String, Arc<dyn Integration>>,

    /// Pending setup retries by entry_id
    retry_tasks: DashMap<String, JoinHandle<()>>,

    /// Serialises setup and unload of one entry
    entry_locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Moves an entry out of SetupInProgress if its setup attempt is dropped
/// before finishing, e.g. when a pending retry is cancelled mid-fetch
struct SetupAttemptGuard<'a> {
    entries: &'a DashMap<String, ConfigEntry>,
    entry_id: &'a str,
}

impl Drop for SetupAttemptGuard<'_> {
    fn drop(&mut self) {
        let Some(mut entry) = self.entries.get_mut(self.entry_id) else {
            return;
        };
        if entry.state != ConfigEntryState::SetupInProgress {
            return;
        }
        if entry
            .try_set_state(ConfigEntryState::SetupRetry, Some("Setup cancelled".to_string()))
            .is_ok()
        {
            debug!("Setup of {} cancelled while in progress", self.entry_id);
        }
    }
}

impl ConfigEntries {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            entries: DashMap::new(),
            integrations: DashMap::new(),
            retry_tasks: DashMap::new(),
            entry_locks: DashMap::new(),
        }
    }

    /// Load persisted entries; all start out NotLoaded
    pub async fn load(&self) -> StorageResult<()> {
        if let Some(data) = self.storage.load::<ConfigEntriesData>().await? {
            info!("Loading {} config entries from storage", data.entries.len());
            for entry in data.entries {
                self.entries.insert(entry.entry_id.clone(), entry);
            }
        }
        Ok(())
    }

    pub async fn save(&self) -> StorageResult<()> {
        let data = ConfigEntriesData {
            entries: self.entries(),
        };
        self.storage.save(&data).await?;
        debug!("Saved {} config entries to storage", data.entries.len());
        Ok(())
    }

    pub fn register_integration(&self, integration: Arc<dyn Integration>) {
        let domain = integration.domain().to_string();
        debug!("Registered integration for domain: {}", domain);
        self.integrations.insert(domain, integration);
    }

    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    /// All entries, oldest first
    pub fn entries(&self) -> Vec<ConfigEntry> {
        let mut entries: Vec<ConfigEntry> =
            self.entries.iter().map(|r| r.value().clone()).collect();
        entries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.entry_id.cmp(&b.entry_id))
        });
        entries
    }

    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.domain == domain)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add and persist a new entry; it is not set up
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        self.entries.insert(entry.entry_id.clone(), entry.clone());
        self.save().await?;

        info!(
            "Added config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry.entry_id
        );
        Ok(entry)
    }

    /// Unload (if needed) and delete an entry
    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        if self.get(entry_id).is_none() {
            return Err(ConfigEntriesError::NotFound(entry_id.to_string()));
        }

        self.unload(entry_id).await?;

        let (_, entry) = self
            .entries
            .remove(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        self.entry_locks.remove(entry_id);
        self.save().await?;

        info!(
            "Removed config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry_id
        );
        Ok(entry)
    }

    /// Set up an entry, scheduling background retries when it is not ready
    pub async fn setup(self: &Arc<Self>, entry_id: &str) -> ConfigEntriesResult<()> {
        let result = self.attempt_setup(entry_id).await;
        if matches!(result, Err(ConfigEntriesError::SetupRetry(_))) {
            self.schedule_retry(entry_id);
        }
        result
    }

    /// Set up every entry concurrently, returning per-entry results in
    /// completion order
    pub async fn setup_all(self: &Arc<Self>) -> Vec<(String, ConfigEntriesResult<()>)> {
        let mut tasks = JoinSet::new();
        for entry in self.entries() {
            let this = Arc::clone(self);
            tasks.spawn(async move {
                let result = this.setup(&entry.entry_id).await;
                (entry.entry_id, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!("Setup task did not complete: {}", e),
            }
        }
        results
    }

    #[instrument(skip(self))]
    async fn attempt_setup(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let lock = self.entry_lock(entry_id);
        let _lock = lock.lock().await;

        let entry = self.transition(entry_id, ConfigEntryState::SetupInProgress, None)?;
        let _attempt = SetupAttemptGuard {
            entries: &self.entries,
            entry_id,
        };
        let integration = self.integrations.get(&entry.domain).map(|r| r.value().clone());

        let Some(integration) = integration else {
            debug!(
                "No integration for domain {}, marking as loaded",
                entry.domain
            );
            self.transition(entry_id, ConfigEntryState::Loaded, None)?;
            return Ok(());
        };

        match integration.setup_entry(&entry).await {
            Ok(()) => {
                self.transition(entry_id, ConfigEntryState::Loaded, None)?;
                info!("Setup completed for entry: {} ({})", entry.title, entry_id);
                Ok(())
            }
            Err(SetupError::NotReady(reason)) => {
                self.transition(entry_id, ConfigEntryState::SetupRetry, Some(reason.clone()))?;
                if let Some(mut entry) = self.entries.get_mut(entry_id) {
                    entry.increment_tries();
                }
                warn!(
                    "Config entry '{}' for {} is not ready yet: {}; retrying in background",
                    entry.title, entry.domain, reason
                );
                Err(ConfigEntriesError::SetupRetry(reason))
            }
            Err(SetupError::Failed(reason)) => {
                self.transition(entry_id, ConfigEntryState::SetupError, Some(reason.clone()))?;
                warn!("Setup failed for entry {}: {}", entry_id, reason);
                Err(ConfigEntriesError::SetupFailed(reason))
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, entry_id: &str) {
        let this = Arc::clone(self);
        let id = entry_id.to_string();

        let handle = tokio::spawn(async move {
            loop {
                let tries = match this.get(&id) {
                    Some(entry) if entry.state == ConfigEntryState::SetupRetry => entry.tries,
                    _ => break,
                };
                let delay = calculate_retry_delay(tries.saturating_sub(1));
                debug!("Retrying setup of {} in {:?}", id, delay);
                tokio::time::sleep(delay).await;

                match this.attempt_setup(&id).await {
                    Err(ConfigEntriesError::SetupRetry(_)) => continue,
                    _ => break,
                }
            }
            this.retry_tasks.remove(&id);
        });

        if let Some(previous) = self.retry_tasks.insert(entry_id.to_string(), handle) {
            previous.abort();
        }
    }

    /// Unload an entry; a NotLoaded entry is left alone
    #[instrument(skip(self))]
    pub async fn unload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        if let Some((_, task)) = self.retry_tasks.remove(entry_id) {
            task.abort();
            // Wait for the task to be dropped so an attempt it was running
            // has left SetupInProgress
            let _ = task.await;
        }

        let lock = self.entry_lock(entry_id);
        let _lock = lock.lock().await;

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        if entry.state == ConfigEntryState::NotLoaded {
            return Ok(());
        }
        let was_loaded = entry.is_loaded();

        self.transition(entry_id, ConfigEntryState::UnloadInProgress, None)?;

        let integration = self.integrations.get(&entry.domain).map(|r| r.value().clone());
        let unloaded = match integration {
            Some(integration) if was_loaded => integration.unload_entry(&entry).await,
            _ => true,
        };

        if unloaded {
            self.transition(entry_id, ConfigEntryState::NotLoaded, None)?;
            info!("Unloaded entry: {} ({})", entry.title, entry_id);
            Ok(())
        } else {
            self.transition(entry_id, ConfigEntryState::FailedUnload, None)?;
            warn!("Failed to unload entry: {} ({})", entry.title, entry_id);
            Err(ConfigEntriesError::UnloadFailed(entry_id.to_string()))
        }
    }

    pub async fn reload(self: &Arc<Self>, entry_id: &str) -> ConfigEntriesResult<()> {
        self.unload(entry_id).await?;
        self.setup(entry_id).await
    }

    /// Unload every entry, e.g. on shutdown
    pub async fn unload_all(&self) {
        for entry in self.entries() {
            if let Err(e) = self.unload(&entry.entry_id).await {
                warn!("Error unloading {}: {}", entry.entry_id, e);
            }
        }
    }

    fn entry_lock(&self, entry_id: &str) -> Arc<Mutex<()>> {
        self.entry_locks
            .entry(entry_id.to_string())
            .or_default()
            .clone()
    }

    fn transition(
        &self,
        entry_id: &str,
        state: ConfigEntryState,
        reason: Option<String>,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let mut entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        entry.try_set_state(state, reason)?;
        debug!("Entry {} state changed to {:?}", entry_id, state);
        Ok(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::ConfigEntrySource;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Fails with NotReady `fail_times` times, then succeeds
    struct FlakyIntegration {
        fail_times: usize,
        setups: AtomicUsize,
        unloads: AtomicUsize,
        unload_ok: bool,
    }

    impl FlakyIntegration {
        fn new(fail_times: usize) -> Arc<Self> {
            Arc::new(Self {
                fail_times,
                setups: AtomicUsize::new(0),
                unloads: AtomicUsize::new(0),
                unload_ok: true,
            })
        }
    }

    #[async_trait]
    impl Integration for FlakyIntegration {
        fn domain(&self) -> &str {
            "kakao_bus"
        }

        async fn setup_entry(&self, _entry: &ConfigEntry) -> Result<(), SetupError> {
            let attempt = self.setups.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_times {
                Err(SetupError::NotReady("connection refused".into()))
            } else {
                Ok(())
            }
        }

        async fn unload_entry(&self, _entry: &ConfigEntry) -> bool {
            self.unloads.fetch_add(1, Ordering::SeqCst);
            self.unload_ok
        }
    }

    struct BrokenIntegration;

    #[async_trait]
    impl Integration for BrokenIntegration {
        fn domain(&self) -> &str {
            "kakao_bus"
        }

        async fn setup_entry(&self, _entry: &ConfigEntry) -> Result<(), SetupError> {
            Err(SetupError::Failed("bus_stop_id missing".into()))
        }

        async fn unload_entry(&self, _entry: &ConfigEntry) -> bool {
            true
        }
    }

    /// Not ready on the first call; later setups of entries titled "slow"
    /// never finish
    struct StallingIntegration {
        setups: AtomicUsize,
    }

    #[async_trait]
    impl Integration for StallingIntegration {
        fn domain(&self) -> &str {
            "kakao_bus"
        }

        async fn setup_entry(&self, entry: &ConfigEntry) -> Result<(), SetupError> {
            if self.setups.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(SetupError::NotReady("502".into()));
            }
            if entry.title == "slow" {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn unload_entry(&self, _entry: &ConfigEntry) -> bool {
            true
        }
    }

    fn create_test_manager() -> (TempDir, Arc<ConfigEntries>) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path()));
        (temp_dir, Arc::new(ConfigEntries::new(storage)))
    }

    #[tokio::test]
    async fn test_add_and_get_by_domain() {
        let (_dir, manager) = create_test_manager();

        manager.add(ConfigEntry::new("kakao_bus", "A")).await.unwrap();
        manager.add(ConfigEntry::new("kakao_bus", "B")).await.unwrap();
        manager.add(ConfigEntry::new("other", "C")).await.unwrap();

        assert_eq!(manager.len(), 3);
        assert_eq!(manager.get_by_domain("kakao_bus").len(), 2);
    }

    #[tokio::test]
    async fn test_setup_and_unload_calls_integration() {
        let (_dir, manager) = create_test_manager();
        let integration = FlakyIntegration::new(0);
        manager.register_integration(integration.clone());

        let entry = manager.add(ConfigEntry::new("kakao_bus", "Test")).await.unwrap();
        manager.setup(&entry.entry_id).await.unwrap();
        assert!(manager.get(&entry.entry_id).unwrap().is_loaded());

        manager.unload(&entry.entry_id).await.unwrap();
        assert_eq!(
            manager.get(&entry.entry_id).unwrap().state,
            ConfigEntryState::NotLoaded
        );
        assert_eq!(integration.unloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_setup_failure_is_setup_error() {
        let (_dir, manager) = create_test_manager();
        manager.register_integration(Arc::new(BrokenIntegration));

        let entry = manager.add(ConfigEntry::new("kakao_bus", "Test")).await.unwrap();
        let result = manager.setup(&entry.entry_id).await;

        assert!(matches!(result, Err(ConfigEntriesError::SetupFailed(_))));
        let stored = manager.get(&entry.entry_id).unwrap();
        assert_eq!(stored.state, ConfigEntryState::SetupError);
        assert_eq!(stored.reason.as_deref(), Some("bus_stop_id missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_is_retried_in_background() {
        let (_dir, manager) = create_test_manager();
        let integration = FlakyIntegration::new(2);
        manager.register_integration(integration.clone());

        let entry = manager.add(ConfigEntry::new("kakao_bus", "Test")).await.unwrap();
        let result = manager.setup(&entry.entry_id).await;
        assert!(matches!(result, Err(ConfigEntriesError::SetupRetry(_))));

        let stored = manager.get(&entry.entry_id).unwrap();
        assert_eq!(stored.state, ConfigEntryState::SetupRetry);
        assert_eq!(stored.tries, 1);

        // 5s for the first retry, 10s for the second
        tokio::time::sleep(std::time::Duration::from_secs(16)).await;

        assert_eq!(integration.setups.load(Ordering::SeqCst), 3);
        assert!(manager.get(&entry.entry_id).unwrap().is_loaded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unload_cancels_pending_retry() {
        let (_dir, manager) = create_test_manager();
        let integration = FlakyIntegration::new(usize::MAX);
        manager.register_integration(integration.clone());

        let entry = manager.add(ConfigEntry::new("kakao_bus", "Test")).await.unwrap();
        let _ = manager.setup(&entry.entry_id).await;

        manager.unload(&entry.entry_id).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;

        assert_eq!(integration.setups.load(Ordering::SeqCst), 1);
        // Entry never loaded, so the integration had nothing to unload
        assert_eq!(integration.unloads.load(Ordering::SeqCst), 0);
        assert_eq!(
            manager.get(&entry.entry_id).unwrap().state,
            ConfigEntryState::NotLoaded
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unload_during_retry_attempt() {
        let (_dir, manager) = create_test_manager();
        let integration = Arc::new(StallingIntegration {
            setups: AtomicUsize::new(0),
        });
        manager.register_integration(integration.clone());

        let entry = manager.add(ConfigEntry::new("kakao_bus", "slow")).await.unwrap();
        let _ = manager.setup(&entry.entry_id).await;

        // The first retry starts after ~5s and never returns
        tokio::time::sleep(std::time::Duration::from_secs(6)).await;
        assert_eq!(integration.setups.load(Ordering::SeqCst), 2);
        assert_eq!(
            manager.get(&entry.entry_id).unwrap().state,
            ConfigEntryState::SetupInProgress
        );

        manager.unload(&entry.entry_id).await.unwrap();
        assert_eq!(
            manager.get(&entry.entry_id).unwrap().state,
            ConfigEntryState::NotLoaded
        );

        manager.remove(&entry.entry_id).await.unwrap();
        assert!(manager.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_setup_does_not_block_other_entries() {
        let (_dir, manager) = create_test_manager();
        // Consume the not-ready first call
        let integration = Arc::new(StallingIntegration {
            setups: AtomicUsize::new(1),
        });
        manager.register_integration(integration);

        let slow = manager.add(ConfigEntry::new("kakao_bus", "slow")).await.unwrap();
        let fast = manager.add(ConfigEntry::new("kakao_bus", "fast")).await.unwrap();

        let stalled = {
            let manager = manager.clone();
            let entry_id = slow.entry_id.clone();
            tokio::spawn(async move { manager.setup(&entry_id).await })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            manager.get(&slow.entry_id).unwrap().state,
            ConfigEntryState::SetupInProgress
        );

        let timeout = std::time::Duration::from_secs(5);
        tokio::time::timeout(timeout, manager.setup(&fast.entry_id))
            .await
            .expect("setup of another entry was blocked")
            .unwrap();
        assert!(manager.get(&fast.entry_id).unwrap().is_loaded());

        tokio::time::timeout(timeout, manager.remove(&fast.entry_id))
            .await
            .expect("removal of another entry was blocked")
            .unwrap();

        stalled.abort();
        let _ = stalled.await;
        assert_eq!(
            manager.get(&slow.entry_id).unwrap().state,
            ConfigEntryState::SetupRetry
        );
        manager.remove(&slow.entry_id).await.unwrap();
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_failed_unload() {
        let (_dir, manager) = create_test_manager();
        manager.register_integration(Arc::new(FlakyIntegration {
            fail_times: 0,
            setups: AtomicUsize::new(0),
            unloads: AtomicUsize::new(0),
            unload_ok: false,
        }));

        let entry = manager.add(ConfigEntry::new("kakao_bus", "Test")).await.unwrap();
        manager.setup(&entry.entry_id).await.unwrap();

        let result = manager.unload(&entry.entry_id).await;
        assert!(matches!(result, Err(ConfigEntriesError::UnloadFailed(_))));
        assert_eq!(
            manager.get(&entry.entry_id).unwrap().state,
            ConfigEntryState::FailedUnload
        );
    }

    #[tokio::test]
    async fn test_remove_unloads_first() {
        let (_dir, manager) = create_test_manager();
        let integration = FlakyIntegration::new(0);
        manager.register_integration(integration.clone());

        let entry = manager.add(ConfigEntry::new("kakao_bus", "Test")).await.unwrap();
        manager.setup(&entry.entry_id).await.unwrap();

        manager.remove(&entry.entry_id).await.unwrap();
        assert!(manager.is_empty());
        assert_eq!(integration.unloads.load(Ordering::SeqCst), 1);
        assert!(matches!(
            manager.remove(&entry.entry_id).await,
            Err(ConfigEntriesError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path()));

        let entry_id = {
            let manager = ConfigEntries::new(storage.clone());
            manager
                .add(ConfigEntry::new("kakao_bus", "Test").with_source(ConfigEntrySource::Import))
                .await
                .unwrap()
                .entry_id
        };

        let manager = ConfigEntries::new(storage);
        manager.load().await.unwrap();

        let entry = manager.get(&entry_id).unwrap();
        assert_eq!(entry.title, "Test");
        assert_eq!(entry.source, ConfigEntrySource::Import);
        assert_eq!(entry.state, ConfigEntryState::NotLoaded);
    }
}
