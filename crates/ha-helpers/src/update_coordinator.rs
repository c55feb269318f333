//! Data update coordinator
//!
//! One coordinator fetches data for one data source and caches the latest
//! successful result. Entities do not poll; they register a listener and are
//! pushed every refresh, successful or not.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use ha_config_entries::SetupError;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// A refresh could not produce new data
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct UpdateFailed(pub String);

impl UpdateFailed {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Source of the data a coordinator caches
#[async_trait]
pub trait DataFetcher<T>: Send + Sync {
    async fn fetch(&self) -> Result<T, UpdateFailed>;
}

/// Called after every refresh attempt
pub type Listener<T> = Arc<dyn Fn(&DataUpdateCoordinator<T>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Snapshot<T> {
    data: Option<Arc<T>>,
    last_update_success: bool,
    last_error: Option<UpdateFailed>,
}

pub struct DataUpdateCoordinator<T> {
    name: String,
    update_interval: Option<Duration>,
    fetcher: Arc<dyn DataFetcher<T>>,
    snapshot: RwLock<Snapshot<T>>,
    listeners: DashMap<ListenerId, Listener<T>>,
    next_listener_id: AtomicU64,
    /// Held for the duration of a fetch; at most one in flight
    refresh_lock: Mutex<()>,
}

impl<T: Send + Sync + 'static> DataUpdateCoordinator<T> {
    /// `update_interval` of `None` disables scheduled polling
    pub fn new(
        name: impl Into<String>,
        update_interval: Option<Duration>,
        fetcher: Arc<dyn DataFetcher<T>>,
    ) -> Self {
        Self {
            name: name.into(),
            update_interval,
            fetcher,
            snapshot: RwLock::new(Snapshot {
                data: None,
                last_update_success: true,
                last_error: None,
            }),
            listeners: DashMap::new(),
            next_listener_id: AtomicU64::new(0),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn update_interval(&self) -> Option<Duration> {
        self.update_interval
    }

    /// Latest successfully fetched data; survives later failures
    pub fn data(&self) -> Option<Arc<T>> {
        self.snapshot.read().ok().and_then(|s| s.data.clone())
    }

    pub fn last_update_success(&self) -> bool {
        self.snapshot
            .read()
            .map(|s| s.last_update_success)
            .unwrap_or(false)
    }

    pub fn last_error(&self) -> Option<UpdateFailed> {
        self.snapshot.read().ok().and_then(|s| s.last_error.clone())
    }

    /// Initial refresh during entry setup; failure means the entry is not ready
    pub async fn first_refresh(&self) -> Result<(), SetupError> {
        if self.refresh().await {
            return Ok(());
        }
        let reason = self
            .last_error()
            .map(|e| e.to_string())
            .unwrap_or_else(|| format!("Error fetching {} data", self.name));
        Err(SetupError::NotReady(reason))
    }

    /// Fetch now, waiting for any refresh already in flight to finish first
    ///
    /// Returns whether this refresh succeeded.
    pub async fn refresh(&self) -> bool {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    /// Fetch unless a refresh is already in flight, in which case wait for
    /// that one and report its outcome
    pub async fn request_refresh(&self) -> bool {
        match self.refresh_lock.try_lock() {
            Ok(_guard) => self.refresh_locked().await,
            Err(_) => {
                debug!("Refresh of {} already in progress, joining it", self.name);
                let _guard = self.refresh_lock.lock().await;
                self.last_update_success()
            }
        }
    }

    async fn refresh_locked(&self) -> bool {
        debug!("Fetching {} data", self.name);
        let started = Instant::now();
        let result = self.fetcher.fetch().await;
        let was_success = self.last_update_success();

        let success = match result {
            Ok(data) => {
                if let Ok(mut snapshot) = self.snapshot.write() {
                    snapshot.data = Some(Arc::new(data));
                    snapshot.last_update_success = true;
                    snapshot.last_error = None;
                }
                if !was_success {
                    info!("Fetching {} data recovered", self.name);
                }
                true
            }
            Err(err) => {
                if was_success {
                    error!("Error fetching {} data: {}", self.name, err);
                } else {
                    debug!("Error fetching {} data: {}", self.name, err);
                }
                if let Ok(mut snapshot) = self.snapshot.write() {
                    snapshot.last_update_success = false;
                    snapshot.last_error = Some(err);
                }
                false
            }
        };

        debug!(
            "Finished fetching {} data in {:.3} seconds (success: {})",
            self.name,
            started.elapsed().as_secs_f64(),
            success
        );

        self.notify_listeners();
        success
    }

    pub fn add_listener(&self, listener: Listener<T>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.insert(id, listener);
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn notify_listeners(&self) {
        // Snapshot first so a listener may add or remove listeners
        let listeners: Vec<Listener<T>> =
            self.listeners.iter().map(|l| l.value().clone()).collect();
        for listener in listeners {
            listener(self);
        }
    }
}
