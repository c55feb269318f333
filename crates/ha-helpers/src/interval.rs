//! Periodic refresh of a coordinator

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::update_coordinator::DataUpdateCoordinator;

/// Background task refreshing a coordinator every `update_interval`
///
/// The task stops when the trigger is cancelled or dropped.
pub struct IntervalTrigger {
    handle: JoinHandle<()>,
}

impl IntervalTrigger {
    /// Start polling; `None` when the coordinator has no update interval
    pub fn spawn<T: Send + Sync + 'static>(
        coordinator: Arc<DataUpdateCoordinator<T>>,
    ) -> Option<Self> {
        let period = coordinator.update_interval()?;

        let handle = tokio::spawn(async move {
            // First tick one period from now; setup already did the first refresh
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                coordinator.request_refresh().await;
            }
        });

        debug!("Scheduled refresh every {:?}", period);
        Some(Self { handle })
    }

    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for IntervalTrigger {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
