//! Kakao bus arrival integration
//!
//! Polls Kakao's `busesInBusStopJson` endpoint for one stop per config entry
//! and exposes every bus serving the stop as a `sensor` entity whose state is
//! the arrival message.
//!
//! Per entry, setup creates:
//! - a [`KakaoBusClient`] and a [`BusStopCoordinator`] around it
//! - one [`BusArrivalSensor`] per bus present in the first fetch
//! - an [`IntervalTrigger`] refreshing the coordinator (unless polling is
//!   disabled on the entry)

pub mod api;
pub mod config_flow;
pub mod consts;
pub mod coordinator;
pub mod import;
pub mod model;
pub mod sensor;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use ha_config_entries::{ConfigEntry, Integration, SetupError};
use ha_helpers::{EntityPlatform, EntityRegistry, IntervalTrigger, ListenerId};
use ha_state_store::StateStore;
use tracing::{debug, info, instrument, warn};

pub use api::{ClientConfig, KakaoBusClient, KakaoBusError};
pub use config_flow::BusStopConfigFlow;
pub use consts::DOMAIN;
pub use coordinator::{BusStop, BusStopCoordinator};
pub use import::{import_bus_stops, parse_section, BusStopYaml};
pub use model::{BusInfo, BusesResponse};
pub use sensor::BusArrivalSensor;

/// Everything one loaded entry owns
struct EntryRuntime {
    coordinator: Arc<BusStopCoordinator>,
    platform: Arc<EntityPlatform>,
    sensors: Vec<Arc<BusArrivalSensor>>,
    listener: ListenerId,
    trigger: Option<IntervalTrigger>,
}

pub struct KakaoBusIntegration {
    state_store: Arc<StateStore>,
    entity_registry: Arc<EntityRegistry>,
    client_config: ClientConfig,
    /// entry_id -> runtime
    runtimes: DashMap<String, EntryRuntime>,
}

impl KakaoBusIntegration {
    pub fn new(state_store: Arc<StateStore>, entity_registry: Arc<EntityRegistry>) -> Self {
        Self {
            state_store,
            entity_registry,
            client_config: ClientConfig::default(),
            runtimes: DashMap::new(),
        }
    }

    pub fn with_client_config(mut self, client_config: ClientConfig) -> Self {
        self.client_config = client_config;
        self
    }

    pub fn coordinator(&self, entry_id: &str) -> Option<Arc<BusStopCoordinator>> {
        self.runtimes.get(entry_id).map(|r| r.coordinator.clone())
    }

    pub fn sensors(&self, entry_id: &str) -> Vec<Arc<BusArrivalSensor>> {
        self.runtimes
            .get(entry_id)
            .map(|r| r.sensors.clone())
            .unwrap_or_default()
    }

    pub fn entity_platform(&self, entry_id: &str) -> Option<Arc<EntityPlatform>> {
        self.runtimes.get(entry_id).map(|r| r.platform.clone())
    }

    /// Whether scheduled polling runs for this entry
    pub fn is_polling(&self, entry_id: &str) -> bool {
        self.runtimes
            .get(entry_id)
            .is_some_and(|r| r.trigger.is_some())
    }

    /// Refresh an entry now; `None` when the entry is not loaded
    pub async fn request_refresh(&self, entry_id: &str) -> Option<bool> {
        let coordinator = self.coordinator(entry_id)?;
        Some(coordinator.request_refresh().await)
    }
}

#[async_trait]
impl Integration for KakaoBusIntegration {
    fn domain(&self) -> &str {
        DOMAIN
    }

    #[instrument(skip(self, entry), fields(entry_id = %entry.entry_id))]
    async fn setup_entry(&self, entry: &ConfigEntry) -> Result<(), SetupError> {
        let stop = BusStop::from_entry(entry)?;
        let client = KakaoBusClient::new(self.client_config.clone())
            .map_err(|e| SetupError::Failed(e.to_string()))?;

        let update_interval = if entry.pref_disable_polling {
            None
        } else {
            Some(stop.scan_interval)
        };
        let coordinator = coordinator::new_coordinator(client, &stop, update_interval);
        coordinator.first_refresh().await?;

        let data = coordinator.data().unwrap_or_default();
        let platform = Arc::new(EntityPlatform::new(
            "sensor",
            DOMAIN,
            self.state_store.clone(),
            self.entity_registry.clone(),
        ));

        let mut sensors = Vec::new();
        for bus_name in data.bus_names() {
            let Some(bus) = data.find(bus_name) else {
                continue;
            };
            let sensor = Arc::new(BusArrivalSensor::new(&stop, bus));
            if let Err(e) = platform.add_entity(sensor.as_ref()) {
                platform.remove_all();
                return Err(SetupError::Failed(e.to_string()));
            }
            sensors.push(sensor);
        }
        debug!("Created {} sensors for {}", sensors.len(), stop.title());
        if let Err(e) = self.entity_registry.save().await {
            warn!("Could not save entity registry: {}", e);
        }

        let listener = {
            let platform = platform.clone();
            let sensors = sensors.clone();
            coordinator.add_listener(Arc::new(move |coordinator: &BusStopCoordinator| {
                for sensor in &sensors {
                    sensor.handle_coordinator_update(coordinator);
                    if let Err(e) = platform.write_state(sensor.as_ref()) {
                        warn!("Could not write state of {}: {}", sensor.bus_name(), e);
                    }
                }
            }))
        };
        let trigger = IntervalTrigger::spawn(coordinator.clone());

        info!(
            "Set up {} with {} buses (polling: {})",
            stop.title(),
            sensors.len(),
            trigger.is_some()
        );
        self.runtimes.insert(
            entry.entry_id.clone(),
            EntryRuntime {
                coordinator,
                platform,
                sensors,
                listener,
                trigger,
            },
        );
        Ok(())
    }

    #[instrument(skip(self, entry), fields(entry_id = %entry.entry_id))]
    async fn unload_entry(&self, entry: &ConfigEntry) -> bool {
        let Some((_, runtime)) = self.runtimes.remove(&entry.entry_id) else {
            warn!("Entry {} has nothing to unload", entry.entry_id);
            return true;
        };

        if let Some(trigger) = runtime.trigger {
            trigger.cancel();
        }
        runtime.coordinator.remove_listener(runtime.listener);
        runtime.platform.remove_all();

        info!("Unloaded {}", entry.title);
        true
    }
}
