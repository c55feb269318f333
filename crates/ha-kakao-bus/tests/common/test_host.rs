//! Minimal host running the kakao_bus integration

use std::sync::Arc;

use ha_config_entries::{
    ConfigEntries, ConfigEntry, FlowManager, FlowResultType, Storage,
};
use ha_core::State;
use ha_event_bus::EventBus;
use ha_helpers::EntityRegistry;
use ha_kakao_bus::{BusStopConfigFlow, ClientConfig, KakaoBusIntegration};
use ha_state_store::StateStore;
use serde_json::json;
use tempfile::TempDir;

pub struct TestHost {
    pub dir: TempDir,
    pub bus: Arc<EventBus>,
    pub states: Arc<StateStore>,
    pub config_entries: Arc<ConfigEntries>,
    pub entity_registry: Arc<EntityRegistry>,
    pub flows: FlowManager,
    pub integration: Arc<KakaoBusIntegration>,
}

impl TestHost {
    /// Host whose integration talks to `base_url`
    pub fn new(base_url: &str) -> Self {
        Self::in_dir(TempDir::new().unwrap(), base_url)
    }

    /// Host over an existing config dir, e.g. to simulate a restart
    pub fn in_dir(dir: TempDir, base_url: &str) -> Self {
        let bus = Arc::new(EventBus::new());
        let states = Arc::new(StateStore::new(bus.clone()));
        let storage = Arc::new(Storage::new(dir.path()));
        let config_entries = Arc::new(ConfigEntries::new(storage.clone()));
        let entity_registry = Arc::new(EntityRegistry::new(storage));

        let integration = Arc::new(
            KakaoBusIntegration::new(states.clone(), entity_registry.clone())
                .with_client_config(ClientConfig::default().with_base_url(base_url)),
        );
        config_entries.register_integration(integration.clone());

        let flows = FlowManager::new(config_entries.clone());
        flows.register(Arc::new(BusStopConfigFlow));

        Self {
            dir,
            bus,
            states,
            config_entries,
            entity_registry,
            flows,
            integration,
        }
    }

    /// Load persisted entries and entity ids, as on startup
    pub async fn load(&self) {
        self.config_entries.load().await.unwrap();
        self.entity_registry.load().await.unwrap();
    }

    /// Add a stop through the config flow; the entry is set up on creation
    pub async fn add_stop(&self, bus_stop_id: &str, bus_stop_name: &str) -> ConfigEntry {
        let form = self.flows.start("kakao_bus").await.unwrap();
        let result = self
            .flows
            .progress(
                &form.flow_id,
                json!({ "bus_stop_id": bus_stop_id, "bus_stop_name": bus_stop_name }),
            )
            .await
            .unwrap();
        assert_eq!(result.result_type, FlowResultType::CreateEntry);

        self.config_entries
            .get(result.entry_id.as_deref().unwrap())
            .unwrap()
    }

    pub fn entry(&self, entry_id: &str) -> ConfigEntry {
        self.config_entries.get(entry_id).unwrap()
    }

    pub fn state(&self, entity_id: &str) -> State {
        self.states
            .get(entity_id)
            .unwrap_or_else(|| panic!("no state for {}", entity_id))
    }

    pub fn sensor_states(&self) -> Vec<State> {
        self.states
            .all()
            .into_iter()
            .filter(|s| s.entity_id.domain() == "sensor")
            .collect()
    }
}
