//! kakao_bus server
//!
//! Loads `configuration.yaml`, imports configured bus stops, sets up every
//! config entry in the background and serves the REST API until interrupted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use ha_api::AppState;
use ha_config::{Config, LoggerConfig};
use ha_config_entries::{ConfigEntries, FlowManager, Storage};
use ha_core::events::{HOMEASSISTANT_START, HOMEASSISTANT_STOP};
use ha_core::{Context, Event};
use ha_event_bus::EventBus;
use ha_helpers::EntityRegistry;
use ha_kakao_bus::{
    import_bus_stops, parse_section, BusStopConfigFlow, ClientConfig, KakaoBusIntegration, DOMAIN,
};
use ha_state_store::StateStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kakao-bus-server", version, about)]
struct Args {
    /// Directory holding configuration.yaml and .storage/
    #[arg(long, short = 'c', default_value = "config")]
    config: PathBuf,
}

/// The running instance
pub struct HomeAssistant {
    pub bus: Arc<EventBus>,
    pub states: Arc<StateStore>,
    pub config_entries: Arc<ConfigEntries>,
    pub entity_registry: Arc<EntityRegistry>,
    pub flows: Arc<FlowManager>,
}

impl HomeAssistant {
    pub fn new(config_dir: &Path, client_config: ClientConfig) -> Self {
        let bus = Arc::new(EventBus::new());
        let states = Arc::new(StateStore::new(bus.clone()));
        let storage = Arc::new(Storage::new(config_dir));
        let config_entries = Arc::new(ConfigEntries::new(storage.clone()));
        let entity_registry = Arc::new(EntityRegistry::new(storage));
        let flows = Arc::new(FlowManager::new(config_entries.clone()));

        config_entries.register_integration(Arc::new(
            KakaoBusIntegration::new(states.clone(), entity_registry.clone())
                .with_client_config(client_config),
        ));
        flows.register(Arc::new(BusStopConfigFlow));

        Self {
            bus,
            states,
            config_entries,
            entity_registry,
            flows,
        }
    }

    /// Load stored entries and entity ids, then import YAML stops
    pub async fn start(&self, config: &Config) -> Result<()> {
        self.config_entries
            .load()
            .await
            .context("loading config entries")?;
        self.entity_registry
            .load()
            .await
            .context("loading entity registry")?;

        if let Some(section) = config.integration(DOMAIN).filter(|s| !s.is_null()) {
            let stops = parse_section(section).context("invalid kakao_bus configuration")?;
            import_bus_stops(&self.config_entries, &stops).await?;
        }
        Ok(())
    }

    /// Set up every entry, then announce the start
    pub async fn setup_entries(&self) {
        for (entry_id, result) in self.config_entries.setup_all().await {
            if let Err(e) = result {
                warn!("Entry {} not set up: {}", entry_id, e);
            }
        }

        self.bus
            .fire(Event::new(HOMEASSISTANT_START, serde_json::json!({}), Context::new()));
        info!(
            "Started with {} config entries and {} entities",
            self.config_entries.len(),
            self.states.entity_count()
        );
    }

    pub async fn stop(&self) {
        self.bus
            .fire(Event::new(HOMEASSISTANT_STOP, serde_json::json!({}), Context::new()));
        self.config_entries.unload_all().await;
        info!("Stopped");
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            state_store: self.states.clone(),
            config_entries: self.config_entries.clone(),
            flows: self.flows.clone(),
        }
    }
}

/// `RUST_LOG` wins over the `logger:` section
fn init_logging(logger: &LoggerConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(logger.filter_directives()?)?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;
    init_logging(&config.logger)?;

    info!("Starting kakao_bus server from {}", args.config.display());

    let hass = Arc::new(HomeAssistant::new(&args.config, ClientConfig::default()));
    hass.start(&config).await?;

    // A stop whose endpoint hangs must not keep the API down
    let setup = tokio::spawn({
        let hass = hass.clone();
        async move { hass.setup_entries().await }
    });

    let served = ha_api::start_server(hass.app_state(), &config.http.listen_addr(), shutdown_signal()).await;
    setup.abort();
    let _ = setup.await;
    hass.stop().await;
    served.context("API server failed")?;

    Ok(())
}
