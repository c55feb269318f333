//! One coordinator per configured bus stop

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ha_config_entries::{ConfigEntry, SetupError};
use ha_helpers::{DataFetcher, DataUpdateCoordinator, UpdateFailed};

use crate::api::KakaoBusClient;
use crate::consts::{CONF_BUS_STOP_ID, CONF_BUS_STOP_NAME, CONF_SCAN_INTERVAL, DEFAULT_SCAN_INTERVAL};
use crate::model::BusesResponse;

pub type BusStopCoordinator = DataUpdateCoordinator<BusesResponse>;

/// The configured stop, read out of a config entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusStop {
    pub bus_stop_id: String,
    pub bus_stop_name: String,
    pub scan_interval: Duration,
}

impl BusStop {
    pub fn from_entry(entry: &ConfigEntry) -> Result<Self, SetupError> {
        let bus_stop_id = entry
            .data_str(CONF_BUS_STOP_ID)
            .ok_or_else(|| SetupError::Failed(format!("{} missing from entry", CONF_BUS_STOP_ID)))?;
        let bus_stop_name = entry
            .data_str(CONF_BUS_STOP_NAME)
            .ok_or_else(|| SetupError::Failed(format!("{} missing from entry", CONF_BUS_STOP_NAME)))?;
        let scan_interval = entry
            .data
            .get(CONF_SCAN_INTERVAL)
            .and_then(|v| v.as_u64())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SCAN_INTERVAL);

        Ok(Self {
            bus_stop_id: bus_stop_id.to_string(),
            bus_stop_name: bus_stop_name.to_string(),
            scan_interval,
        })
    }

    /// `"서울역 (11111)"`; also the entry title and coordinator name
    pub fn title(&self) -> String {
        format!("{} ({})", self.bus_stop_name, self.bus_stop_id)
    }
}

pub struct BusStopFetcher {
    client: KakaoBusClient,
    bus_stop_id: String,
}

impl BusStopFetcher {
    pub fn new(client: KakaoBusClient, bus_stop_id: impl Into<String>) -> Self {
        Self {
            client,
            bus_stop_id: bus_stop_id.into(),
        }
    }
}

#[async_trait]
impl DataFetcher<BusesResponse> for BusStopFetcher {
    async fn fetch(&self) -> Result<BusesResponse, UpdateFailed> {
        Ok(self.client.buses_in_bus_stop(&self.bus_stop_id).await?)
    }
}

/// Coordinator polling `stop` every `update_interval` (`None`: never)
pub fn new_coordinator(
    client: KakaoBusClient,
    stop: &BusStop,
    update_interval: Option<Duration>,
) -> Arc<BusStopCoordinator> {
    Arc::new(DataUpdateCoordinator::new(
        stop.title(),
        update_interval,
        Arc::new(BusStopFetcher::new(client, stop.bus_stop_id.clone())),
    ))
}
