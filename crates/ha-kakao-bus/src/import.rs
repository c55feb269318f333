//! Import of stops listed under `kakao_bus:` in configuration.yaml

use std::collections::HashMap;

use ha_config_entries::{ConfigEntries, ConfigEntriesError, ConfigEntry, ConfigEntrySource};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::consts::{CONF_BUS_STOP_ID, CONF_BUS_STOP_NAME, CONF_SCAN_INTERVAL, DOMAIN};

/// One item of the `kakao_bus:` list
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusStopYaml {
    pub bus_stop_id: String,
    pub bus_stop_name: String,
    /// Seconds between refreshes
    #[serde(default)]
    pub scan_interval: Option<u64>,
}

/// Parse the `kakao_bus:` section
pub fn parse_section(section: &serde_yaml::Value) -> Result<Vec<BusStopYaml>, serde_yaml::Error> {
    serde_yaml::from_value(section.clone())
}

/// Create an import entry for every listed stop that does not have one yet
///
/// Stops are matched on `bus_stop_id` against existing import entries only,
/// so a stop added through the UI is still imported.
pub async fn import_bus_stops(
    config_entries: &ConfigEntries,
    stops: &[BusStopYaml],
) -> Result<Vec<ConfigEntry>, ConfigEntriesError> {
    let mut created = Vec::new();

    for stop in stops {
        if stop.bus_stop_id.is_empty() || stop.bus_stop_name.is_empty() {
            warn!("Skipping kakao_bus item with an empty bus_stop_id or bus_stop_name");
            continue;
        }

        let exists = config_entries.get_by_domain(DOMAIN).iter().any(|entry| {
            entry.source == ConfigEntrySource::Import
                && entry.data_str(CONF_BUS_STOP_ID) == Some(stop.bus_stop_id.as_str())
        });
        if exists {
            debug!("Bus stop {} already imported", stop.bus_stop_id);
            continue;
        }

        let mut data = HashMap::from([
            (CONF_BUS_STOP_ID.to_string(), Value::String(stop.bus_stop_id.clone())),
            (CONF_BUS_STOP_NAME.to_string(), Value::String(stop.bus_stop_name.clone())),
        ]);
        if let Some(secs) = stop.scan_interval {
            data.insert(CONF_SCAN_INTERVAL.to_string(), Value::from(secs));
        }

        let title = format!("{} ({})", stop.bus_stop_name, stop.bus_stop_id);
        let entry = ConfigEntry::new(DOMAIN, title)
            .with_data(data)
            .with_source(ConfigEntrySource::Import);
        let entry = config_entries.add(entry).await?;
        info!("Imported bus stop {} from configuration.yaml", entry.title);
        created.push(entry);
    }

    Ok(created)
}
