//! Bus arrival sensors
//!
//! One sensor per bus serving the stop. Sensors never fetch; the coordinator
//! pushes every refresh and the sensor picks its own bus out of the result.

use std::collections::HashMap;
use std::sync::Mutex;

use ha_helpers::{DeviceInfo, Entity};
use serde_json::Value;

use crate::consts::{
    ATTR_BUS_NUMBER, ATTR_CURRENT_BUS_STOP, ATTR_REMAIN_SEAT, DOMAIN, ICON, MANUFACTURER,
};
use crate::coordinator::{BusStop, BusStopCoordinator};
use crate::model::BusInfo;

#[derive(Debug)]
struct Cached {
    /// Last record seen for this bus; kept when the bus drops out
    bus: Option<BusInfo>,
    /// Bus was in the most recent result
    present: bool,
    /// Most recent refresh succeeded
    coordinator_ok: bool,
}

#[derive(Debug)]
pub struct BusArrivalSensor {
    bus_stop_id: String,
    bus_stop_name: String,
    bus_name: String,
    cached: Mutex<Cached>,
}

impl BusArrivalSensor {
    /// Sensor seeded with the record it was discovered from
    pub fn new(stop: &BusStop, bus: &BusInfo) -> Self {
        Self {
            bus_stop_id: stop.bus_stop_id.clone(),
            bus_stop_name: stop.bus_stop_name.clone(),
            bus_name: bus.name.clone(),
            cached: Mutex::new(Cached {
                bus: Some(bus.clone()),
                present: true,
                coordinator_ok: true,
            }),
        }
    }

    pub fn bus_name(&self) -> &str {
        &self.bus_name
    }

    /// Last known record for this bus, even if it is stale
    pub fn bus(&self) -> Option<BusInfo> {
        self.cached.lock().ok().and_then(|c| c.bus.clone())
    }

    /// Re-read this sensor's bus from the coordinator's latest result
    pub fn handle_coordinator_update(&self, coordinator: &BusStopCoordinator) {
        let coordinator_ok = coordinator.last_update_success();
        let latest = if coordinator_ok {
            coordinator
                .data()
                .map(|data| data.find(&self.bus_name).cloned())
        } else {
            None
        };

        if let Ok(mut cached) = self.cached.lock() {
            cached.coordinator_ok = coordinator_ok;
            match latest {
                Some(Some(bus)) => {
                    cached.bus = Some(bus);
                    cached.present = true;
                }
                Some(None) => cached.present = false,
                // Failed refresh: keep presence as it was, availability follows coordinator_ok
                None => {}
            }
        }
    }
}

impl Entity for BusArrivalSensor {
    fn unique_id(&self) -> String {
        format!("{}_{}", self.bus_stop_id, self.bus_name)
    }

    fn name(&self) -> String {
        format!("{} {}", self.bus_stop_name, self.bus_name)
    }

    fn state(&self) -> Option<String> {
        self.bus().map(|bus| bus.vehicle_state_message)
    }

    fn available(&self) -> bool {
        self.cached
            .lock()
            .map(|c| c.coordinator_ok && c.present)
            .unwrap_or(false)
    }

    fn extra_state_attributes(&self) -> HashMap<String, Value> {
        let Some(bus) = self.bus() else {
            return HashMap::new();
        };
        HashMap::from([
            (
                ATTR_CURRENT_BUS_STOP.to_string(),
                Value::String(bus.current_bus_stop_name),
            ),
            (ATTR_REMAIN_SEAT.to_string(), Value::String(bus.remain_seat)),
            (ATTR_BUS_NUMBER.to_string(), Value::String(bus.name)),
        ])
    }

    fn icon(&self) -> Option<String> {
        Some(ICON.to_string())
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        Some(DeviceInfo {
            identifiers: vec![(DOMAIN.to_string(), self.bus_stop_id.clone())],
            name: self.bus_stop_name.clone(),
            manufacturer: Some(MANUFACTURER.to_string()),
            model: None,
        })
    }
}
