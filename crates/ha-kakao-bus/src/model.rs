//! Payload of the `busesInBusStopJson` endpoint
//!
//! Only the fields the sensors read are modelled. Missing fields and a
//! missing `busesList` fall back to empty values instead of failing the
//! refresh.

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusesResponse {
    #[serde(rename = "busesList", default)]
    pub buses: Vec<BusInfo>,
}

impl BusesResponse {
    /// First bus with this name
    pub fn find(&self, bus_name: &str) -> Option<&BusInfo> {
        self.buses.iter().find(|bus| bus.name == bus_name)
    }

    /// Distinct, non-empty bus names in payload order
    pub fn bus_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::with_capacity(self.buses.len());
        for bus in &self.buses {
            if !bus.name.is_empty() && !names.contains(&bus.name.as_str()) {
                names.push(&bus.name);
            }
        }
        names
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusInfo {
    #[serde(default, deserialize_with = "string_or_number")]
    pub name: String,

    /// e.g. "3분 후 도착"
    #[serde(default, deserialize_with = "string_or_number")]
    pub vehicle_state_message: String,

    #[serde(default, deserialize_with = "string_or_number")]
    pub current_bus_stop_name: String,

    /// Sent as either `"20"` or `20`
    #[serde(default, deserialize_with = "string_or_number")]
    pub remain_seat: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Text(text)) => text,
        Some(Raw::Number(number)) => number.to_string(),
        None => String::new(),
    })
}
