//! Constants for the kakao_bus integration

use std::time::Duration;

pub const DOMAIN: &str = "kakao_bus";

pub const CONF_BUS_STOP_ID: &str = "bus_stop_id";
pub const CONF_BUS_STOP_NAME: &str = "bus_stop_name";
pub const CONF_SCAN_INTERVAL: &str = "scan_interval";

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);

pub const DEFAULT_BASE_URL: &str = "https://m.map.kakao.com";
pub const BUSES_IN_BUS_STOP_PATH: &str = "/actions/busesInBusStopJson";

// Attributes
pub const ATTR_CURRENT_BUS_STOP: &str = "current_bus_stop";
pub const ATTR_REMAIN_SEAT: &str = "remain_seat";
pub const ATTR_BUS_NUMBER: &str = "bus_number";

pub const MANUFACTURER: &str = "Kakao";
pub const ICON: &str = "mdi:bus";

/// Form error for a blank field
pub const ERROR_EMPTY: &str = "empty";
