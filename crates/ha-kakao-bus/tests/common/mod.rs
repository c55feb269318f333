//! Shared harness for kakao_bus integration tests
//!
//! - [`MockKakao`]: local stand-in for the Kakao endpoint
//! - [`TestHost`]: event bus, state store, config entries and flows wired to
//!   the integration, persisted under a temporary directory

#![allow(dead_code)]

mod mock_kakao;
mod test_host;

pub use mock_kakao::*;
pub use test_host::*;

use serde_json::{json, Value};

/// Payload with a single bus
pub fn single_bus(name: &str, message: &str, current_stop: &str, remain_seat: Value) -> Value {
    json!({
        "busesList": [{
            "name": name,
            "vehicleStateMessage": message,
            "currentBusStopName": current_stop,
            "remainSeat": remain_seat
        }]
    })
}
