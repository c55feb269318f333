//! Config flow for adding a bus stop from the UI

use std::collections::HashMap;

use async_trait::async_trait;
use ha_config_entries::{ConfigFlow, FieldType, FlowStep, FormField};
use serde_json::{Map, Value};

use crate::consts::{CONF_BUS_STOP_ID, CONF_BUS_STOP_NAME, DOMAIN, ERROR_EMPTY};

/// Single `user` step asking for the stop id and a display name
///
/// Values are stored as entered. Adding the same stop twice creates two
/// independent entries.
#[derive(Debug, Default)]
pub struct BusStopConfigFlow;

impl BusStopConfigFlow {
    fn show_form(errors: HashMap<String, String>) -> FlowStep {
        FlowStep::Form {
            step_id: "user".to_string(),
            data_schema: vec![
                FormField::required(CONF_BUS_STOP_ID, FieldType::String),
                FormField::required(CONF_BUS_STOP_NAME, FieldType::String),
            ],
            errors,
        }
    }
}

#[async_trait]
impl ConfigFlow for BusStopConfigFlow {
    fn domain(&self) -> &str {
        DOMAIN
    }

    async fn step(&self, step_id: &str, user_input: Option<&Map<String, Value>>) -> FlowStep {
        if step_id != "user" {
            return FlowStep::Abort {
                reason: "unknown_step".to_string(),
            };
        }

        let Some(input) = user_input else {
            return Self::show_form(HashMap::new());
        };

        let bus_stop_id = input.get(CONF_BUS_STOP_ID).and_then(Value::as_str).unwrap_or_default();
        let bus_stop_name = input
            .get(CONF_BUS_STOP_NAME)
            .and_then(Value::as_str)
            .unwrap_or_default();

        let mut errors = HashMap::new();
        for (field, value) in [(CONF_BUS_STOP_ID, bus_stop_id), (CONF_BUS_STOP_NAME, bus_stop_name)] {
            if value.is_empty() {
                errors.insert(field.to_string(), ERROR_EMPTY.to_string());
            }
        }
        if !errors.is_empty() {
            return Self::show_form(errors);
        }

        FlowStep::CreateEntry {
            title: format!("{} ({})", bus_stop_name, bus_stop_id),
            data: HashMap::from([
                (CONF_BUS_STOP_ID.to_string(), Value::String(bus_stop_id.to_string())),
                (CONF_BUS_STOP_NAME.to_string(), Value::String(bus_stop_name.to_string())),
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_initial_form() {
        let step = BusStopConfigFlow.step("user", None).await;
        let FlowStep::Form {
            step_id,
            data_schema,
            errors,
        } = step
        else {
            panic!("expected a form");
        };

        assert_eq!(step_id, "user");
        assert!(errors.is_empty());
        let names: Vec<&str> = data_schema.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["bus_stop_id", "bus_stop_name"]);
        assert!(data_schema.iter().all(|f| f.required && f.field_type == FieldType::String));
    }

    #[tokio::test]
    async fn test_create_entry_keeps_values_verbatim() {
        let step = BusStopConfigFlow
            .step(
                "user",
                Some(&input(json!({"bus_stop_id": " 11111", "bus_stop_name": "서울역 "}))),
            )
            .await;

        assert_eq!(
            step,
            FlowStep::CreateEntry {
                title: "서울역  ( 11111)".to_string(),
                data: HashMap::from([
                    ("bus_stop_id".to_string(), json!(" 11111")),
                    ("bus_stop_name".to_string(), json!("서울역 ")),
                ]),
            }
        );
    }

    #[tokio::test]
    async fn test_empty_fields_reshow_form() {
        let step = BusStopConfigFlow
            .step(
                "user",
                Some(&input(json!({"bus_stop_id": "", "bus_stop_name": "서울역"}))),
            )
            .await;

        let FlowStep::Form { errors, .. } = step else {
            panic!("expected a form");
        };
        assert_eq!(errors, HashMap::from([("bus_stop_id".to_string(), "empty".to_string())]));
    }
}
