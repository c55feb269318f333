//! Config flows
//!
//! A config flow is a short dialogue (show form, receive input, create entry)
//! that produces a new config entry. [`FlowManager`] keeps track of flows in
//! progress and checks submitted input against the form's schema before the
//! handler sees it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::entry::ConfigEntry;
use crate::manager::{ConfigEntries, ConfigEntriesError};

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Invalid handler specified: {0}")]
    UnknownHandler(String),

    #[error("Flow {0} not found")]
    UnknownFlow(String),

    #[error("User input must be an object")]
    NotAnObject,

    #[error("{message} for dictionary value @ data['{field}']")]
    InvalidInput { field: String, message: String },

    #[error(transparent)]
    ConfigEntries(#[from] ConfigEntriesError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowResultType {
    Form,
    CreateEntry,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Boolean,
}

impl FieldType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Boolean => value.is_boolean(),
        }
    }

    fn expected(self) -> &'static str {
        match self {
            FieldType::String => "expected str",
            FieldType::Integer => "expected int",
            FieldType::Boolean => "expected bool",
        }
    }
}

/// Form field schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FormField {
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            default: None,
        }
    }
}

/// What a handler wants to happen after a step
#[derive(Debug, Clone, PartialEq)]
pub enum FlowStep {
    Form {
        step_id: String,
        data_schema: Vec<FormField>,
        errors: HashMap<String, String>,
    },
    CreateEntry {
        title: String,
        data: HashMap<String, Value>,
    },
    Abort {
        reason: String,
    },
}

/// Result of a flow step as returned to the frontend
#[derive(Debug, Clone, Serialize)]
pub struct FlowResult {
    pub flow_id: String,
    /// Integration domain
    pub handler: String,
    #[serde(rename = "type")]
    pub result_type: FlowResultType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub data_schema: Vec<FormField>,
    pub errors: Option<HashMap<String, String>>,
    pub description_placeholders: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    /// Entry data (create_entry only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
}

impl FlowResult {
    fn new(flow_id: &str, handler: &str, result_type: FlowResultType) -> Self {
        Self {
            flow_id: flow_id.to_string(),
            handler: handler.to_string(),
            result_type,
            step_id: None,
            data_schema: Vec::new(),
            errors: None,
            description_placeholders: None,
            title: None,
            reason: None,
            version: None,
            result: None,
            entry_id: None,
        }
    }
}

/// Summary of a flow in progress
#[derive(Debug, Clone, Serialize)]
pub struct FlowInfo {
    pub flow_id: String,
    pub handler: String,
    pub step_id: String,
}

/// Implemented by each integration that can be added from the UI
#[async_trait]
pub trait ConfigFlow: Send + Sync {
    fn domain(&self) -> &str;

    fn version(&self) -> u32 {
        1
    }

    /// Run `step_id`; `user_input` is `None` when the step is first shown
    async fn step(&self, step_id: &str, user_input: Option<&Map<String, Value>>) -> FlowStep;
}

struct ActiveFlow {
    handler: String,
    current: FlowResult,
}

pub struct FlowManager {
    config_entries: Arc<ConfigEntries>,
    handlers: DashMap<String, Arc<dyn ConfigFlow>>,
    flows: DashMap<String, ActiveFlow>,
}

impl FlowManager {
    pub fn new(config_entries: Arc<ConfigEntries>) -> Self {
        Self {
            config_entries,
            handlers: DashMap::new(),
            flows: DashMap::new(),
        }
    }

    pub fn register(&self, flow: Arc<dyn ConfigFlow>) {
        let domain = flow.domain().to_string();
        debug!("Registered config flow handler for {}", domain);
        self.handlers.insert(domain, flow);
    }

    /// Domains that have a config flow, sorted
    pub fn handlers(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.handlers.iter().map(|r| r.key().clone()).collect();
        domains.sort();
        domains
    }

    pub async fn start(&self, handler: &str) -> Result<FlowResult, FlowError> {
        let flow = self
            .handlers
            .get(handler)
            .map(|r| r.value().clone())
            .ok_or_else(|| FlowError::UnknownHandler(handler.to_string()))?;

        let flow_id = Ulid::new().to_string().to_lowercase();
        info!("Starting config flow for {} with flow_id {}", handler, flow_id);

        let step = flow.step("user", None).await;
        self.handle_step(&flow_id, flow.as_ref(), step).await
    }

    /// Submit input for the current step of a flow
    ///
    /// The flow is taken out of the in-progress set while its step runs, so
    /// a second submission for it fails with [`FlowError::UnknownFlow`].
    pub async fn progress(&self, flow_id: &str, user_input: Value) -> Result<FlowResult, FlowError> {
        let (_, active) = self
            .flows
            .remove(flow_id)
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;

        let (flow, input) = match self.accept_input(&active, user_input) {
            Ok(accepted) => accepted,
            Err(e) => {
                self.flows.insert(flow_id.to_string(), active);
                return Err(e);
            }
        };

        let step_id = active.current.step_id.unwrap_or_else(|| "user".to_string());
        info!("Progressing flow {} for {} at step {}", flow_id, active.handler, step_id);

        let step = flow.step(&step_id, Some(&input)).await;
        self.handle_step(flow_id, flow.as_ref(), step).await
    }

    fn accept_input(
        &self,
        active: &ActiveFlow,
        user_input: Value,
    ) -> Result<(Arc<dyn ConfigFlow>, Map<String, Value>), FlowError> {
        let flow = self
            .handlers
            .get(&active.handler)
            .map(|r| r.value().clone())
            .ok_or_else(|| FlowError::UnknownHandler(active.handler.clone()))?;

        let Value::Object(input) = user_input else {
            return Err(FlowError::NotAnObject);
        };
        let input = validate_input(&active.current.data_schema, input)?;
        Ok((flow, input))
    }

    /// The form currently shown by a flow
    pub fn get(&self, flow_id: &str) -> Option<FlowResult> {
        self.flows.get(flow_id).map(|f| f.current.clone())
    }

    pub fn abort(&self, flow_id: &str) -> Result<(), FlowError> {
        self.flows
            .remove(flow_id)
            .map(|_| info!("Aborted flow {}", flow_id))
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))
    }

    pub fn in_progress(&self) -> Vec<FlowInfo> {
        let mut flows: Vec<FlowInfo> = self
            .flows
            .iter()
            .map(|f| FlowInfo {
                flow_id: f.key().clone(),
                handler: f.handler.clone(),
                step_id: f.current.step_id.clone().unwrap_or_default(),
            })
            .collect();
        flows.sort_by(|a, b| a.flow_id.cmp(&b.flow_id));
        flows
    }

    async fn handle_step(
        &self,
        flow_id: &str,
        flow: &dyn ConfigFlow,
        step: FlowStep,
    ) -> Result<FlowResult, FlowError> {
        let handler = flow.domain();

        match step {
            FlowStep::Form {
                step_id,
                data_schema,
                errors,
            } => {
                let mut result = FlowResult::new(flow_id, handler, FlowResultType::Form);
                result.step_id = Some(step_id);
                result.data_schema = data_schema;
                result.errors = Some(errors);

                self.flows.insert(
                    flow_id.to_string(),
                    ActiveFlow {
                        handler: handler.to_string(),
                        current: result.clone(),
                    },
                );
                Ok(result)
            }
            FlowStep::CreateEntry { title, data } => {
                self.flows.remove(flow_id);

                let entry = ConfigEntry::new(handler, title.clone())
                    .with_data(data.clone())
                    .with_version(flow.version());
                let entry = self.config_entries.add(entry).await?;
                info!("Flow {} created entry {} ({})", flow_id, entry.title, entry.entry_id);

                if let Err(e) = self.config_entries.setup(&entry.entry_id).await {
                    warn!("Setup of new entry {} did not complete: {}", entry.entry_id, e);
                }

                let mut result = FlowResult::new(flow_id, handler, FlowResultType::CreateEntry);
                result.title = Some(title);
                result.version = Some(entry.version);
                result.result = Some(Value::Object(data.into_iter().collect()));
                result.entry_id = Some(entry.entry_id);
                Ok(result)
            }
            FlowStep::Abort { reason } => {
                self.flows.remove(flow_id);
                info!("Flow {} aborted: {}", flow_id, reason);

                let mut result = FlowResult::new(flow_id, handler, FlowResultType::Abort);
                result.reason = Some(reason);
                Ok(result)
            }
        }
    }
}

/// Check `input` against `schema`, filling in defaults for absent optional keys
fn validate_input(
    schema: &[FormField],
    mut input: Map<String, Value>,
) -> Result<Map<String, Value>, FlowError> {
    if let Some(extra) = input
        .keys()
        .find(|key| !schema.iter().any(|f| &f.name == *key))
    {
        return Err(FlowError::InvalidInput {
            field: extra.clone(),
            message: "extra keys not allowed".to_string(),
        });
    }

    for field in schema {
        match input.get(&field.name) {
            Some(value) if !field.field_type.accepts(value) => {
                return Err(FlowError::InvalidInput {
                    field: field.name.clone(),
                    message: field.field_type.expected().to_string(),
                });
            }
            Some(_) => {}
            None if field.required => {
                return Err(FlowError::InvalidInput {
                    field: field.name.clone(),
                    message: "required key not provided".to_string(),
                });
            }
            None => {
                if let Some(default) = &field.default {
                    input.insert(field.name.clone(), default.clone());
                }
            }
        }
    }

    Ok(input)
}
