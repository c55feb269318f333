//! Entities and the platform that writes their states

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use ha_core::{slugify, Context, EntityId, EntityIdError, State, STATE_UNAVAILABLE, STATE_UNKNOWN};
use ha_state_store::StateStore;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::entity_registry::EntityRegistry;

pub const ATTR_FRIENDLY_NAME: &str = "friendly_name";
pub const ATTR_ICON: &str = "icon";

#[derive(Debug, Error)]
pub enum EntityError {
    #[error(transparent)]
    InvalidEntityId(#[from] EntityIdError),

    #[error("Platform {platform} does not generate unique IDs. ID {unique_id} already exists")]
    DuplicateUniqueId { platform: String, unique_id: String },

    #[error("Entity with unique ID {0} was never added")]
    UnknownEntity(String),
}

/// The device an entity belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// `(domain, id)` pairs identifying the device
    pub identifiers: Vec<(String, String)>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Something with a state in the state store
pub trait Entity: Send + Sync {
    /// Stable identity across restarts
    fn unique_id(&self) -> String;

    fn name(&self) -> String;

    /// Current value; `None` is written as `unknown`
    fn state(&self) -> Option<String>;

    fn available(&self) -> bool {
        true
    }

    fn extra_state_attributes(&self) -> HashMap<String, Value> {
        HashMap::new()
    }

    fn icon(&self) -> Option<String> {
        None
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        None
    }
}

/// Entities of one domain (e.g. `sensor`) added by one integration entry
pub struct EntityPlatform {
    domain: String,
    platform: String,
    state_store: Arc<StateStore>,
    registry: Arc<EntityRegistry>,
    /// unique_id -> assigned entity_id
    entities: DashMap<String, EntityId>,
    /// device identifiers -> device
    devices: DashMap<Vec<(String, String)>, DeviceInfo>,
}

impl EntityPlatform {
    pub fn new(
        domain: impl Into<String>,
        platform: impl Into<String>,
        state_store: Arc<StateStore>,
        registry: Arc<EntityRegistry>,
    ) -> Self {
        Self {
            domain: domain.into(),
            platform: platform.into(),
            state_store,
            registry,
            entities: DashMap::new(),
            devices: DashMap::new(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Assign an entity_id and write the initial state
    ///
    /// An entity registered before keeps its id. Otherwise the id is
    /// `{domain}.{slugify(name)}`, suffixed `_2`, `_3`, ... when another
    /// entity already holds it.
    pub fn add_entity(&self, entity: &dyn Entity) -> Result<EntityId, EntityError> {
        let unique_id = entity.unique_id();
        if self.entities.contains_key(&unique_id) {
            return Err(EntityError::DuplicateUniqueId {
                platform: self.platform.clone(),
                unique_id,
            });
        }

        let entity_id = self.registry.get_or_create(
            &self.domain,
            &self.platform,
            &unique_id,
            &slugify(&entity.name()),
            |id| self.state_store.contains(&id.to_string()),
        )?;

        if let Some(device) = entity.device_info() {
            self.devices
                .entry(device.identifiers.clone())
                .or_insert(device);
        }

        info!(
            "Adding {} entity {} (unique_id {})",
            self.platform, entity_id, unique_id
        );
        self.entities.insert(unique_id, entity_id.clone());
        self.write_state(entity)?;
        Ok(entity_id)
    }

    /// Push the entity's current state to the state store
    pub fn write_state(&self, entity: &dyn Entity) -> Result<State, EntityError> {
        let unique_id = entity.unique_id();
        let entity_id = self
            .entity_id(&unique_id)
            .ok_or(EntityError::UnknownEntity(unique_id))?;

        let mut attributes = HashMap::new();
        let state = if entity.available() {
            attributes.extend(entity.extra_state_attributes());
            entity.state().unwrap_or_else(|| STATE_UNKNOWN.to_string())
        } else {
            STATE_UNAVAILABLE.to_string()
        };

        if let Some(icon) = entity.icon() {
            attributes.insert(ATTR_ICON.to_string(), Value::String(icon));
        }
        attributes.insert(ATTR_FRIENDLY_NAME.to_string(), Value::String(entity.name()));

        Ok(self
            .state_store
            .set(entity_id, state, attributes, Context::new()))
    }

    pub fn entity_id(&self, unique_id: &str) -> Option<EntityId> {
        self.entities.get(unique_id).map(|e| e.value().clone())
    }

    /// Assigned entity ids, sorted
    pub fn entity_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.entities.iter().map(|e| e.value().clone()).collect();
        ids.sort_by_key(|id| id.to_string());
        ids
    }

    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.devices.iter().map(|d| d.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Remove every entity's state; used on entry unload
    pub fn remove_all(&self) {
        let context = Context::new();
        for entity_id in self.entity_ids() {
            self.state_store.remove(&entity_id, context.clone());
        }
        debug!("Removed {} {} entities", self.entities.len(), self.platform);
        self.entities.clear();
        self.devices.clear();
    }
}
