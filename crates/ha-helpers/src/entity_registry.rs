//! Persistent `unique_id` -> `entity_id` assignments
//!
//! An entity keeps the id it was first given, whatever order entries are set
//! up in after a restart.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ha_config_entries::{Storable, Storage, StorageResult};
use ha_core::{EntityId, EntityIdError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const STORAGE_KEY: &str = "core.entity_registry";
pub const STORAGE_VERSION: u32 = 1;
pub const STORAGE_MINOR_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub entity_id: String,
    pub platform: String,
    pub unique_id: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct EntityRegistryData {
    entities: Vec<RegistryEntry>,
}

impl Storable for EntityRegistryData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

type RegistryKey = (String, String);

pub struct EntityRegistry {
    storage: Arc<Storage>,
    /// (platform, unique_id) -> entity_id
    entities: DashMap<RegistryKey, EntityId>,
    /// entity_id -> owner
    claimed: DashMap<String, RegistryKey>,
}

impl EntityRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            entities: DashMap::new(),
            claimed: DashMap::new(),
        }
    }

    /// Load persisted assignments
    pub async fn load(&self) -> StorageResult<()> {
        let Some(data) = self.storage.load::<EntityRegistryData>().await? else {
            return Ok(());
        };
        info!("Loading {} registered entities", data.entities.len());
        for entry in data.entities {
            let Ok(entity_id) = entry.entity_id.parse::<EntityId>() else {
                debug!("Skipping malformed registry entry {}", entry.entity_id);
                continue;
            };
            let key = (entry.platform, entry.unique_id);
            self.claimed.insert(entry.entity_id, key.clone());
            self.entities.insert(key, entity_id);
        }
        Ok(())
    }

    pub async fn save(&self) -> StorageResult<()> {
        let data = EntityRegistryData {
            entities: self.entries(),
        };
        self.storage.save(&data).await?;
        debug!("Saved {} registered entities", data.entities.len());
        Ok(())
    }

    /// The id registered for `unique_id`, assigning one on first sight
    ///
    /// A new id is `{domain}.{object_id}`, suffixed `_2`, `_3`, ... past ids
    /// already registered or for which `in_use` holds.
    pub fn get_or_create(
        &self,
        domain: &str,
        platform: &str,
        unique_id: &str,
        object_id: &str,
        in_use: impl Fn(&EntityId) -> bool,
    ) -> Result<EntityId, EntityIdError> {
        let key = (platform.to_string(), unique_id.to_string());
        if let Some(entity_id) = self.entities.get(&key) {
            return Ok(entity_id.value().clone());
        }

        let base = EntityId::new(domain, object_id)?;
        let mut candidate = base.clone();
        let mut n = 2;
        loop {
            if !in_use(&candidate) {
                if let Entry::Vacant(slot) = self.claimed.entry(candidate.to_string()) {
                    slot.insert(key.clone());
                    break;
                }
            }
            candidate = base.with_suffix(n);
            n += 1;
        }

        debug!("Registered {} for {} {}", candidate, platform, unique_id);
        self.entities.insert(key, candidate.clone());
        Ok(candidate)
    }

    pub fn entity_id(&self, platform: &str, unique_id: &str) -> Option<EntityId> {
        self.entities
            .get(&(platform.to_string(), unique_id.to_string()))
            .map(|e| e.value().clone())
    }

    /// Registered entities, sorted by entity_id
    pub fn entries(&self) -> Vec<RegistryEntry> {
        let mut entries: Vec<RegistryEntry> = self
            .entities
            .iter()
            .map(|e| RegistryEntry {
                entity_id: e.value().to_string(),
                platform: e.key().0.clone(),
                unique_id: e.key().1.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        entries
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
