//! Helpers shared by integrations
//!
//! - [`DataUpdateCoordinator`] fetches and caches data for one source and
//!   pushes every refresh to its listeners
//! - [`IntervalTrigger`] refreshes a coordinator on a fixed period
//! - [`Entity`] / [`EntityPlatform`] turn integration objects into states
//! - [`EntityRegistry`] keeps entity ids stable across restarts

pub mod entity;
pub mod entity_registry;
pub mod interval;
pub mod update_coordinator;

pub use entity::{DeviceInfo, Entity, EntityError, EntityPlatform, ATTR_FRIENDLY_NAME, ATTR_ICON};
pub use entity_registry::{EntityRegistry, RegistryEntry};
pub use interval::IntervalTrigger;
pub use update_coordinator::{
    DataFetcher, DataUpdateCoordinator, Listener, ListenerId, UpdateFailed,
};
