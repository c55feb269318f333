//! Config Entries
//!
//! Config entries represent individual integration instances (for example
//! one monitored bus stop) and manage their lifecycle (setup, unload,
//! reload).
//!
//! # Key Types
//!
//! - [`ConfigEntry`] - A single integration configuration
//! - [`ConfigEntryState`] - Lifecycle state of an entry
//! - [`ConfigEntries`] - Manager for all config entries
//! - [`Integration`] - Implemented by integrations to set entries up
//! - [`FlowManager`] / [`ConfigFlow`] - UI flows that create entries
//!
//! # Storage
//!
//! Config entries are persisted in `.storage/core.config_entries` with
//! version tracking.

pub mod entry;
pub mod flow;
pub mod integration;
pub mod manager;
pub mod state_machine;
pub mod storage;

pub use entry::{ConfigEntry, ConfigEntrySource, ConfigEntryState};
pub use flow::{
    ConfigFlow, FieldType, FlowError, FlowInfo, FlowManager, FlowResult, FlowResultType, FlowStep,
    FormField,
};
pub use integration::{Integration, SetupError};
pub use manager::{
    ConfigEntries, ConfigEntriesData, ConfigEntriesError, ConfigEntriesResult, STORAGE_KEY,
    STORAGE_MINOR_VERSION, STORAGE_VERSION,
};
pub use state_machine::{calculate_retry_delay, InvalidTransition};
pub use storage::{Storable, Storage, StorageError, StorageResult};
