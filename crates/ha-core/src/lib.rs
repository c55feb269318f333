//! Core types shared by the kakao_bus host crates
//!
//! Entity identifiers, entity states, events and the context that ties a
//! state write back to whatever caused it.

mod context;
mod entity_id;
mod event;
mod slug;
mod state;

pub use context::Context;
pub use entity_id::{EntityId, EntityIdError};
pub use event::{Event, EventData, EventOrigin, EventType};
pub use slug::slugify;
pub use state::State;

/// Maximum length for a state value; longer values are truncated on write
pub const MAX_STATE_LENGTH: usize = 255;

/// State of an entity whose data source could not provide a value
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// State of an entity that is available but has no value yet
pub const STATE_UNKNOWN: &str = "unknown";

/// Well-known event types
pub mod events {
    use super::*;

    /// Fired whenever an entity state is written or removed
    pub const STATE_CHANGED: &str = "state_changed";

    /// Fired once every configured entry has been set up
    pub const HOMEASSISTANT_START: &str = "homeassistant_start";

    /// Fired when the server begins shutting down
    pub const HOMEASSISTANT_STOP: &str = "homeassistant_stop";

    /// Data for STATE_CHANGED events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }
}
