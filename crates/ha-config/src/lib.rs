//! Loading of `configuration.yaml`
//!
//! ```yaml
//! http:
//!   server_host: 0.0.0.0
//!   server_port: 8123
//! logger:
//!   default: info
//! kakao_bus:
//!   - bus_stop_id: "11111"
//!     bus_stop_name: !secret home_stop_name
//! ```
//!
//! `!secret` values come from `secrets.yaml` next to the configuration;
//! `!env_var NAME [default]` reads the environment.

mod config;
mod error;
mod loader;
mod secrets;

pub use config::{Config, HttpConfig, LoggerConfig, CONFIG_FILE};
pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, YamlLoader};
pub use secrets::Secrets;

pub use serde_yaml::Value;
