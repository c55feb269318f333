//! Typed view of configuration.yaml
//!
//! `http:` and `logger:` are read here; every other top-level key is an
//! integration section handed to that integration untouched.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::load_yaml;

pub const CONFIG_FILE: &str = "configuration.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    #[serde(default = "default_server_host")]
    pub server_host: String,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8123
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            server_host: default_server_host(),
            server_port: default_server_port(),
        }
    }
}

impl HttpConfig {
    /// `host:port` to bind
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggerConfig {
    /// Level for everything not listed in `logs`
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target levels, e.g. `ha_kakao_bus: debug`
    #[serde(default)]
    pub logs: BTreeMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            logs: BTreeMap::new(),
        }
    }
}

impl LoggerConfig {
    /// Filter directives in `tracing_subscriber::EnvFilter` syntax
    pub fn filter_directives(&self) -> ConfigResult<String> {
        let mut directives = vec![tracing_level("logger.default", &self.default)?.to_string()];
        for (target, level) in &self.logs {
            let level = tracing_level(&format!("logger.logs.{}", target), level)?;
            directives.push(format!("{}={}", target, level));
        }
        Ok(directives.join(","))
    }
}

/// Map a logging level name (Python-style names accepted) to a tracing level
fn tracing_level(key: &str, level: &str) -> ConfigResult<&'static str> {
    match level.to_ascii_lowercase().as_str() {
        "critical" | "fatal" | "error" => Ok("error"),
        "warning" | "warn" => Ok("warn"),
        "info" => Ok("info"),
        "debug" => Ok("debug"),
        "notset" | "trace" => Ok("trace"),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("unknown log level '{}'", other),
        }),
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub http: HttpConfig,
    pub logger: LoggerConfig,
    /// Remaining top-level sections by domain
    pub integrations: BTreeMap<String, Value>,
}

impl Config {
    /// Load `configuration.yaml` from `config_dir`; a missing file gives defaults
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let yaml = load_yaml(config_dir.as_ref(), CONFIG_FILE)?;
        Self::from_yaml(&yaml)
    }

    pub fn from_yaml(yaml: &Value) -> ConfigResult<Self> {
        let mapping = yaml.as_mapping().ok_or_else(|| ConfigError::InvalidValue {
            key: "root".to_string(),
            reason: "configuration must be a mapping".to_string(),
        })?;

        let mut config = Config::default();
        for (key, value) in mapping {
            let key = key.as_str().ok_or_else(|| ConfigError::InvalidValue {
                key: format!("{:?}", key),
                reason: "top-level keys must be strings".to_string(),
            })?;

            match key {
                "http" => config.http = section(key, value)?,
                "logger" => config.logger = section(key, value)?,
                domain => {
                    config.integrations.insert(domain.to_string(), value.clone());
                }
            }
        }

        config.logger.filter_directives()?;
        Ok(config)
    }

    /// Raw section for an integration domain
    pub fn integration(&self, domain: &str) -> Option<&Value> {
        self.integrations.get(domain)
    }
}

/// Deserialize a section; `key:` with no value means defaults
fn section<T: Default + serde::de::DeserializeOwned>(key: &str, value: &Value) -> ConfigResult<T> {
    if value.is_null() {
        return Ok(T::default());
    }
    serde_yaml::from_value(value.clone()).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
