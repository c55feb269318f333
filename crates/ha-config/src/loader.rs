//! YAML loading with `!secret` and `!env_var` tags
//!
//! - `!secret key` - value of `key` in secrets.yaml
//! - `!env_var VAR` or `!env_var VAR default` - environment variable

use crate::error::{ConfigError, ConfigResult};
use crate::secrets::Secrets;
use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

pub struct YamlLoader {
    config_dir: PathBuf,
    secrets: Secrets,
}

impl YamlLoader {
    /// Loader for `config_dir`, reading its secrets.yaml
    pub fn new(config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let config_dir = config_dir.into();
        let secrets = Secrets::load(&config_dir)?;
        Ok(Self {
            config_dir,
            secrets,
        })
    }

    pub fn with_secrets(config_dir: impl Into<PathBuf>, secrets: Secrets) -> Self {
        Self {
            config_dir: config_dir.into(),
            secrets,
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Load a file relative to the config dir
    ///
    /// A missing file or an empty document yields an empty mapping.
    pub fn load_file(&self, file: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.config_dir.join(file);
        if !path.exists() {
            debug!("{:?} not found, using defaults", path);
            return Ok(Value::Mapping(Mapping::new()));
        }

        debug!("Loading YAML file: {:?}", path);
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
            path: path.clone(),
            source,
        })?;
        self.load_string(&content, &path)
    }

    pub fn load_string(&self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Value = serde_yaml::from_str(content).map_err(|source| ConfigError::ParseYaml {
            path: source_path.to_path_buf(),
            source,
        })?;

        match value {
            Value::Null => Ok(Value::Mapping(Mapping::new())),
            value => self.resolve(value),
        }
    }

    fn resolve(&self, value: Value) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.resolve_tagged(*tagged),
            Value::Mapping(map) => {
                let mut resolved = Mapping::new();
                for (k, v) in map {
                    resolved.insert(k, self.resolve(v)?);
                }
                Ok(Value::Mapping(resolved))
            }
            Value::Sequence(seq) => Ok(Value::Sequence(
                seq.into_iter()
                    .map(|v| self.resolve(v))
                    .collect::<ConfigResult<Vec<_>>>()?,
            )),
            other => Ok(other),
        }
    }

    fn resolve_tagged(&self, tagged: TaggedValue) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!("Resolving tag '{}'", tag);

        match tag.as_str() {
            "!secret" => {
                let key = tag_argument(&tag, &tagged.value)?;
                Ok(self.secrets.get(&key)?.clone())
            }
            "!env_var" => {
                let arg = tag_argument(&tag, &tagged.value)?;
                let (var, default) = match arg.split_once(char::is_whitespace) {
                    Some((var, default)) => (var.to_string(), Some(default.trim().to_string())),
                    None => (arg, None),
                };
                match (std::env::var(&var), default) {
                    (Ok(value), _) => Ok(Value::String(value)),
                    (Err(_), Some(default)) => Ok(Value::String(default)),
                    (Err(_), None) => Err(ConfigError::EnvVarNotFound { var }),
                }
            }
            _ => Ok(Value::Tagged(Box::new(TaggedValue {
                tag: tagged.tag,
                value: self.resolve(tagged.value)?,
            }))),
        }
    }
}

fn tag_argument(tag: &str, value: &Value) -> ConfigResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ConfigError::InvalidValue {
            key: tag.to_string(),
            reason: "expected a string argument".to_string(),
        })
}

/// Load `file` from `config_dir` with tag processing
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(config_dir)?.load_file(file)
}
