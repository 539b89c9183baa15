//! Host settings: YAML file, `AGENTICIDE_*` environment overrides, defaults

use parking_lot::RwLock;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, RuntimeError};

pub const ENV_PREFIX: &str = "AGENTICIDE";
pub const CONFIG_DIR_NAME: &str = ".agenticide";
pub const CONFIG_FILE_NAME: &str = "config.yaml";

pub const KEY_LOG_LEVEL: &str = "log_level";
pub const KEY_STORAGE_PATH: &str = "storage_path";
pub const KEY_EXTENSIONS_ENABLED: &str = "extensions_enabled";
pub const KEY_ULTRALOOP_MAX_RETRIES: &str = "ultraloop_max_retries";
pub const KEY_ULTRATHINK_TIMEOUT: &str = "ultrathink_timeout";
pub const KEY_HOOK_TIMEOUT: &str = "hook_timeout";
pub const KEY_COMMAND_TIMEOUT: &str = "command_timeout";

const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Key/value settings with layered lookup.
///
/// Precedence, highest first: environment, runtime `set`, config file,
/// defaults. Missing keys read as the zero value of the requested type.
#[derive(Debug)]
pub struct Settings {
    path: Option<PathBuf>,
    defaults: Mapping,
    file: Mapping,
    overrides: RwLock<Mapping>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            path: None,
            defaults: default_values(),
            file: Mapping::new(),
            overrides: RwLock::new(Mapping::new()),
        }
    }
}

fn default_values() -> Mapping {
    let mut defaults = Mapping::new();
    let storage_path = std::env::temp_dir().join("agenticide.db");

    defaults.insert(KEY_LOG_LEVEL.into(), "info".into());
    defaults.insert(
        KEY_STORAGE_PATH.into(),
        storage_path.to_string_lossy().into_owned().into(),
    );
    defaults.insert(KEY_EXTENSIONS_ENABLED.into(), Value::Sequence(Vec::new()));
    defaults.insert(KEY_ULTRALOOP_MAX_RETRIES.into(), 10.into());
    defaults.insert(KEY_ULTRATHINK_TIMEOUT.into(), "5m".into());
    defaults.insert(KEY_HOOK_TIMEOUT.into(), "30s".into());
    defaults.insert(KEY_COMMAND_TIMEOUT.into(), "5m".into());
    defaults
}

impl Settings {
    /// Loads settings from `path`, or from `~/.agenticide/config.yaml` when
    /// no path is given.
    ///
    /// An explicit path must exist. The default file is optional; its
    /// directory is created on first use.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (default_config_path()?, false),
        };

        if !path.exists() {
            if required {
                return Err(RuntimeError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self {
                path: Some(path),
                ..Self::default()
            });
        }

        let content = std::fs::read_to_string(&path)?;
        let mut settings = Self::from_yaml_str(&content)?;
        settings.path = Some(path);
        Ok(settings)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let file = match serde_yaml::from_str::<Value>(content)
            .map_err(|e| RuntimeError::Config(format!("invalid config: {}", e)))?
        {
            Value::Mapping(mapping) => mapping,
            Value::Null => Mapping::new(),
            _ => {
                return Err(RuntimeError::Config(
                    "config root must be a mapping".to_string(),
                ))
            }
        };

        Ok(Self {
            file,
            ..Self::default()
        })
    }

    /// File the settings were loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.overrides
            .write()
            .insert(Value::String(key.into()), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lookup(key)
    }

    pub fn get_string(&self, key: &str) -> String {
        match self.lookup(key) {
            Some(Value::String(value)) => value,
            Some(Value::Number(value)) => value.to_string(),
            Some(Value::Bool(value)) => value.to_string(),
            _ => String::new(),
        }
    }

    pub fn get_int(&self, key: &str) -> i64 {
        match self.lookup(key) {
            Some(Value::Number(value)) => value
                .as_i64()
                .or_else(|| value.as_f64().map(|f| f as i64))
                .unwrap_or(0),
            Some(Value::String(value)) => value.trim().parse().unwrap_or(0),
            Some(Value::Bool(value)) => i64::from(value),
            _ => 0,
        }
    }

    pub fn get_bool(&self, key: &str) -> bool {
        match self.lookup(key) {
            Some(Value::Bool(value)) => value,
            Some(Value::String(value)) => {
                matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
            }
            Some(Value::Number(value)) => value.as_i64().is_some_and(|n| n != 0),
            _ => false,
        }
    }

    /// Sequences as-is; strings split on commas or whitespace.
    pub fn get_string_list(&self, key: &str) -> Vec<String> {
        match self.lookup(key) {
            Some(Value::Sequence(items)) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(value) => Some(value),
                    Value::Number(value) => Some(value.to_string()),
                    _ => None,
                })
                .collect(),
            Some(Value::String(value)) => value
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Parses `250ms`, `30s`, `5m`, `1h`, or a bare number of seconds.
    pub fn get_duration(&self, key: &str) -> Result<Option<Duration>> {
        let raw = match self.lookup(key) {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Number(value)) => {
                return value
                    .as_u64()
                    .map(|secs| Some(Duration::from_secs(secs)))
                    .ok_or_else(|| invalid_duration(key, &value.to_string()));
            }
            Some(Value::String(value)) => value,
            Some(other) => return Err(invalid_duration(key, &format!("{:?}", other))),
        };

        parse_duration(&raw)
            .map(Some)
            .ok_or_else(|| invalid_duration(key, &raw))
    }

    pub fn log_level(&self) -> String {
        self.get_string(KEY_LOG_LEVEL)
    }

    pub fn storage_path(&self) -> PathBuf {
        PathBuf::from(self.get_string(KEY_STORAGE_PATH))
    }

    pub fn extensions_enabled(&self) -> Vec<String> {
        self.get_string_list(KEY_EXTENSIONS_ENABLED)
    }

    pub fn hook_timeout(&self) -> Result<Duration> {
        Ok(self
            .get_duration(KEY_HOOK_TIMEOUT)?
            .unwrap_or(DEFAULT_HOOK_TIMEOUT))
    }

    pub fn command_timeout(&self) -> Result<Duration> {
        Ok(self
            .get_duration(KEY_COMMAND_TIMEOUT)?
            .unwrap_or(DEFAULT_COMMAND_TIMEOUT))
    }

    fn lookup(&self, key: &str) -> Option<Value> {
        if let Ok(value) = std::env::var(env_key(key)) {
            return Some(Value::String(value));
        }

        let key_value = Value::String(key.to_string());
        if let Some(value) = self.overrides.read().get(&key_value) {
            return Some(value.clone());
        }

        self.file
            .get(&key_value)
            .or_else(|| self.defaults.get(&key_value))
            .cloned()
    }
}

/// `log_level` -> `AGENTICIDE_LOG_LEVEL`
pub fn env_key(key: &str) -> String {
    format!("{}_{}", ENV_PREFIX, key.replace('.', "_").to_ascii_uppercase())
}

fn default_config_path() -> Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .ok_or_else(|| RuntimeError::Config("cannot determine home directory".to_string()))?;

    let config_dir = home.join(CONFIG_DIR_NAME);
    std::fs::create_dir_all(&config_dir).map_err(|e| {
        RuntimeError::Config(format!(
            "create config dir {}: {}",
            config_dir.display(),
            e
        ))
    })?;

    Ok(config_dir.join(CONFIG_FILE_NAME))
}

fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw).ok()
}

fn invalid_duration(key: &str, raw: &str) -> RuntimeError {
    RuntimeError::Config(format!("invalid duration for {}: {}", key, raw))
}
