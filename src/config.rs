use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";
pub const ENV_PREFIX: &str = "RELAYSAVE_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{0} must be greater than 0")]
    NotPositive(&'static str),
    #[error("duplicate storage name: {0}")]
    DuplicateStorage(String),
    #[error("no enabled storage configured")]
    NoStorage,
    #[error("invalid value {value:?} for {key}")]
    Env { key: String, value: String },
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Settings as written in `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_retry")]
    pub retry: usize,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub temp: TempConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default = "default_storages")]
    pub storages: Vec<StorageConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TempConfig {
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,
    /// Seconds a staged file is kept after its transfer; 0 deletes at once.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: StorageKind,
    pub base_path: PathBuf,
    #[serde(default = "default_enable")]
    pub enable: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Local,
}

fn default_workers() -> usize {
    3
}

fn default_retry() -> usize {
    3
}

fn default_threads() -> usize {
    4
}

fn default_base_path() -> PathBuf {
    PathBuf::from("cache/")
}

fn default_cache_ttl() -> i64 {
    3600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_enable() -> bool {
    true
}

fn default_storages() -> Vec<StorageConfig> {
    vec![StorageConfig {
        name: "local".to_string(),
        kind: StorageKind::Local,
        base_path: PathBuf::from("downloads/"),
        enable: true,
    }]
}

impl Default for TempConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            cache_ttl: default_cache_ttl(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            retry: default_retry(),
            threads: default_threads(),
            retry_delay_ms: 0,
            temp: TempConfig::default(),
            log: LogConfig::default(),
            storages: default_storages(),
        }
    }
}

impl Settings {
    pub fn from_toml(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw, path)
    }

    /// Loads `path` when given, otherwise `config.toml` if it exists, otherwise defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.exists() {
                    Self::load(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Applies `RELAYSAVE_*` overrides on top of file values.
    ///
    /// Unknown keys are ignored; values that fail to parse are errors.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "WORKERS" => self.workers = parse_env(&key, &value)?,
                "RETRY" => self.retry = parse_env(&key, &value)?,
                "THREADS" => self.threads = parse_env(&key, &value)?,
                "RETRY_DELAY_MS" => self.retry_delay_ms = parse_env(&key, &value)?,
                "TEMP_BASE_PATH" => self.temp.base_path = PathBuf::from(value),
                "TEMP_CACHE_TTL" => self.temp.cache_ttl = parse_env(&key, &value)?,
                "LOG_LEVEL" => self.log.level = value,
                _ => {}
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NotPositive("workers"));
        }
        if self.retry == 0 {
            return Err(ConfigError::NotPositive("retry"));
        }
        if self.threads == 0 {
            return Err(ConfigError::NotPositive("threads"));
        }

        let mut names = HashSet::new();
        for storage in &self.storages {
            if !names.insert(storage.name.as_str()) {
                return Err(ConfigError::DuplicateStorage(storage.name.clone()));
            }
        }
        if !self.storages.iter().any(|storage| storage.enable) {
            return Err(ConfigError::NoStorage);
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            workers: self.workers,
            retry_limit: self.retry,
            max_threads: self.threads,
            cache_base_path: self.temp.base_path.clone(),
            cache_ttl_secs: self.temp.cache_ttl,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

/// Tunables handed to the transfer pipeline at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub workers: usize,
    pub retry_limit: usize,
    pub max_threads: usize,
    pub cache_base_path: PathBuf,
    pub cache_ttl_secs: i64,
    pub retry_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Settings::default().pipeline_config()
    }
}
