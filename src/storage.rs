use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use thiserror::Error;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::config::{StorageConfig, StorageKind};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid destination path {0:?}")]
    InvalidPath(String),
    #[error("save interrupted by cancellation")]
    Cancelled,
}

/// Destination that durably persists a staged file.
///
/// `save` may be called again after a failure with the same arguments.
#[async_trait]
pub trait Storage: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> StorageKind;

    async fn save(
        &self,
        cancel: &CancellationToken,
        local_path: &Path,
        storage_path: &str,
    ) -> Result<(), StorageError>;
}

/// Copies files below a base directory on the local disk.
pub struct LocalStorage {
    name: String,
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(name: impl Into<String>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            base_path: base_path.into(),
        }
    }

    fn resolve(&self, storage_path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(storage_path);
        let mut resolved = self.base_path.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return Err(StorageError::InvalidPath(storage_path.to_string())),
            }
        }
        if resolved == self.base_path {
            return Err(StorageError::InvalidPath(storage_path.to_string()));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Local
    }

    async fn save(
        &self,
        cancel: &CancellationToken,
        local_path: &Path,
        storage_path: &str,
    ) -> Result<(), StorageError> {
        let destination = self.resolve(storage_path)?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StorageError::Cancelled),
            copied = fs::copy(local_path, &destination) => {
                let bytes = copied?;
                debug!("[{}] stored {bytes} bytes at {:?}", self.name, destination);
                Ok(())
            }
        }
    }
}

/// Storages addressable by their configured name.
#[derive(Clone, Default)]
pub struct StorageRegistry {
    storages: HashMap<String, Arc<dyn Storage>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_configs(configs: &[StorageConfig]) -> Self {
        let mut registry = Self::new();
        for config in configs.iter().filter(|config| config.enable) {
            let storage: Arc<dyn Storage> = match config.kind {
                StorageKind::Local => {
                    Arc::new(LocalStorage::new(&config.name, &config.base_path))
                }
            };
            registry.insert(storage);
        }
        registry
    }

    pub fn insert(&mut self, storage: Arc<dyn Storage>) {
        self.storages.insert(storage.name().to_string(), storage);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Storage>> {
        self.storages.get(name).cloned()
    }
}
