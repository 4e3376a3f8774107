use std::io;

use thiserror::Error;

use crate::source::SourceError;
use crate::storage::StorageError;

/// Terminal outcome of a failed transfer, surfaced to whoever submitted it.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("failed to download file: {0}")]
    Remote(#[from] SourceError),
    #[error("staging file error: {0}")]
    Staging(#[from] io::Error),
    #[error("failed to save file after {attempts} attempt(s): {source}")]
    Save {
        attempts: usize,
        #[source]
        source: StorageError,
    },
    #[error("storage {0:?} is not configured")]
    UnknownStorage(String),
    #[error("task cancelled")]
    Cancelled,
    #[error("download worker failed: {0}")]
    Worker(String),
}

impl TransferError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }
}
