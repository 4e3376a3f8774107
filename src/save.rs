use std::path::Path;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::sleep;

use crate::error::TransferError;
use crate::storage::{Storage, StorageError};
use crate::task::Task;

/// Hands staged files to a storage, making at most `retry_limit + 1` attempts.
#[derive(Debug, Clone, Copy)]
pub struct SaveRetrier {
    retry_limit: usize,
    retry_delay: Duration,
}

impl SaveRetrier {
    pub fn new(retry_limit: usize, retry_delay: Duration) -> Self {
        Self {
            retry_limit,
            retry_delay,
        }
    }

    pub async fn save_with_retry(
        &self,
        task: &Task,
        storage: &dyn Storage,
        staged_path: &Path,
    ) -> Result<(), TransferError> {
        let attempts = self.retry_limit + 1;
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            if task.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            let outcome = tokio::select! {
                biased;
                _ = task.cancel.cancelled() => return Err(TransferError::Cancelled),
                result = storage.save(&task.cancel, staged_path, &task.storage_path) => result,
            };
            match outcome {
                Ok(()) => {
                    debug!(
                        "saved {} to [{}]:{} on attempt {attempt}",
                        task.file_name(),
                        storage.name(),
                        task.storage_path
                    );
                    return Ok(());
                }
                Err(StorageError::Cancelled) => return Err(TransferError::Cancelled),
                Err(err) if attempt >= attempts => {
                    return Err(TransferError::Save {
                        attempts,
                        source: err,
                    });
                }
                Err(err) => {
                    warn!(
                        "Failed to save file (attempt {attempt}/{attempts}): {err}, retrying..."
                    );
                    if !self.retry_delay.is_zero() {
                        tokio::select! {
                            biased;
                            _ = task.cancel.cancelled() => return Err(TransferError::Cancelled),
                            _ = sleep(self.retry_delay) => {}
                        }
                    }
                }
            }
        }
    }
}
