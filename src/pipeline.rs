use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};

use crate::config::PipelineConfig;
use crate::download::Downloader;
use crate::error::TransferError;
use crate::naming::fix_extension;
use crate::policy::ParallelismPolicy;
use crate::progress::{ProgressReporter, ProgressSink};
use crate::reclaim::StagingGuard;
use crate::save::SaveRetrier;
use crate::source::RemoteSource;
use crate::storage::StorageRegistry;
use crate::task::Task;

/// Runs single transfers end to end: download, name fix-up, save, cleanup.
pub struct TransferPipeline {
    config: PipelineConfig,
    policy: ParallelismPolicy,
    downloader: Downloader,
    retrier: SaveRetrier,
    storages: StorageRegistry,
    sink: Arc<dyn ProgressSink>,
}

impl TransferPipeline {
    pub fn new(
        config: PipelineConfig,
        source: Arc<dyn RemoteSource>,
        storages: StorageRegistry,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            policy: ParallelismPolicy::new(config.max_threads),
            downloader: Downloader::new(source),
            retrier: SaveRetrier::new(config.retry_limit, config.retry_delay),
            config,
            storages,
            sink,
        }
    }

    pub fn with_downloader(mut self, downloader: Downloader) -> Self {
        self.downloader = downloader;
        self
    }

    /// Moves `task.file` into its destination storage.
    ///
    /// The staging file is reclaimed on every exit path, including
    /// cancellation and errors raised before the download starts writing.
    pub async fn process(&self, task: &mut Task) -> Result<(), TransferError> {
        let storage = self
            .storages
            .get(&task.storage_name)
            .ok_or_else(|| TransferError::UnknownStorage(task.storage_name.clone()))?;
        if task.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        if task.start_time.is_none() {
            task.start_time = Some(Instant::now());
        }

        let cache_base = self.config.cache_base_path.as_path();
        let _guard = StagingGuard::new(task.staging_path(cache_base), self.config.cache_ttl_secs);

        let update_count = self.policy.update_cadence_for(task.file.size);
        let callback = ProgressReporter::new(task, update_count, self.sink.clone()).into_callback();
        let staged_path = self
            .downloader
            .download(task, &self.policy, cache_base, Some(callback))
            .await?;

        fix_extension(task, &staged_path);

        match self
            .retrier
            .save_with_retry(task, storage.as_ref(), &staged_path)
            .await
        {
            Ok(()) => {
                info!("Saved {task}");
                Ok(())
            }
            Err(err) => {
                warn!("Giving up on {task}: {err}");
                Err(err)
            }
        }
    }
}
