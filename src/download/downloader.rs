use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use log::{debug, info};
use tokio::fs as async_fs;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::download::parts::{split_parts, Part, PartQueue, PartStats};
use crate::error::TransferError;
use crate::policy::ParallelismPolicy;
use crate::source::{RemoteSource, SourceError};
use crate::staging::{ProgressCallback, StagingFile};
use crate::task::Task;
use crate::util::format_bytes;

/// Bytes requested from the source per call.
pub const PART_SIZE: u64 = 1024 * 1024;

/// Pulls a remote object into its staging file.
pub struct Downloader {
    source: Arc<dyn RemoteSource>,
    part_size: u64,
}

impl Downloader {
    pub fn new(source: Arc<dyn RemoteSource>) -> Self {
        Self {
            source,
            part_size: PART_SIZE,
        }
    }

    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    /// Downloads `task.file` to its staging path below `cache_base` and
    /// returns that path. On error a partial file may remain; reclaiming it
    /// is up to the caller.
    pub async fn download(
        &self,
        task: &Task,
        policy: &ParallelismPolicy,
        cache_base: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<PathBuf, TransferError> {
        async_fs::create_dir_all(cache_base).await?;
        let path = task.staging_path(cache_base);
        let size = task.file.size;
        let staged = Arc::new(StagingFile::open(&path, size, progress)?);

        let started = Instant::now();
        if size == 0 || !task.file.supports_ranges {
            debug!("{task}: streaming in a single request");
            self.download_streamed(task, &staged).await?;
        } else if size <= self.part_size {
            let part = Part {
                id: 0,
                offset: 0,
                len: size,
            };
            fetch_part(self.source.as_ref(), &task.file.location, part, &staged, &task.cancel)
                .await?;
        } else {
            let threads = policy.threads_for(size);
            info!(
                "Downloading {task} ({}) with {threads} thread(s)",
                format_bytes(size)
            );
            self.download_parallel(task, staged.clone(), threads).await?;
        }

        let written = staged.written();
        if let Ok(staged) = Arc::try_unwrap(staged) {
            staged.close()?;
        }
        info!(
            "Downloaded {} to {:?} in {:?}",
            format_bytes(written),
            path,
            started.elapsed()
        );
        Ok(path)
    }

    async fn download_parallel(
        &self,
        task: &Task,
        staged: Arc<StagingFile>,
        threads: usize,
    ) -> Result<(), TransferError> {
        let parts = split_parts(task.file.size, self.part_size);
        let workers = threads.min(parts.len()).max(1);
        let queue = Arc::new(PartQueue::new(parts));

        let mut join_set: JoinSet<Result<(), TransferError>> = JoinSet::new();
        for _ in 0..workers {
            let source = self.source.clone();
            let location = task.file.location.clone();
            let queue = queue.clone();
            let staged = staged.clone();
            let cancel = task.cancel.clone();
            join_set.spawn(async move {
                while let Some(part) = queue.next_part().await {
                    let stats =
                        fetch_part(source.as_ref(), &location, part, &staged, &cancel).await?;
                    debug!(
                        "part {} completed: {} in {:?} ({:.0} B/s)",
                        stats.id,
                        format_bytes(stats.bytes),
                        stats.duration,
                        stats.throughput()
                    );
                }
                Ok(())
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let failure = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(join_err) => TransferError::Worker(join_err.to_string()),
            };
            debug!(
                "{task}: aborting download with {} part(s) pending: {failure}",
                queue.remaining().await
            );
            join_set.abort_all();
            while join_set.join_next().await.is_some() {}
            return Err(failure);
        }
        Ok(())
    }

    /// Reads the object front to back in one pass. A declared size bounds
    /// the write and must be reached.
    async fn download_streamed(
        &self,
        task: &Task,
        staged: &StagingFile,
    ) -> Result<(), TransferError> {
        let size = task.file.size;
        let mut stream = self
            .source
            .stream_from_start(&task.file.location, self.part_size as usize);
        let mut offset = 0u64;
        loop {
            let next = tokio::select! {
                biased;
                _ = task.cancel.cancelled() => return Err(TransferError::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let mut data = chunk?;
            if size > 0 {
                data.truncate(size.saturating_sub(offset) as usize);
            }
            if !data.is_empty() {
                staged.write_at(&data, offset)?;
                offset += data.len() as u64;
            }
            if size > 0 && offset >= size {
                break;
            }
        }
        if size > 0 && offset < size {
            return Err(SourceError::UnexpectedEof { offset }.into());
        }
        Ok(())
    }
}

/// Fills `part` completely, continuing after short reads.
async fn fetch_part(
    source: &dyn RemoteSource,
    location: &str,
    part: Part,
    staged: &StagingFile,
    cancel: &CancellationToken,
) -> Result<PartStats, TransferError> {
    let started = Instant::now();
    let mut filled = 0u64;
    while filled < part.len {
        let offset = part.offset + filled;
        let limit = (part.end() - offset) as usize;
        let mut data = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            fetched = source.fetch_chunk(location, offset, limit) => fetched?,
        };
        if data.is_empty() {
            return Err(SourceError::UnexpectedEof { offset }.into());
        }
        data.truncate(limit);
        staged.write_at(&data, offset)?;
        filled += data.len() as u64;
    }
    Ok(PartStats {
        id: part.id,
        bytes: filled,
        duration: started.elapsed(),
    })
}
