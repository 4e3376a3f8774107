use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, error, warn};
use tokio::runtime::Handle;
use tokio::time::sleep;

/// Removes a staged file now (`ttl_secs <= 0`) or after `ttl_secs` seconds.
///
/// Delayed removal is spawned on the current runtime and never blocks the
/// caller. If the runtime shuts down before the delay elapses the file is
/// removed during shutdown. Failures are logged only.
pub fn reclaim(path: &Path, ttl_secs: i64) {
    if ttl_secs > 0 {
        match Handle::try_current() {
            Ok(handle) => {
                let path = path.to_path_buf();
                let delay = Duration::from_secs(ttl_secs as u64);
                debug!("scheduling removal of {:?} in {:?}", path, delay);
                let pending = PendingRemoval(path);
                handle.spawn(async move {
                    sleep(delay).await;
                    drop(pending);
                });
            }
            Err(_) => {
                warn!("no runtime to schedule removal of {:?}; removing now", path);
                remove_staged(path);
            }
        }
    } else {
        remove_staged(path);
    }
}

fn remove_staged(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("removed staged file {:?}", path),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => error!("Failed to purge file {:?}: {err}", path),
    }
}

/// Removes its path when dropped, whether the timer finished or the task was
/// torn down with its runtime.
struct PendingRemoval(PathBuf);

impl Drop for PendingRemoval {
    fn drop(&mut self) {
        remove_staged(&self.0);
    }
}

/// Reclaims its staging path exactly once when dropped.
pub struct StagingGuard {
    path: PathBuf,
    ttl_secs: i64,
}

impl StagingGuard {
    pub fn new(path: PathBuf, ttl_secs: i64) -> Self {
        Self { path, ttl_secs }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        reclaim(&self.path, self.ttl_secs);
    }
}
