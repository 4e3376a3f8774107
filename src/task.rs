use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::util::sanitize_file_name;

/// Describes the object to fetch from a remote source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub location: String,
    pub size: u64,
    pub name: String,
    /// Whether the remote serves byte ranges, allowing parallel parts.
    pub supports_ranges: bool,
}

/// One request to move a remote file into a destination storage.
#[derive(Debug, Clone)]
pub struct Task {
    pub cancel: CancellationToken,
    pub file: RemoteFile,
    pub storage_name: String,
    pub storage_path: String,
    pub reply_chat_id: i64,
    pub reply_message_id: i64,
    pub start_time: Option<Instant>,
}

impl Task {
    pub fn new(
        file: RemoteFile,
        storage_name: impl Into<String>,
        storage_path: impl Into<String>,
        reply_chat_id: i64,
        reply_message_id: i64,
    ) -> Self {
        Self {
            cancel: CancellationToken::new(),
            file,
            storage_name: storage_name.into(),
            storage_path: storage_path.into(),
            reply_chat_id,
            reply_message_id,
            start_time: None,
        }
    }

    /// Ties this task's cancellation to `parent`.
    pub fn with_parent(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// Stable identifier used for cancellation lookups.
    pub fn key(&self) -> String {
        format!("{}:{}", self.reply_chat_id, self.reply_message_id)
    }

    pub fn file_name(&self) -> &str {
        &self.file.name
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Staging location inside `cache_base`, unique per reply target.
    pub fn staging_path(&self, cache_base: &Path) -> PathBuf {
        cache_base.join(format!(
            "{}-{}-{}",
            self.reply_chat_id,
            self.reply_message_id,
            sanitize_file_name(&self.file.name)
        ))
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} -> [{}]:{}",
            self.key(),
            self.file.name,
            self.storage_name,
            self.storage_path
        )
    }
}
