use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;

/// Contiguous byte range fetched by a single worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Part {
    pub id: usize,
    pub offset: u64,
    pub len: u64,
}

impl Part {
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

#[derive(Debug, Clone)]
pub struct PartStats {
    pub id: usize,
    pub bytes: u64,
    pub duration: Duration,
}

impl PartStats {
    pub fn throughput(&self) -> f64 {
        if self.duration.is_zero() {
            return self.bytes as f64;
        }
        self.bytes as f64 / self.duration.as_secs_f64()
    }
}

pub fn split_parts(total: u64, part_size: u64) -> Vec<Part> {
    let part_size = part_size.max(1);
    let mut parts = Vec::new();
    let mut offset = 0u64;
    let mut id = 0usize;
    while offset < total {
        let len = part_size.min(total - offset);
        parts.push(Part { id, offset, len });
        offset += len;
        id += 1;
    }
    parts
}

/// Work queue shared by the download workers of one transfer.
pub struct PartQueue {
    pending: Mutex<VecDeque<Part>>,
}

impl PartQueue {
    pub fn new(parts: Vec<Part>) -> Self {
        Self {
            pending: Mutex::new(parts.into_iter().collect()),
        }
    }

    pub async fn next_part(&self) -> Option<Part> {
        self.pending.lock().await.pop_front()
    }

    pub async fn remaining(&self) -> usize {
        self.pending.lock().await.len()
    }
}
