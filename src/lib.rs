//! Staged remote-to-storage transfers.
//!
//! A [`pipeline::TransferPipeline`] downloads a remote file into a local
//! staging file, reports throttled progress through a
//! [`progress::ProgressSink`], saves the result into a configured
//! [`storage::Storage`] with bounded retries and reclaims the staging file.
//! [`worker::WorkerPool`] runs many transfers behind a bounded queue.

pub mod config;
pub mod download;
pub mod error;
pub mod naming;
pub mod pipeline;
pub mod policy;
pub mod progress;
pub mod reclaim;
pub mod save;
pub mod sink;
pub mod source;
pub mod staging;
pub mod storage;
pub mod task;
pub mod util;
pub mod worker;
