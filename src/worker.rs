use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::TransferError;
use crate::pipeline::TransferPipeline;
use crate::task::Task;

/// Pending submissions beyond the busy workers.
pub const QUEUE_CAPACITY: usize = 64;

/// Final report for one submitted task.
#[derive(Debug)]
pub struct TaskOutcome {
    pub key: String,
    pub file_name: String,
    pub storage_name: String,
    pub storage_path: String,
    pub result: Result<(), TransferError>,
}

/// Cancellation handles of queued and running tasks, by task key.
#[derive(Default)]
pub struct TaskRegistry {
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl TaskRegistry {
    pub fn register(&self, key: String, token: CancellationToken) {
        self.lock().insert(key, token);
    }

    pub fn remove(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Cancels the task registered under `key`. Returns false if none is.
    pub fn cancel(&self, key: &str) -> bool {
        match self.lock().get(key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(|err| err.into_inner())
    }
}

/// Fixed set of workers draining a bounded transfer queue.
pub struct WorkerPool {
    queue: mpsc::Sender<Task>,
    registry: Arc<TaskRegistry>,
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        pipeline: Arc<TransferPipeline>,
        workers: usize,
        outcomes: mpsc::UnboundedSender<TaskOutcome>,
    ) -> Self {
        let (queue, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let receiver = Arc::new(AsyncMutex::new(receiver));
        let registry = Arc::new(TaskRegistry::default());

        let handles = (0..workers.max(1))
            .map(|id| {
                let receiver = receiver.clone();
                let pipeline = pipeline.clone();
                let registry = registry.clone();
                let outcomes = outcomes.clone();
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(task) = next else {
                            break;
                        };
                        let outcome = run_task(&pipeline, task, id).await;
                        registry.remove(&outcome.key);
                        if outcomes.send(outcome).is_err() {
                            debug!("worker {id}: outcome receiver dropped");
                        }
                    }
                    debug!("worker {id} stopped");
                })
            })
            .collect();

        Self {
            queue,
            registry,
            shutdown: CancellationToken::new(),
            workers: handles,
        }
    }

    /// Root token of the pool. Tasks built with [`Task::with_parent`] on it
    /// are cancelled together when it fires.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Queues `task`, waiting while the queue is full. Refused once the pool
    /// has been cancelled.
    pub async fn submit(&self, task: Task) -> Result<(), TransferError> {
        if self.shutdown.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        let key = task.key();
        self.registry.register(key.clone(), task.cancel.clone());
        if self.queue.send(task).await.is_err() {
            self.registry.remove(&key);
            return Err(TransferError::Worker("worker pool is shut down".to_string()));
        }
        debug!("queued task {key}");
        Ok(())
    }

    pub fn cancel(&self, key: &str) -> bool {
        self.registry.cancel(key)
    }

    /// Stops accepting tasks and waits for queued ones to finish.
    pub async fn shutdown(self) {
        drop(self.queue);
        for handle in self.workers {
            if let Err(err) = handle.await {
                warn!("worker exited abnormally: {err}");
            }
        }
    }
}

async fn run_task(pipeline: &TransferPipeline, mut task: Task, worker: usize) -> TaskOutcome {
    let result = if task.is_cancelled() {
        Err(TransferError::Cancelled)
    } else {
        info!("worker {worker}: starting {task}");
        pipeline.process(&mut task).await
    };
    TaskOutcome {
        key: task.key(),
        file_name: task.file.name,
        storage_name: task.storage_name,
        storage_path: task.storage_path,
        result,
    }
}
