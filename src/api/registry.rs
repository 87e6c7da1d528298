//! Local cache of workers registered by this process.

use crate::api::bundle::Worker;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Input channel of the synthetic worker returned for bundles without a worker id.
pub const DEFAULT_INPUT_CHANNEL: &str = "in";
const DEFAULT_WORKER_ID: &str = "default-worker";
const DEFAULT_OUTPUT_CHANNEL: &str = "data";

/// Workers registered with the store, keyed by id.
///
/// Registration itself happens outside the consumer core; implementors of
/// [`crate::api::PipelineApi`] record the store's answer here and serve
/// `lookup_worker` from it.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caches `worker`, replacing any previous entry with the same id.
    pub fn insert(&self, worker: Worker) {
        let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(worker = %worker.id, "caching registered worker");
        workers.insert(worker.id.clone(), worker);
    }

    pub fn lookup(&self, worker_id: Option<&str>) -> Result<Worker> {
        let Some(worker_id) = worker_id else {
            return Ok(Self::default_worker());
        };

        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(worker_id)
            .cloned()
            .ok_or_else(|| anyhow!("worker {worker_id} not registered locally"))
    }

    pub fn len(&self) -> usize {
        self.workers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Synthetic worker for internal and source nodes.
    pub fn default_worker() -> Worker {
        Worker::new(DEFAULT_WORKER_ID)
            .with_input(DEFAULT_INPUT_CHANNEL)
            .with_output(DEFAULT_OUTPUT_CHANNEL)
    }
}
