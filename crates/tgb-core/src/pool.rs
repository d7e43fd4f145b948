//! Bounded background pool for network jobs.
//!
//! Jobs run on tokio tasks gated by a semaphore. A finished job does not touch
//! its promise: it sends a [`Completion`] to the control loop, and the loop
//! performs the actual resolve/reject (and therefore runs the callbacks).

use std::{future::Future, sync::Arc};

use tokio::sync::{mpsc, Semaphore};

use crate::{promise::Promise, Result};

/// Deferred settlement of one promise, executed by the control loop.
pub struct Completion {
    settle: Box<dyn FnOnce() -> Result<()> + Send>,
}

impl Completion {
    /// Resolve or reject the job's promise on the calling thread.
    pub fn settle(self) -> Result<()> {
        (self.settle)()
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Completion")
    }
}

#[derive(Clone)]
pub struct AsyncPool {
    permits: Arc<Semaphore>,
    completions: mpsc::UnboundedSender<Completion>,
}

impl AsyncPool {
    /// Create a pool running at most `workers` jobs at once, plus the receiving
    /// end the control loop drains.
    pub fn new(workers: usize) -> (Self, mpsc::UnboundedReceiver<Completion>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pool = Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            completions: tx,
        };
        (pool, rx)
    }

    /// Submit a job. Never blocks; must be called from within a tokio runtime.
    ///
    /// `Err(reason)` from the job rejects the promise with that reason.
    pub fn submit<T, F>(&self, job: F) -> Promise<T>
    where
        T: Send + Sync + 'static,
        F: Future<Output = std::result::Result<T, String>> + Send + 'static,
    {
        let promise = Promise::new();
        let handle = promise.clone();
        let permits = self.permits.clone();
        let completions = self.completions.clone();

        tokio::spawn(async move {
            let outcome = match permits.acquire_owned().await {
                Ok(_permit) => job.await,
                Err(_) => Err("worker pool is closed".to_string()),
            };

            let settle: Box<dyn FnOnce() -> Result<()> + Send> = match outcome {
                Ok(value) => Box::new(move || handle.resolve(value)),
                Err(reason) => Box::new(move || handle.reject(reason)),
            };

            if completions.send(Completion { settle }).is_err() {
                tracing::debug!("control loop gone; dropping job completion");
            }
        });

        promise
    }

    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }
}
