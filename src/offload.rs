//! Bounded boundary for blocking work.
//!
//! Parsing the bulk name listing, building archives and writing artifact
//! files all go through [`Offload::run`], which takes a semaphore permit
//! and then runs the closure on tokio's blocking pool. The async executor
//! never waits on CPU- or file-bound work directly.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::Semaphore;

#[derive(Clone)]
pub struct Offload {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl Offload {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `f` off the event loop, waiting for a free worker first.
    pub async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| anyhow!("offload pool closed"))?;

        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| anyhow!("blocking task failed: {}", e))?
    }
}
