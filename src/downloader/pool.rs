use std::sync::Arc;
use tokio::sync::Semaphore;
use crate::errors::{AppError, Result};

/// Bounded pool for blocking extraction and file work. At most `size` jobs run
/// at once; the rest wait for a permit without blocking the async scheduler.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        log::info!("[POOL] Worker pool created with {} workers", size);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of jobs currently holding a worker.
    pub fn busy(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    /// Submits a blocking job and resolves with its result.
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| AppError::WorkerPool(format!("Pool closed: {}", e)))?;

        let handle = tokio::task::spawn_blocking(move || {
            let result = job();
            drop(permit);
            result
        });

        handle
            .await
            .map_err(|e| AppError::WorkerPool(format!("Worker task failed: {}", e)))?
    }
}
