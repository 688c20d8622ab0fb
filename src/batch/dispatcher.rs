//! Batch Dispatcher Module
//!
//! Runs batches on the tokio worker pool so the request-handling task never
//! executes statements itself. A semaphore bounds how many batches run at
//! once; with no bound every submitted batch gets its own task immediately.

use crate::{BatchOperation, EngineError, Handle, OperationResult, Result, batch::BatchExecutor};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error};

/// Worker pool front-end for the batch executor
#[derive(Clone)]
pub struct BatchDispatcher {
    executor: Arc<BatchExecutor>,
    /// `None` means unbounded
    permits: Option<Arc<Semaphore>>,
}

impl BatchDispatcher {
    /// Creates a dispatcher
    ///
    /// # Arguments
    /// * `executor` - Executor that runs the batches
    /// * `max_concurrent` - Maximum batches in flight; `0` disables the bound
    pub fn new(executor: Arc<BatchExecutor>, max_concurrent: usize) -> Self {
        let permits = (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent)));
        Self { executor, permits }
    }

    pub fn executor(&self) -> &Arc<BatchExecutor> {
        &self.executor
    }

    /// Submit a batch and wait for its results
    ///
    /// The batch runs to completion or fatal failure even if the caller stops
    /// waiting; mid-batch cancellation is not supported.
    pub async fn submit(
        &self,
        handle: Handle,
        operations: Vec<BatchOperation>,
    ) -> Result<Vec<OperationResult>> {
        let permit = match &self.permits {
            Some(semaphore) => Some(
                semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| EngineError::Internal(e.to_string()))?,
            ),
            None => None,
        };

        debug!("Dispatching batch of {} operations to connection {}", operations.len(), handle);
        let executor = self.executor.clone();
        let task = tokio::spawn(async move {
            let _permit = permit;
            executor.execute_batch(handle, operations).await
        });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                error!("Batch worker for connection {} failed: {}", handle, e);
                Err(EngineError::Internal(format!("batch worker failed: {}", e)))
            }
        }
    }
}
