//! Shared-memory pool: workers run as `tokio::spawn`ed tasks alongside
//! the scheduler. Lower dispatch cost than the isolated pool; suited to
//! I/O-bound tasks.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::error::ErrorDescriptor;
use crate::pool::{Completion, ExecutorPool, PoolOutcome, PoolTask};

pub struct SharedPool {
    semaphore: Arc<Semaphore>,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl SharedPool {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            handles: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ExecutorPool for SharedPool {
    async fn submit(&self, task: PoolTask, tx: mpsc::UnboundedSender<Completion>) {
        let semaphore = self.semaphore.clone();
        let handle = tokio::spawn(async move {
            // Submissions beyond the cap queue FIFO on the semaphore
            // without blocking the scheduler's dispatch loop, since this
            // await happens inside the spawned task.
            let _permit = semaphore.acquire().await;

            let outcome: PoolOutcome = match task.timeout {
                Some(timeout) => match tokio::time::timeout(timeout, task.callable.call(&task.args)).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(message)) => Err(ErrorDescriptor::thrown(message)),
                    Err(_) => Err(ErrorDescriptor::timeout(format!(
                        "task '{}' exceeded timeout of {:.3}s",
                        task.task_id,
                        timeout.as_secs_f64()
                    ))),
                },
                None => match task.callable.call(&task.args).await {
                    Ok(value) => Ok(value),
                    Err(message) => Err(ErrorDescriptor::thrown(message)),
                },
            };

            let _ = tx.send(Completion {
                task_id: task.task_id,
                outcome,
                cached: false,
            });
        });
        self.handles.lock().unwrap().push(handle);
    }

    async fn shutdown(&self, graceful: bool) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock().unwrap());
        if !graceful {
            for handle in &handles {
                handle.abort();
            }
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}
