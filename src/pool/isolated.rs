//! Isolated pool: each submission runs on a dedicated OS thread via
//! `tokio::task::spawn_blocking`, with arguments and the result crossing
//! through owned `Value`s — modeling a separate address space /
//! serialization boundary for CPU-bound work without requiring real
//! multi-process IPC. Cancellation of in-flight work is therefore
//! best-effort: once a closure is running on its thread it runs to
//! completion.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use async_trait::async_trait;

use crate::error::ErrorDescriptor;
use crate::pool::{Completion, ExecutorPool, PoolOutcome, PoolTask};
use crate::value::Value;

enum RawOutcome {
    Success(Value),
    Thrown(String),
    TimedOut,
}

pub struct IsolatedPool {
    semaphore: Arc<Semaphore>,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl IsolatedPool {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            handles: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ExecutorPool for IsolatedPool {
    async fn submit(&self, task: PoolTask, tx: mpsc::UnboundedSender<Completion>) {
        let semaphore = self.semaphore.clone();
        let handle = tokio::spawn(async move {
            let _permit = semaphore.acquire().await;

            let task_id = task.task_id.clone();
            let timeout = task.timeout;
            let callable = task.callable;
            let args = task.args;

            // Run on a dedicated OS thread with its own single-threaded
            // runtime, so the callable never shares the scheduler's
            // async context.
            let join = tokio::task::spawn_blocking(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .expect("failed to build isolated-worker runtime");
                rt.block_on(async move {
                    match timeout {
                        Some(d) => match tokio::time::timeout(d, callable.call(&args)).await {
                            Ok(Ok(v)) => RawOutcome::Success(v),
                            Ok(Err(e)) => RawOutcome::Thrown(e),
                            Err(_) => RawOutcome::TimedOut,
                        },
                        None => match callable.call(&args).await {
                            Ok(v) => RawOutcome::Success(v),
                            Err(e) => RawOutcome::Thrown(e),
                        },
                    }
                })
            })
            .await;

            let outcome: PoolOutcome = match join {
                Ok(RawOutcome::Success(value)) => Ok(value),
                Ok(RawOutcome::Thrown(message)) => Err(ErrorDescriptor::thrown(message)),
                Ok(RawOutcome::TimedOut) => Err(ErrorDescriptor::timeout(format!(
                    "task '{task_id}' exceeded its timeout"
                ))),
                Err(join_err) => Err(ErrorDescriptor::thrown(format!(
                    "isolated worker panicked: {join_err}"
                ))),
            };

            let _ = tx.send(Completion {
                task_id,
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
                // Best-effort: aborting a tokio task doesn't preempt the
                // blocking OS thread it's waiting on, only the outer
                // future if it hasn't reached spawn_blocking yet.
                handle.abort();
            }
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}
