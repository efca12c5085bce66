//! Abstract bounded worker pool. Two variants: `shared` (cheap dispatch,
//! shares memory with the scheduler — suited to I/O-bound tasks) and
//! `isolated` (each submission on its own OS thread, args/results cross
//! through owned `Value`s — suited to CPU-bound tasks). Both enforce a
//! global concurrency cap and honor per-task timeouts.

pub mod isolated;
pub mod shared;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ErrorDescriptor;
use crate::registry::TaskFn;
use crate::value::Value;

/// Work handed to a pool: a resolved callable, its arguments, and an
/// optional per-task timeout.
pub struct PoolTask {
    pub task_id: String,
    pub callable: Arc<dyn TaskFn>,
    pub args: Vec<Value>,
    pub timeout: Option<Duration>,
}

/// What a pool submission resolves to.
pub type PoolOutcome = Result<Value, ErrorDescriptor>;

/// Delivered to the scheduler's completion channel once a submission
/// resolves. Workers and the scheduler only ever communicate through
/// these events.
pub struct Completion {
    pub task_id: String,
    pub outcome: PoolOutcome,
    /// Set by the Scheduler for a synthesized cache-hit completion; always
    /// `false` for completions a pool produces itself.
    pub cached: bool,
}

#[async_trait]
pub trait ExecutorPool: Send + Sync {
    /// Hand `task` to the pool. Returns once the work has been accepted
    /// for execution — it does not wait for the result. The result is
    /// delivered later on `tx` exactly once.
    async fn submit(&self, task: PoolTask, tx: mpsc::UnboundedSender<Completion>);

    /// Wait for in-flight work (`graceful`) or request cancellation and
    /// wait for in-flight handles to resolve (`!graceful`). Cancellation
    /// is best-effort for the isolated pool.
    async fn shutdown(&self, graceful: bool);
}
