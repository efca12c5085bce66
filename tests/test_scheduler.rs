//! Integration tests exercising the `Scheduler` end to end: a linear
//! chain with caching, a tag-limited fan-out, retry-then-succeed,
//! retry-exhausted with downstream skip, cycle rejection, and
//! overall-timeout cancellation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use dagrunner::cache::{Cache, DiskCache, NoCache};
use dagrunner::error::ConstructionError;
use dagrunner::graph::Graph;
use dagrunner::pool::shared::SharedPool;
use dagrunner::pool::ExecutorPool;
use dagrunner::registry::builtin::FailNTimes;
use dagrunner::registry::{FunctionRegistry, TaskFn};
use dagrunner::retry::RetryPolicy;
use dagrunner::scheduler::{Scheduler, SchedulerConfig};
use dagrunner::types::{TaskSpec, TaskState, Workflow};
use dagrunner::value::Value;

fn task(id: &str, function_ref: &str, deps: &[&str]) -> TaskSpec {
    TaskSpec {
        id: id.to_string(),
        function_ref: function_ref.to_string(),
        args: vec![],
        deps: deps.iter().map(|s| s.to_string()).collect(),
        retries: 0,
        timeout: None,
        tags: BTreeSet::new(),
        cacheable: true,
    }
}

fn workflow(name: &str, specs: Vec<TaskSpec>) -> Workflow {
    let tasks = specs.into_iter().map(|s| (s.id.clone(), s)).collect::<BTreeMap<_, _>>();
    Workflow {
        name: name.to_string(),
        tasks,
    }
}

fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 1,
        base_delay: Duration::from_millis(5),
        multiplier: 2.0,
        jitter_fraction: 0.0,
        ceiling: Duration::from_millis(50),
    }
}

/// A registry always carrying the builtins plus whatever the test adds.
fn registry() -> FunctionRegistry {
    FunctionRegistry::with_builtins()
}

#[tokio::test]
async fn s1_linear_chain_with_cache() {
    let dir = tempfile::tempdir().unwrap();
    let cache: Arc<dyn Cache> = Arc::new(DiskCache::new(dir.path()));

    let wf = workflow(
        "linear",
        vec![
            task("a", "echo", &[]),
            task("b", "echo", &["a"]),
            task("c", "echo", &["b"]),
        ],
    );

    let pool: Arc<dyn ExecutorPool> = Arc::new(SharedPool::new(4));
    let reg = Arc::new(registry());
    let config = SchedulerConfig {
        global_cap: 4,
        tag_limits: std::collections::HashMap::new(),
        default_retry: RetryPolicy::default(),
        overall_timeout: None,
    };
    let scheduler = Scheduler::new(wf.clone(), pool, cache.clone(), reg.clone(), config).unwrap();
    let summary = scheduler.run().await;
    let report = summary.report();
    assert_eq!(report.succeeded, 3);
    for outcome in &report.tasks {
        assert!(!outcome.cached, "first run should not hit the cache");
        assert_eq!(outcome.attempts, 1);
    }

    // Second run against the same cache directory: every task should be
    // satisfied from cache with zero dispatches to the pool.
    let pool2: Arc<dyn ExecutorPool> = Arc::new(SharedPool::new(4));
    let config2 = SchedulerConfig {
        global_cap: 4,
        tag_limits: std::collections::HashMap::new(),
        default_retry: RetryPolicy::default(),
        overall_timeout: None,
    };
    let scheduler2 = Scheduler::new(wf, pool2, cache, reg, config2).unwrap();
    let summary2 = scheduler2.run().await;
    let report2 = summary2.report();
    assert_eq!(report2.succeeded, 3);
    assert_eq!(report2.total_cache_hits, 3);
    for outcome in &report2.tasks {
        assert!(outcome.cached);
        assert_eq!(outcome.attempts, 0);
    }
}

struct ConcurrencyProbe {
    current: AtomicUsize,
    max_observed: AtomicUsize,
}

#[async_trait]
impl TaskFn for ConcurrencyProbe {
    async fn call(&self, _args: &[Value]) -> Result<Value, String> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_observed.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn s2_tag_limited_fan_out_never_exceeds_cap() {
    let probe = Arc::new(ConcurrencyProbe {
        current: AtomicUsize::new(0),
        max_observed: AtomicUsize::new(0),
    });

    let mut reg = registry();
    reg.register("probe", probe.clone());
    let reg = Arc::new(reg);

    let mut specs = Vec::new();
    for i in 0..10 {
        let mut t = task(&format!("t{i}"), "probe", &[]);
        t.tags.insert("io".to_string());
        t.cacheable = false;
        specs.push(t);
    }
    let wf = workflow("fanout", specs);

    let pool: Arc<dyn ExecutorPool> = Arc::new(SharedPool::new(8));
    let mut tag_limits = std::collections::HashMap::new();
    tag_limits.insert("io".to_string(), 2);
    let config = SchedulerConfig {
        global_cap: 8,
        tag_limits,
        default_retry: RetryPolicy::default(),
        overall_timeout: None,
    };
    let cache: Arc<dyn Cache> = Arc::new(NoCache);
    let scheduler = Scheduler::new(wf, pool, cache, reg, config).unwrap();
    let report = scheduler.run().await.report();

    assert_eq!(report.succeeded, 10);
    assert!(
        probe.max_observed.load(Ordering::SeqCst) <= 2,
        "observed more than the io tag cap running concurrently"
    );
}

#[tokio::test]
async fn s3_retry_then_succeed() {
    let mut reg = registry();
    reg.register("flaky", Arc::new(FailNTimes::new(2)));
    let reg = Arc::new(reg);

    let mut t = task("a", "flaky", &[]);
    t.retries = 2;
    t.cacheable = false;
    let wf = workflow("retry", vec![t]);

    let pool: Arc<dyn ExecutorPool> = Arc::new(SharedPool::new(2));
    let cache: Arc<dyn Cache> = Arc::new(NoCache);
    let config = SchedulerConfig {
        global_cap: 2,
        tag_limits: std::collections::HashMap::new(),
        default_retry: fast_retry_policy(),
        overall_timeout: None,
    };
    let scheduler = Scheduler::new(wf, pool, cache, reg, config).unwrap();
    let report = scheduler.run().await.report();

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.tasks[0].attempts, 3);
}

#[tokio::test]
async fn s4_retry_exhausted_skips_descendants() {
    let mut reg = registry();
    reg.register("always_fails", Arc::new(FailNTimes::new(u32::MAX)));
    let reg = Arc::new(reg);

    let mut a = task("a", "always_fails", &[]);
    a.cacheable = false;
    let wf = workflow(
        "fail-skip",
        vec![a, task("b", "echo", &["a"]), task("c", "echo", &["a"])],
    );

    let pool: Arc<dyn ExecutorPool> = Arc::new(SharedPool::new(2));
    let cache: Arc<dyn Cache> = Arc::new(NoCache);
    let config = SchedulerConfig {
        global_cap: 2,
        tag_limits: std::collections::HashMap::new(),
        default_retry: fast_retry_policy(),
        overall_timeout: None,
    };
    let scheduler = Scheduler::new(wf, pool, cache, reg, config).unwrap();
    let report = scheduler.run().await.report();

    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 2);
    for outcome in &report.tasks {
        if outcome.task_id != "a" {
            assert_eq!(outcome.status, TaskState::Skipped);
            assert_eq!(outcome.skip_cause.as_deref(), Some("a"));
        }
    }
}

#[test]
fn s5_cycle_is_rejected_before_any_task_runs() {
    let wf = workflow(
        "cyclic",
        vec![task("a", "echo", &["b"]), task("b", "echo", &["a"])],
    );
    let err = Graph::build(&wf).unwrap_err();
    assert!(err.task_id == "a" || err.task_id == "b");
}

#[tokio::test]
async fn unknown_function_is_rejected_at_construction() {
    let wf = workflow("bad-fn", vec![task("a", "no_such_function", &[])]);
    let pool: Arc<dyn ExecutorPool> = Arc::new(SharedPool::new(1));
    let cache: Arc<dyn Cache> = Arc::new(NoCache);
    let reg = Arc::new(registry());
    let config = SchedulerConfig::default();
    let err = Scheduler::new(wf, pool, cache, reg, config).unwrap_err();
    assert!(matches!(err, ConstructionError::UnknownFunction(_)));
}

#[tokio::test]
async fn s6_overall_timeout_cancels_in_flight_task() {
    let reg = Arc::new(registry());
    let mut t = task("a", "sleep", &[]);
    t.args = vec![Value::Float(10.0)];
    t.cacheable = false;
    let wf = workflow("timeout", vec![t]);

    let pool: Arc<dyn ExecutorPool> = Arc::new(SharedPool::new(1));
    let cache: Arc<dyn Cache> = Arc::new(NoCache);
    let config = SchedulerConfig {
        global_cap: 1,
        tag_limits: std::collections::HashMap::new(),
        default_retry: RetryPolicy::default(),
        overall_timeout: Some(Duration::from_millis(100)),
    };
    let scheduler = Scheduler::new(wf, pool, cache, reg, config).unwrap();
    let report = scheduler.run().await.report();

    assert_eq!(report.failed, 1);
    assert_eq!(report.tasks[0].status, TaskState::Failed);
    assert_eq!(report.tasks[0].error.as_ref().unwrap().kind, dagrunner::error::ErrorKind::Cancelled);
}
