//! Run summary aggregation and JSON export. Accumulates `TaskOutcome`s in
//! completion order as the scheduler produces them, then derives tallies,
//! attempt/cache-hit counts, and the critical path at report time.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::types::{TaskOutcome, TaskState};

/// Accumulates `TaskOutcome`s as the Scheduler produces them, in the order
/// they complete. The deps snapshot is kept only to compute the critical
/// path at report time.
pub struct RunSummary {
    workflow_name: String,
    deps: BTreeMap<String, BTreeSet<String>>,
    started_at: DateTime<Utc>,
    outcomes: Vec<TaskOutcome>,
}

impl RunSummary {
    pub fn new(workflow_name: String) -> Self {
        Self {
            workflow_name,
            deps: BTreeMap::new(),
            started_at: Utc::now(),
            outcomes: Vec::new(),
        }
    }

    pub fn with_deps(mut self, deps: BTreeMap<String, BTreeSet<String>>) -> Self {
        self.deps = deps;
        self
    }

    pub fn record(&mut self, outcome: TaskOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn outcomes(&self) -> &[TaskOutcome] {
        &self.outcomes
    }

    /// Build the final report snapshot. Can be called any time; the
    /// Scheduler calls it once after the run loop has emptied.
    pub fn report(&self) -> RunSummaryReport {
        let ended_at = self
            .outcomes
            .iter()
            .map(|o| o.ended_at)
            .max()
            .unwrap_or(self.started_at);

        let mut succeeded = 0usize;
        let mut failed = 0usize;
        let mut skipped = 0usize;
        let mut total_attempts = 0u32;
        let mut total_retried = 0usize;
        let mut total_cache_hits = 0usize;
        let mut longest: Option<(String, Duration)> = None;

        let mut wall_times: BTreeMap<&str, Duration> = BTreeMap::new();

        for outcome in &self.outcomes {
            match outcome.status {
                TaskState::Succeeded => succeeded += 1,
                TaskState::Failed => failed += 1,
                TaskState::Skipped => skipped += 1,
                _ => {}
            }
            total_attempts += outcome.attempts;
            if outcome.attempts > 1 {
                total_retried += 1;
            }
            if outcome.cached {
                total_cache_hits += 1;
            }
            let is_new_longest = match &longest {
                Some((_, d)) => outcome.wall_time > *d,
                None => true,
            };
            if is_new_longest {
                longest = Some((outcome.task_id.clone(), outcome.wall_time));
            }
            // Only successful tasks contribute to the critical path — a
            // failed task's wall time isn't "work completed" along a path.
            if outcome.status == TaskState::Succeeded {
                wall_times.insert(&outcome.task_id, outcome.wall_time);
            }
        }

        let critical_path = self.critical_path_duration(&wall_times);

        RunSummaryReport {
            report_id: Uuid::new_v4(),
            workflow: self.workflow_name.clone(),
            started_at: self.started_at,
            ended_at,
            total_wall_time: (ended_at - self.started_at)
                .to_std()
                .unwrap_or(Duration::ZERO),
            succeeded,
            failed,
            skipped,
            total_tasks: self.outcomes.len(),
            total_attempts,
            total_retried,
            total_cache_hits,
            longest_task: longest,
            critical_path,
            tasks: self.outcomes.clone(),
        }
    }

    /// Longest sum of wall times along any dependency chain of
    /// successful tasks. A task that failed, was skipped, or never ran
    /// contributes zero rather than panicking.
    fn critical_path_duration(&self, wall_times: &BTreeMap<&str, Duration>) -> Duration {
        let mut memo: BTreeMap<&str, Duration> = BTreeMap::new();
        let ids: Vec<&str> = self.deps.keys().map(String::as_str).collect();
        for id in &ids {
            self.critical_path_for(id, wall_times, &mut memo);
        }
        memo.values().copied().max().unwrap_or(Duration::ZERO)
    }

    fn critical_path_for<'a>(
        &'a self,
        id: &'a str,
        wall_times: &BTreeMap<&str, Duration>,
        memo: &mut BTreeMap<&'a str, Duration>,
    ) -> Duration {
        if let Some(d) = memo.get(id) {
            return *d;
        }
        let own = wall_times.get(id).copied().unwrap_or(Duration::ZERO);
        let upstream = self
            .deps
            .get(id)
            .map(|deps| {
                deps.iter()
                    .map(|dep| self.critical_path_for(dep.as_str(), wall_times, memo))
                    .max()
                    .unwrap_or(Duration::ZERO)
            })
            .unwrap_or(Duration::ZERO);
        let total = own + upstream;
        memo.insert(id, total);
        total
    }

    pub async fn write_json(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let report = self.report();
        let data = serde_json::to_string_pretty(&report)?;
        let path = path.as_ref();
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct RunSummaryReport {
    pub report_id: Uuid,
    pub workflow: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub total_wall_time: Duration,
    pub total_tasks: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_attempts: u32,
    pub total_retried: usize,
    pub total_cache_hits: usize,
    pub longest_task: Option<(String, Duration)>,
    pub critical_path: Duration,
    pub tasks: Vec<TaskOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::time::Duration as StdDuration;

    fn outcome(id: &str, status: TaskState, wall_ms: u64, attempts: u32, cached: bool) -> TaskOutcome {
        let now = Utc::now();
        TaskOutcome {
            task_id: id.to_string(),
            status,
            attempts,
            started_at: now,
            ended_at: now,
            wall_time: StdDuration::from_millis(wall_ms),
            result: Some(Value::Int(1)),
            error: None,
            skip_cause: None,
            cached,
        }
    }

    #[test]
    fn tallies_status_counts_and_attempts() {
        let mut deps = BTreeMap::new();
        deps.insert("a".to_string(), BTreeSet::new());
        deps.insert("b".to_string(), BTreeSet::from(["a".to_string()]));
        let mut summary = RunSummary::new("wf".into()).with_deps(deps);
        summary.record(outcome("a", TaskState::Succeeded, 10, 1, false));
        summary.record(outcome("b", TaskState::Succeeded, 20, 2, true));

        let report = summary.report();
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.total_retried, 1);
        assert_eq!(report.total_cache_hits, 1);
        assert_eq!(report.critical_path, StdDuration::from_millis(30));
    }

    #[test]
    fn longest_task_tracks_max_wall_time() {
        let mut summary = RunSummary::new("wf".into());
        summary.record(outcome("a", TaskState::Succeeded, 5, 1, false));
        summary.record(outcome("b", TaskState::Succeeded, 50, 1, false));
        let report = summary.report();
        assert_eq!(report.longest_task.unwrap().0, "b");
    }

    #[test]
    fn critical_path_ignores_a_failed_tasks_wall_time() {
        let mut deps = BTreeMap::new();
        deps.insert("a".to_string(), BTreeSet::new());
        deps.insert("b".to_string(), BTreeSet::from(["a".to_string()]));
        let mut summary = RunSummary::new("wf".into()).with_deps(deps);
        summary.record(outcome("a", TaskState::Succeeded, 10, 1, false));
        // b ran for a long time but ultimately failed — its wall time
        // must not inflate the critical path.
        summary.record(outcome("b", TaskState::Failed, 500, 1, false));

        let report = summary.report();
        assert_eq!(report.critical_path, StdDuration::from_millis(10));
    }
}
