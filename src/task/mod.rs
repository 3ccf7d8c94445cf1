//! Idempotent mutating-task lifecycle
//!
//! Every cluster-scoped mutation in the fleet (create or delete of one
//! resource against one cluster) goes through the same lifecycle:
//! execute exactly one mutating call, then poll for readiness, then
//! succeed, time out, or skip. The framework is specialized, unchanged,
//! for every concrete resource kind; a specialization supplies only the
//! existence predicate, the payload, and optionally a readiness predicate
//! distinct from "exists".

pub mod resources;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cluster::ClusterId;
use crate::config::TaskConfig;
use crate::{wait, Error};

/// How the mutation concluded at the cluster
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreationStatus {
    /// The mutating call was issued
    Created,
    /// The resource was already in the desired state; nothing was issued
    SkippedExists,
}

/// The one outcome that holds for a result (or a joined set of results)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Operation confirmed
    Success,
    /// Operation issued but readiness not observed within the timeout;
    /// retry-safe, not a hard failure
    WaitTimeout,
    /// Hard failure
    Failed,
}

/// Result of running one mutating task against one cluster.
///
/// Exactly one of success / wait-timeout / hard-failure holds; the cluster
/// and resource back-references allow folding per-cluster results of a
/// fan-out into one verdict.
#[derive(Clone, Debug)]
pub struct TaskResult<T> {
    /// Operation confirmed
    pub success: bool,
    /// Readiness not observed within the timeout
    pub wait_timeout: bool,
    /// How the mutation concluded; `None` when execution itself failed
    pub creation_status: Option<CreationStatus>,
    /// Optional payload produced by the mutation
    pub value: Option<T>,
    /// Target cluster
    pub cluster: ClusterId,
    /// Resource identity the task was mutating
    pub resource: String,
    /// Failure message for hard failures
    pub error: Option<String>,
}

impl<T> TaskResult<T> {
    /// True when neither success nor wait-timeout holds
    pub fn is_failed(&self) -> bool {
        !self.success && !self.wait_timeout
    }

    /// The single outcome that holds for this result
    pub fn outcome(&self) -> Outcome {
        if self.success {
            Outcome::Success
        } else if self.wait_timeout {
            Outcome::WaitTimeout
        } else {
            Outcome::Failed
        }
    }

    /// Fold many results into one verdict: any hard failure fails the set,
    /// else any wait-timeout makes the set time out, else success.
    pub fn join<'a>(results: impl IntoIterator<Item = &'a TaskResult<T>>) -> Outcome
    where
        T: 'a,
    {
        let mut verdict = Outcome::Success;
        for result in results {
            match result.outcome() {
                Outcome::Failed => return Outcome::Failed,
                Outcome::WaitTimeout => verdict = Outcome::WaitTimeout,
                Outcome::Success => {}
            }
        }
        verdict
    }

    fn skipped(cluster: ClusterId, resource: String, value: Option<T>) -> Self {
        Self {
            success: true,
            wait_timeout: false,
            creation_status: Some(CreationStatus::SkippedExists),
            value,
            cluster,
            resource,
            error: None,
        }
    }

    fn completed(cluster: ClusterId, resource: String, value: Option<T>, ready: bool) -> Self {
        Self {
            success: ready,
            wait_timeout: !ready,
            creation_status: Some(CreationStatus::Created),
            value,
            cluster,
            resource,
            error: None,
        }
    }

    fn failed(cluster: ClusterId, resource: String, error: String) -> Self {
        Self {
            success: false,
            wait_timeout: false,
            creation_status: None,
            value: None,
            cluster,
            resource,
            error: Some(error),
        }
    }
}

/// What one call to [`MutationTask::execute`] observed
#[derive(Debug)]
pub enum Execution<T> {
    /// The mutating call was issued; readiness polling follows
    Applied(Option<T>),
    /// The resource was already in the desired state; terminal success,
    /// no readiness poll
    AlreadyInDesiredState(Option<T>),
}

/// One idempotent mutating operation against a single cluster resource.
///
/// `execute` performs exactly one mutating call, checking existence first
/// and signalling [`Execution::AlreadyInDesiredState`] when the operation
/// is a no-op. Running the same task twice is safe: the second run
/// short-circuits through that branch.
#[async_trait]
pub trait MutationTask: Send + Sync {
    /// Payload produced by the mutation
    type Output: Send + Sync;

    /// Target cluster
    fn cluster(&self) -> &ClusterId;

    /// Resource identity, for results and logs
    fn describe(&self) -> String;

    /// Perform the mutating call, or report the desired state already holds
    async fn execute(&self) -> Result<Execution<Self::Output>, Error>;

    /// Whether the mutation's effect is externally observable yet
    async fn is_ready(&self) -> Result<bool, Error>;

    /// Side-effect hook observing the final outcome; it runs whether or
    /// not readiness was reached and does not change the result.
    async fn on_success(&self, result: &TaskResult<Self::Output>, ready: bool) {
        let _ = (result, ready);
    }
}

/// Drive one task through the lifecycle.
///
/// Execution errors fail the task outright (no retry at this layer);
/// readiness errors count as "not ready yet" and only the timeout budget
/// produces a non-success outcome.
pub async fn run<T: MutationTask>(task: &T, config: &TaskConfig) -> TaskResult<T::Output> {
    let cluster = task.cluster().clone();
    let resource = task.describe();

    let value = match task.execute().await {
        Ok(Execution::AlreadyInDesiredState(value)) => {
            debug!(cluster = %cluster, resource = %resource, "already in desired state, skipping");
            let result = TaskResult::skipped(cluster, resource, value);
            task.on_success(&result, true).await;
            return result;
        }
        Ok(Execution::Applied(value)) => value,
        Err(e) => {
            error!(cluster = %cluster, resource = %resource, error = %e, "task execution failed");
            return TaskResult::failed(cluster, resource, e.to_string());
        }
    };

    let ready = wait::poll(config.poll_interval(), config.wait_timeout(), || {
        task.is_ready()
    })
    .await;

    if ready {
        info!(cluster = %cluster, resource = %resource, "task ready");
    } else {
        warn!(cluster = %cluster, resource = %resource, "readiness not observed within timeout");
    }

    let result = TaskResult::completed(cluster, resource, value, ready);
    task.on_success(&result, ready).await;
    result
}

/// Run a batch of tasks concurrently (one lightweight worker per task)
/// and return the per-task results together with the joined verdict.
pub async fn run_all<T: MutationTask>(
    tasks: &[T],
    config: &TaskConfig,
) -> (Vec<TaskResult<T::Output>>, Outcome) {
    let results = join_all(tasks.iter().map(|task| run(task, config))).await;
    let verdict = TaskResult::join(results.iter());
    (results, verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::sync::Mutex;

    /// Task whose behavior is scripted per call, for lifecycle tests.
    struct ScriptedTask {
        cluster: ClusterId,
        exists: Arc<AtomicU32>, // 0 = absent, 1 = present
        fail_execute: bool,
        ready_after_checks: u32,
        checks: Arc<AtomicU32>,
        observed: Arc<Mutex<Vec<bool>>>,
    }

    impl ScriptedTask {
        fn new() -> Self {
            Self {
                cluster: ClusterId::new("c1"),
                exists: Arc::new(AtomicU32::new(0)),
                fail_execute: false,
                ready_after_checks: 0,
                checks: Arc::new(AtomicU32::new(0)),
                observed: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl MutationTask for ScriptedTask {
        type Output = ();

        fn cluster(&self) -> &ClusterId {
            &self.cluster
        }

        fn describe(&self) -> String {
            "test/resource".to_string()
        }

        async fn execute(&self) -> Result<Execution<()>, Error> {
            if self.fail_execute {
                return Err(Error::task("test/resource", "c1", "rejected"));
            }
            if self.exists.load(Ordering::SeqCst) == 1 {
                return Ok(Execution::AlreadyInDesiredState(None));
            }
            self.exists.store(1, Ordering::SeqCst);
            Ok(Execution::Applied(None))
        }

        async fn is_ready(&self) -> Result<bool, Error> {
            let check = self.checks.fetch_add(1, Ordering::SeqCst);
            Ok(check >= self.ready_after_checks)
        }

        async fn on_success(&self, _result: &TaskResult<()>, ready: bool) {
            self.observed.lock().unwrap().push(ready);
        }
    }

    fn fast_config() -> TaskConfig {
        TaskConfig {
            poll_interval_ms: 10,
            wait_timeout_secs: 1,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_run_is_skipped_exists() {
        let task = ScriptedTask::new();
        let config = fast_config();

        let first = run(&task, &config).await;
        assert!(first.success);
        assert_eq!(first.creation_status, Some(CreationStatus::Created));

        let second = run(&task, &config).await;
        assert!(second.success);
        assert_eq!(second.creation_status, Some(CreationStatus::SkippedExists));
        // the skip performed no readiness polling beyond the first run's
        assert_eq!(task.checks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn execution_error_is_a_hard_failure() {
        let mut task = ScriptedTask::new();
        task.fail_execute = true;
        let result = run(&task, &fast_config()).await;

        assert!(result.is_failed());
        assert_eq!(result.outcome(), Outcome::Failed);
        assert!(result.creation_status.is_none());
        assert!(result.error.as_deref().unwrap().contains("rejected"));
        // hook does not run for hard failures
        assert!(task.observed.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_timeout_is_not_a_failure() {
        let mut task = ScriptedTask::new();
        task.ready_after_checks = u32::MAX; // never ready
        let result = run(&task, &fast_config()).await;

        assert!(!result.success);
        assert!(result.wait_timeout);
        assert!(!result.is_failed());
        assert_eq!(result.outcome(), Outcome::WaitTimeout);
        // the hook still observed the (not ready) outcome
        assert_eq!(task.observed.lock().unwrap().as_slice(), &[false]);
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_errors_count_as_not_ready() {
        struct FlakyReady {
            inner: ScriptedTask,
            failures: AtomicU32,
        }

        #[async_trait]
        impl MutationTask for FlakyReady {
            type Output = ();
            fn cluster(&self) -> &ClusterId {
                self.inner.cluster()
            }
            fn describe(&self) -> String {
                self.inner.describe()
            }
            async fn execute(&self) -> Result<Execution<()>, Error> {
                self.inner.execute().await
            }
            async fn is_ready(&self) -> Result<bool, Error> {
                if self.failures.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::probe("c1", "api hiccup"))
                } else {
                    Ok(true)
                }
            }
        }

        let task = FlakyReady {
            inner: ScriptedTask::new(),
            failures: AtomicU32::new(0),
        };
        let result = run(&task, &fast_config()).await;
        assert!(result.success);
        assert_eq!(task.failures.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn exactly_one_outcome_holds() {
        let success = TaskResult::<()>::completed(ClusterId::new("c1"), "r".into(), None, true);
        let timeout = TaskResult::<()>::completed(ClusterId::new("c1"), "r".into(), None, false);
        let failed = TaskResult::<()>::failed(ClusterId::new("c1"), "r".into(), "boom".into());

        for (result, expected) in [
            (&success, Outcome::Success),
            (&timeout, Outcome::WaitTimeout),
            (&failed, Outcome::Failed),
        ] {
            assert_eq!(result.outcome(), expected);
            let holds = [result.success, result.wait_timeout, result.is_failed()];
            assert_eq!(holds.iter().filter(|h| **h).count(), 1);
        }
    }

    #[test]
    fn join_precedence_is_fail_then_timeout_then_success() {
        let success = TaskResult::<()>::completed(ClusterId::new("a"), "r".into(), None, true);
        let timeout = TaskResult::<()>::completed(ClusterId::new("b"), "r".into(), None, false);
        let failed = TaskResult::<()>::failed(ClusterId::new("c"), "r".into(), "boom".into());

        assert_eq!(TaskResult::join([&success]), Outcome::Success);
        assert_eq!(TaskResult::join([&success, &timeout]), Outcome::WaitTimeout);
        assert_eq!(
            TaskResult::join([&success, &timeout, &failed]),
            Outcome::Failed
        );
        assert_eq!(TaskResult::<()>::join([]), Outcome::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn run_all_joins_the_fan_out() {
        let tasks = vec![ScriptedTask::new(), ScriptedTask::new()];
        let (results, verdict) = run_all(&tasks, &fast_config()).await;
        assert_eq!(results.len(), 2);
        assert_eq!(verdict, Outcome::Success);
    }
}
