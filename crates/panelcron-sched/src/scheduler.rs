//! Scheduler loop: per tick, claim and execute every due job.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use panelcron_store::{JobStore, StoreError};
use panelcron_types::{CronJob, ExecutionResult};

use crate::executor::Executor;
use crate::ledger::Ledger;

/// Drives due-job execution. All collaborators are injected; the scheduler
/// holds no global state, and several instances may share one database
/// because the claim in [`JobStore::try_mark_running`] is atomic.
pub struct Scheduler {
    store: Arc<JobStore>,
    executor: Arc<Executor>,
    ledger: Arc<Ledger>,
    workspace_root: PathBuf,
    limiter: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(
        store: Arc<JobStore>,
        executor: Arc<Executor>,
        ledger: Arc<Ledger>,
        workspace_root: impl Into<PathBuf>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            executor,
            ledger,
            workspace_root: workspace_root.into(),
            limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// One tick: fetch due jobs, claim each, execute them concurrently
    /// (bounded by the semaphore), and record every outcome. Returns the
    /// number of jobs dispatched. Only the initial due-job query can fail;
    /// every per-job error is absorbed and logged.
    pub async fn run_due_jobs(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let due = self.store.fetch_due_jobs(now)?;
        if due.is_empty() {
            return Ok(0);
        }

        let mut running: JoinSet<(CronJob, ExecutionResult)> = JoinSet::new();
        let mut dispatched = 0;

        for job in due {
            // Atomic claim; a concurrent tick (or another scheduler process)
            // may have taken the job since the query.
            match self.store.try_mark_running(&job.id, now) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(job_id = %job.id, "Job already claimed, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(job_id = %job.id, "Claim failed, skipping: {e}");
                    continue;
                }
            }

            dispatched += 1;
            info!(job_id = %job.id, name = %job.name, "Executing cron job");

            let executor = self.executor.clone();
            let limiter = self.limiter.clone();
            let work_dir = self.work_dir_for(&job);
            running.spawn(async move {
                let _permit = limiter.acquire_owned().await.ok();
                let started = Instant::now();
                // Inner task so an executor panic is contained and still
                // produces a recordable failed result for this job.
                let exec_job = job.clone();
                let inner =
                    tokio::spawn(async move { executor.execute(&exec_job, &work_dir).await });
                let result = match inner.await {
                    Ok(result) => result,
                    Err(e) => ExecutionResult::failed(
                        format!("execution task aborted: {e}"),
                        started.elapsed().as_secs_f64(),
                    ),
                };
                (job, result)
            });
        }

        while let Some(joined) = running.join_next().await {
            let (job, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("Execution wrapper task failed: {e}");
                    continue;
                }
            };
            if let Err(e) = self.ledger.record(&job, result) {
                warn!(job_id = %job.id, "Failed to persist execution outcome: {e}");
            }
        }

        Ok(dispatched)
    }

    /// Polling entrypoint: one tick per interval, forever. Tick failures
    /// are logged and retried on the next tick; a reconciliation pass first
    /// frees any job stuck in `running` from a crashed run.
    pub async fn run_loop(&self, interval: std::time::Duration) {
        info!("Cron scheduler started, tick every {}s", interval.as_secs());
        loop {
            if let Err(e) = self.store.reset_stuck_jobs(Utc::now()) {
                warn!("Stuck-job reconciliation failed: {e}");
            }
            match self.run_due_jobs().await {
                Ok(0) => {}
                Ok(n) => info!("Dispatched {n} job(s)"),
                Err(e) => warn!("Scheduler tick failed, will retry next tick: {e}"),
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Each execution runs under the workspace root, scoped by the owning
    /// domain when the job has one.
    fn work_dir_for(&self, job: &CronJob) -> PathBuf {
        self.workspace_root
            .join(job.domain_id.as_deref().unwrap_or(&job.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandPolicy;
    use crate::ledger::LogNotifier;
    use chrono::{Duration, Timelike};
    use panelcron_types::JobStatus;

    fn scheduler(store: Arc<JobStore>, root: &std::path::Path) -> Scheduler {
        let executor = Arc::new(Executor::new(CommandPolicy::default()));
        let ledger = Arc::new(Ledger::new(store.clone(), Arc::new(LogNotifier)));
        Scheduler::new(store, executor, ledger, root, 4)
    }

    fn due_job(name: &str, command: &str) -> CronJob {
        let mut job = CronJob::new(name, command, "* * * * *");
        job.next_run_at = Some(Utc::now() - Duration::minutes(1));
        job
    }

    #[tokio::test]
    async fn test_tick_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let job = due_job("listing", "ls");
        store.upsert_job(&job).unwrap();

        let before = Utc::now();
        let sched = scheduler(store.clone(), dir.path());
        assert_eq!(sched.run_due_jobs().await.unwrap(), 1);

        let fetched = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Completed);
        assert_eq!(fetched.success_count, 1);
        assert_eq!(fetched.failure_count, 0);
        assert!(fetched.last_duration.is_some());

        // Next run: the upcoming minute boundary
        let next = fetched.next_run_at.unwrap();
        assert!(next > before);
        assert_eq!(next.second(), 0);
        assert!(next <= before + Duration::minutes(2));
    }

    #[tokio::test]
    async fn test_never_evaluated_job_runs_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let job = CronJob::new("fresh", "ls", "* * * * *");
        assert!(job.next_run_at.is_none());
        store.upsert_job(&job).unwrap();

        let sched = scheduler(store.clone(), dir.path());
        assert_eq!(sched.run_due_jobs().await.unwrap(), 1);

        let fetched = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Completed);
        assert!(fetched.next_run_at.is_some());
    }

    #[tokio::test]
    async fn test_future_and_inactive_jobs_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::open_in_memory().unwrap());

        let mut future = due_job("future", "ls");
        future.next_run_at = Some(Utc::now() + Duration::hours(1));
        store.upsert_job(&future).unwrap();

        let mut inactive = CronJob::new("inactive", "ls", "* * * * *");
        inactive.is_active = false;
        store.upsert_job(&inactive).unwrap();

        let sched = scheduler(store.clone(), dir.path());
        assert_eq!(sched.run_due_jobs().await.unwrap(), 0);

        // Inactive job was not advanced
        let fetched = store.get_job(&inactive.id).unwrap().unwrap();
        assert!(fetched.next_run_at.is_none());
        assert_eq!(fetched.status, JobStatus::Idle);
    }

    #[tokio::test]
    async fn test_running_job_not_redispatched() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let mut job = due_job("inflight", "ls");
        job.status = JobStatus::Running;
        store.upsert_job(&job).unwrap();

        let sched = scheduler(store.clone(), dir.path());
        assert_eq!(sched.run_due_jobs().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_second_tick_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        store.upsert_job(&due_job("once", "ls")).unwrap();

        let sched = scheduler(store.clone(), dir.path());
        assert_eq!(sched.run_due_jobs().await.unwrap(), 1);
        // The job now has a future next_run_at; nothing is due
        assert_eq!(sched.run_due_jobs().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_disallowed_command_recorded_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let job = due_job("bad", "rm -rf /");
        store.upsert_job(&job).unwrap();

        let sched = scheduler(store.clone(), dir.path());
        assert_eq!(sched.run_due_jobs().await.unwrap(), 1);

        let fetched = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Failed);
        assert_eq!(fetched.failure_count, 1);
        assert!(fetched.last_output.unwrap().contains("not allowed"));
    }

    #[tokio::test]
    async fn test_one_bad_job_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let good = due_job("good", "ls");
        let bad = due_job("bad", "shutdown now");
        store.upsert_job(&good).unwrap();
        store.upsert_job(&bad).unwrap();

        let sched = scheduler(store.clone(), dir.path());
        assert_eq!(sched.run_due_jobs().await.unwrap(), 2);

        assert_eq!(store.get_job(&good.id).unwrap().unwrap().status, JobStatus::Completed);
        assert_eq!(store.get_job(&bad.id).unwrap().unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_counter_sum_tracks_executions() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let job = due_job("tracked", "ls");
        store.upsert_job(&job).unwrap();

        let sched = scheduler(store.clone(), dir.path());
        sched.run_due_jobs().await.unwrap();

        // Force it due again and run a second time
        let mut j = store.get_job(&job.id).unwrap().unwrap();
        j.next_run_at = Some(Utc::now() - Duration::minutes(1));
        store.upsert_job(&j).unwrap();
        sched.run_due_jobs().await.unwrap();

        let fetched = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(fetched.success_count + fetched.failure_count, 2);
    }
}
