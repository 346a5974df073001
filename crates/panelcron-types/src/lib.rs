//! panelcron-types: Shared data model for the cron subsystem.
//!
//! Job records live in an external relational store; the structs here are
//! the in-process view shared by the store, scheduler, and CLI crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default hard timeout for a job execution, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Maximum characters of captured output persisted per run.
pub const MAX_LAST_OUTPUT_CHARS: usize = 1000;

/// Lifecycle status of a cron job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Never executed, or reset.
    Idle,
    /// An execution is in flight (single-flight claim held).
    Running,
    /// Last execution exited zero.
    Completed,
    /// Last execution failed (validation, timeout, or non-zero exit).
    Failed,
}

impl JobStatus {
    /// String form used in the database status column.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Idle => "idle",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(JobStatus::Idle),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scheduled unit of work owned by a hosting-panel domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    /// Unique job ID.
    pub id: String,
    /// Human label.
    pub name: String,
    /// Command line to execute (first token is checked against the allow-list).
    pub command: String,
    /// 5-field cron expression: minute hour day month weekday.
    pub schedule: String,
    /// Inactive jobs are skipped entirely and never advanced.
    pub is_active: bool,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Max wall-clock runtime in seconds; 0 means use the default.
    pub timeout_seconds: u64,
    /// Informational only; no execution path consults this.
    pub max_retries: u32,
    /// Start of the most recent execution.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Next due time; null until first evaluation or while the schedule is broken.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Truncated captured output of the last run.
    pub last_output: Option<String>,
    /// Wall-clock seconds of the last run, 2-decimal precision.
    pub last_duration: Option<f64>,
    /// Completed executions that exited zero.
    pub success_count: i64,
    /// Completed executions that failed.
    pub failure_count: i64,
    /// Notify this address when a run fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_output: Option<String>,
    /// Owning domain; resolves the per-run working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_id: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl CronJob {
    /// Create a new active, idle job with defaults.
    pub fn new(name: impl Into<String>, command: impl Into<String>, schedule: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            command: command.into(),
            schedule: schedule.into(),
            is_active: true,
            status: JobStatus::Idle,
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
            max_retries: 0,
            last_run_at: None,
            next_run_at: None,
            last_output: None,
            last_duration: None,
            success_count: 0,
            failure_count: 0,
            email_output: None,
            domain_id: None,
            created_at: Utc::now(),
        }
    }

    /// Timeout to enforce for this job, substituting the default for 0.
    pub fn effective_timeout(&self) -> std::time::Duration {
        let secs = if self.timeout_seconds == 0 {
            DEFAULT_TIMEOUT_SECS
        } else {
            self.timeout_seconds
        };
        std::time::Duration::from_secs(secs)
    }
}

/// Outcome of one job execution, returned by the executor for the ledger
/// to persist. Never mutates the job directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// `Completed` or `Failed`; never `Idle`/`Running`.
    pub status: JobStatus,
    /// Captured stdout on success, stderr (or diagnostic text) on failure.
    pub output: String,
    /// Wall-clock duration in seconds, rounded to 2 decimals.
    pub duration_secs: f64,
}

impl ExecutionResult {
    /// Successful run.
    pub fn completed(output: impl Into<String>, duration_secs: f64) -> Self {
        Self {
            status: JobStatus::Completed,
            output: output.into(),
            duration_secs: round2(duration_secs),
        }
    }

    /// Failed run (validation, timeout, spawn error, or non-zero exit).
    pub fn failed(output: impl Into<String>, duration_secs: f64) -> Self {
        Self {
            status: JobStatus::Failed,
            output: output.into(),
            duration_secs: round2(duration_secs),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// Round seconds to 2-decimal precision for persistence.
pub fn round2(secs: f64) -> f64 {
    (secs * 100.0).round() / 100.0
}
