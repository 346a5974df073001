//! panelcron-store: SQLite-backed persistence for cron job records.
//!
//! The CRUD layer of the surrounding panel owns job creation and deletion;
//! the scheduler only needs the due-job query, the atomic running claim,
//! and the ledger write. All of those live here so the single-flight
//! guarantee holds across scheduler processes sharing one database.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use panelcron_types::{CronJob, ExecutionResult, JobStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

const SCHEMA: &str = "PRAGMA journal_mode = WAL;

     CREATE TABLE IF NOT EXISTS cron_jobs (
         id TEXT PRIMARY KEY,
         name TEXT NOT NULL,
         command TEXT NOT NULL,
         schedule TEXT NOT NULL,
         is_active INTEGER NOT NULL DEFAULT 1,
         status TEXT NOT NULL DEFAULT 'idle',
         timeout_seconds INTEGER NOT NULL DEFAULT 300,
         max_retries INTEGER NOT NULL DEFAULT 0,
         last_run_at TEXT,
         next_run_at TEXT,
         last_output TEXT,
         last_duration REAL,
         success_count INTEGER NOT NULL DEFAULT 0,
         failure_count INTEGER NOT NULL DEFAULT 0,
         email_output TEXT,
         domain_id TEXT,
         created_at TEXT NOT NULL
     );";

const JOB_COLUMNS: &str = "id, name, command, schedule, is_active, status, timeout_seconds, \
     max_retries, last_run_at, next_run_at, last_output, last_duration, success_count, \
     failure_count, email_output, domain_id, created_at";

/// Fixed-width UTC form so lexicographic comparison in SQL is chronological.
fn to_db_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn map_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<CronJob> {
    Ok(CronJob {
        id: row.get(0)?,
        name: row.get(1)?,
        command: row.get(2)?,
        schedule: row.get(3)?,
        is_active: row.get::<_, i64>(4)? != 0,
        status: row
            .get::<_, String>(5)?
            .parse()
            .unwrap_or(JobStatus::Idle),
        timeout_seconds: row.get::<_, i64>(6)?.max(0) as u64,
        max_retries: row.get::<_, i64>(7)?.max(0) as u32,
        last_run_at: row
            .get::<_, Option<String>>(8)?
            .and_then(|s| s.parse().ok()),
        next_run_at: row
            .get::<_, Option<String>>(9)?
            .and_then(|s| s.parse().ok()),
        last_output: row.get(10)?,
        last_duration: row.get(11)?,
        success_count: row.get(12)?,
        failure_count: row.get(13)?,
        email_output: row.get(14)?,
        domain_id: row.get(15)?,
        created_at: row
            .get::<_, String>(16)?
            .parse()
            .unwrap_or_else(|_| Utc::now()),
    })
}

/// Persistent storage for cron jobs.
pub struct JobStore {
    conn: Mutex<Connection>,
}

impl JobStore {
    /// Open or create a job store at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(SCHEMA)?;
        tracing::info!("Job store opened: {}", db_path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert or fully replace a job record.
    pub fn upsert_job(&self, job: &CronJob) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO cron_jobs ({JOB_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
            ),
            rusqlite::params![
                job.id,
                job.name,
                job.command,
                job.schedule,
                job.is_active as i64,
                job.status.as_str(),
                job.timeout_seconds as i64,
                job.max_retries as i64,
                job.last_run_at.map(to_db_time),
                job.next_run_at.map(to_db_time),
                job.last_output,
                job.last_duration,
                job.success_count,
                job.failure_count,
                job.email_output,
                job.domain_id,
                to_db_time(job.created_at),
            ],
        )?;
        Ok(())
    }

    /// Get a job by ID.
    pub fn get_job(&self, id: &str) -> Result<Option<CronJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM cron_jobs WHERE id = ?1"))?;
        let result = stmt.query_row(rusqlite::params![id], map_job);
        match result {
            Ok(j) => Ok(Some(j)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List all jobs, newest first.
    pub fn list_jobs(&self) -> Result<Vec<CronJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM cron_jobs ORDER BY created_at DESC"
        ))?;
        let jobs = stmt
            .query_map([], map_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Delete a job.
    pub fn delete_job(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute("DELETE FROM cron_jobs WHERE id = ?1", rusqlite::params![id])?;
        Ok(count > 0)
    }

    /// Enable or disable a job.
    pub fn set_active(&self, id: &str, active: bool) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE cron_jobs SET is_active = ?1 WHERE id = ?2",
            rusqlite::params![active as i64, id],
        )?;
        Ok(count > 0)
    }

    /// Jobs eligible for dispatch at `now`: active, not already running,
    /// and either never evaluated or past their due time.
    pub fn fetch_due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<CronJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM cron_jobs
             WHERE is_active = 1
               AND status != 'running'
               AND (next_run_at IS NULL OR next_run_at <= ?1)"
        ))?;
        let jobs = stmt
            .query_map(rusqlite::params![to_db_time(now)], map_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Atomically claim a job for execution. The conditional UPDATE is the
    /// single-flight primitive: it succeeds for exactly one caller even when
    /// several scheduler processes share this database.
    pub fn try_mark_running(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE cron_jobs
             SET status = 'running', last_run_at = ?1
             WHERE id = ?2 AND is_active = 1 AND status != 'running'",
            rusqlite::params![to_db_time(now), id],
        )?;
        Ok(count > 0)
    }

    /// Persist one execution outcome in a single update: status, output,
    /// duration, exactly one counter increment, and the recomputed due time.
    /// Returns false if the job vanished mid-execution.
    pub fn record_outcome(
        &self,
        id: &str,
        result: &ExecutionResult,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let counter = if result.is_success() {
            "success_count = success_count + 1"
        } else {
            "failure_count = failure_count + 1"
        };
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            &format!(
                "UPDATE cron_jobs
                 SET status = ?1, last_output = ?2, last_duration = ?3, next_run_at = ?4, {counter}
                 WHERE id = ?5"
            ),
            rusqlite::params![
                result.status.as_str(),
                result.output,
                result.duration_secs,
                next_run_at.map(to_db_time),
                id,
            ],
        )?;
        if count == 0 {
            tracing::debug!(job_id = %id, "Job deleted mid-execution, outcome dropped");
        }
        Ok(count > 0)
    }

    /// Reconciliation pass: jobs stuck in `running` for more than twice
    /// their timeout (a crashed scheduler, typically) are flipped to
    /// `failed` so they become schedulable again. Returns the reset IDs.
    pub fn reset_stuck_jobs(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let stuck: Vec<String> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT id, timeout_seconds, last_run_at FROM cron_jobs WHERE status = 'running'",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter()
                .filter(|(_, timeout, last_run)| {
                    let timeout = if *timeout <= 0 {
                        panelcron_types::DEFAULT_TIMEOUT_SECS as i64
                    } else {
                        *timeout
                    };
                    match last_run.as_deref().and_then(|s| s.parse::<DateTime<Utc>>().ok()) {
                        Some(started) => now - started > chrono::Duration::seconds(timeout * 2),
                        // No start time at all: claimed but never updated, reset it.
                        None => true,
                    }
                })
                .map(|(id, _, _)| id)
                .collect()
        };

        for id in &stuck {
            tracing::warn!(job_id = %id, "Resetting job stuck in running state");
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE cron_jobs
                 SET status = 'failed', last_output = 'reset: execution never reported back'
                 WHERE id = ?1 AND status = 'running'",
                rusqlite::params![id],
            )?;
        }
        Ok(stuck)
    }
}
