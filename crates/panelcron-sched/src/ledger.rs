//! Execution ledger: turns an execution outcome into persisted job state.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use panelcron_store::{JobStore, StoreError};
use panelcron_types::{CronJob, ExecutionResult, MAX_LAST_OUTPUT_CHARS};

use crate::schedule;

/// Failure notification seam. Mail delivery lives in the surrounding panel;
/// this is the fire-and-forget boundary the ledger calls into.
pub trait Notifier: Send + Sync {
    fn notify_failure(&self, recipient: &str, job_name: &str, error_text: &str);
}

/// Default notifier: logs the would-be notification and nothing else.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_failure(&self, recipient: &str, job_name: &str, error_text: &str) {
        tracing::info!(
            recipient,
            job = job_name,
            "Job failed: {}",
            error_text.lines().next().unwrap_or("")
        );
    }
}

/// Records each run's outcome back onto the job row.
pub struct Ledger {
    store: Arc<JobStore>,
    notifier: Arc<dyn Notifier>,
}

impl Ledger {
    pub fn new(store: Arc<JobStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Persist one execution outcome: status, truncated output, duration,
    /// exactly one counter increment, and the recomputed next run time, all
    /// in a single store update. A failure notification (if configured) is
    /// fired only after the write has committed and never blocks or fails
    /// the ledger.
    pub fn record(&self, job: &CronJob, mut result: ExecutionResult) -> Result<(), StoreError> {
        result.output = truncate_output(&result.output);

        // next_run_at is recomputed after every attempt, anchored at now.
        let next_run_at = match schedule::next_run_after(&job.schedule, Utc::now()) {
            Ok(t) => Some(t),
            Err(e) => {
                warn!(job_id = %job.id, "Cannot compute next run, leaving unset: {e}");
                None
            }
        };

        let persisted = self.store.record_outcome(&job.id, &result, next_run_at)?;

        if persisted && !result.is_success() {
            if let Some(email) = job.email_output.as_deref().filter(|e| !e.is_empty()) {
                let notifier = self.notifier.clone();
                let recipient = email.to_string();
                let name = job.name.clone();
                let text = result.output.clone();
                tokio::spawn(async move {
                    notifier.notify_failure(&recipient, &name, &text);
                });
            }
        }

        debug!(job_id = %job.id, status = %result.status, duration = result.duration_secs,
               "Recorded execution outcome");
        Ok(())
    }
}

fn truncate_output(output: &str) -> String {
    if output.chars().count() <= MAX_LAST_OUTPUT_CHARS {
        output.to_string()
    } else {
        output.chars().take(MAX_LAST_OUTPUT_CHARS).collect()
    }
}
