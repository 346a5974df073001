//! panelcron-sched: The cron scheduling and execution core.
//!
//! A tick fetches due jobs from the store, claims each with a conditional
//! status update (single-flight across scheduler processes), runs the
//! command in an isolated working directory under a hard timeout, and
//! records the outcome back onto the job row.

pub mod command;
pub mod executor;
pub mod ledger;
pub mod schedule;
pub mod scheduler;

pub use command::{CommandPolicy, ValidateError};
pub use executor::Executor;
pub use ledger::{Ledger, LogNotifier, Notifier};
pub use schedule::{CronSchedule, ScheduleError, next_run_after};
pub use scheduler::Scheduler;
