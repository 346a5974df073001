use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use panelcron_config::PanelcronConfig;
use panelcron_sched::{CommandPolicy, Executor, Ledger, LogNotifier, Scheduler};
use panelcron_store::JobStore;

#[derive(Parser)]
#[command(name = "panelcron", about = "Hosting panel cron scheduler")]
struct Cli {
    /// Config file path (defaults to ~/.panelcron/config.json5)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute all currently due jobs once and exit
    Run,
    /// Poll for due jobs on a fixed interval
    Watch {
        /// Seconds between ticks (overrides config)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// List all jobs and their state
    List,
    /// Reset jobs stuck in the running state
    ResetStuck,
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => panelcron_config::load_config_from(path)?,
        None => panelcron_config::load_config()?,
    };

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(JobStore::open(&config.db_path)?);

    match cli.command {
        Commands::Run => {
            let rt = tokio::runtime::Runtime::new()?;
            let scheduler = build_scheduler(&config, store);
            // Exit code reflects scheduler health only, never per-job outcomes
            let dispatched = rt.block_on(scheduler.run_due_jobs())?;
            println!("Dispatched {dispatched} job(s)");
        }
        Commands::Watch { interval } => {
            let rt = tokio::runtime::Runtime::new()?;
            let scheduler = build_scheduler(&config, store);
            let secs = interval.unwrap_or(config.poll_interval_seconds);
            rt.block_on(scheduler.run_loop(std::time::Duration::from_secs(secs)));
        }
        Commands::List => {
            let jobs = store.list_jobs()?;
            if jobs.is_empty() {
                println!("No jobs.");
                return Ok(());
            }
            println!(
                "{:<36}  {:<20}  {:<9}  {:<15}  {:>5}  {:>5}  {}",
                "ID", "NAME", "STATUS", "SCHEDULE", "OK", "FAIL", "NEXT RUN"
            );
            for job in jobs {
                let next = job
                    .next_run_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                let active = if job.is_active { "" } else { " (inactive)" };
                println!(
                    "{:<36}  {:<20}  {:<9}  {:<15}  {:>5}  {:>5}  {}{}",
                    job.id,
                    job.name,
                    job.status,
                    job.schedule,
                    job.success_count,
                    job.failure_count,
                    next,
                    active
                );
            }
        }
        Commands::ResetStuck => {
            let reset = store.reset_stuck_jobs(chrono::Utc::now())?;
            if reset.is_empty() {
                println!("No stuck jobs.");
            } else {
                for id in &reset {
                    println!("Reset {id}");
                }
            }
        }
    }

    Ok(())
}

fn build_scheduler(config: &PanelcronConfig, store: Arc<JobStore>) -> Scheduler {
    let executor = Arc::new(Executor::new(CommandPolicy::new(
        config.allowed_commands.clone(),
    )));
    let ledger = Arc::new(Ledger::new(store.clone(), Arc::new(LogNotifier)));
    Scheduler::new(
        store,
        executor,
        ledger,
        &config.workspace_root,
        config.max_concurrent,
    )
}
