//! Prints what the scheduler would execute for a task file.
//!
//! The tool never connects to a store: it validates the tasks, merges each
//! stream's columns and renders the aggregation statement every shard would
//! run, which makes configuration changes reviewable before deployment.

use std::path::PathBuf;

use anyhow::{Context, Result};
use ch_rollup::config::{load_tasks, SchedulerConfig, ENV_TASKS_FILE};
use ch_rollup::scheduler::run_options;
use ch_rollup::statement::RollUpStatement;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ch-rollup-plan")]
struct Args {
    /// JSON task file; defaults to `CH_ROLLUP_TASKS_FILE`.
    #[arg(long)]
    tasks: Option<PathBuf>,

    /// Only validate the file, do not print statements.
    #[arg(long)]
    check: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ch_rollup=info,warn")),
        )
        .init();

    let args = Args::parse();
    let mut config = SchedulerConfig::from_env()?;
    if let Some(tasks) = args.tasks {
        config.tasks_file = Some(tasks);
    }
    let path = config
        .tasks_file
        .as_deref()
        .with_context(|| format!("pass --tasks or set {ENV_TASKS_FILE}"))?;
    let tasks = load_tasks(path)?;
    let streams: usize = tasks.iter().map(|task| task.rollup_settings.len()).sum();
    tracing::info!(
        tasks = tasks.len(),
        streams,
        file = %path.display(),
        cycle_interval = %humantime::format_duration(config.interval),
        "task file is valid"
    );
    if args.check {
        return Ok(());
    }

    for task in &tasks {
        for setting in &task.rollup_settings {
            let opts = run_options(task, setting);
            let statement = RollUpStatement {
                database: &opts.database,
                from_table: &opts.table,
                to_table: &opts.temp_table,
                interval: opts.interval,
                columns: &opts.columns,
            }
            .build();
            println!(
                "-- {}.{} after {} interval {} (staging {}, copy window {})",
                opts.database,
                opts.table,
                humantime::format_duration(opts.after),
                humantime::format_duration(opts.interval),
                opts.temp_table,
                humantime::format_duration(opts.copy_interval),
            );
            println!("{statement};");
        }
    }
    Ok(())
}
