//! Periodic execution of every configured rollup stream.
//!
//! The scheduler owns an immutable task list. A cycle walks tasks and their
//! rollup settings in order, runs each stream through a [`RollUp`]
//! implementation and stops at the first error. Every cycle produces exactly
//! one [`Event`]. Cycles never overlap: the next one starts `interval` after
//! the previous one finished.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{
    load_tasks, SchedulerConfig, DEFAULT_COPY_INTERVAL, DEFAULT_SCHEDULER_INTERVAL, ENV_TASKS_FILE,
};
use crate::rollup::RunOptions;
use crate::types::{validate_tasks, RollUpSetting, Task};

/// Suffix appended to a table name to form its staging table.
pub const TEMP_TABLE_SUFFIX: &str = "_temp";

/// Executes one rollup stream.
#[async_trait]
pub trait RollUp: Send + Sync {
    async fn run(&self, cancel: &CancellationToken, opts: RunOptions) -> Result<()>;
}

/// Kind of scheduler event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// A full rollup cycle finished.
    RollUp,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RollUp => f.write_str("RollUp"),
        }
    }
}

/// Outcome of one scheduler cycle.
#[derive(Debug)]
pub struct Event {
    pub event_type: EventType,
    /// First error of the cycle; `None` when every stream succeeded.
    pub error: Option<anyhow::Error>,
}

impl Event {
    fn rollup(error: Option<anyhow::Error>) -> Self {
        Self {
            event_type: EventType::RollUp,
            error,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(err) => write!(f, "{} was failed with error: {err:#}", self.event_type),
            None => write!(f, "{}", self.event_type),
        }
    }
}

/// Runs every rollup stream of a task list on a fixed interval.
pub struct Scheduler {
    tasks: Arc<Vec<Task>>,
    rollup: Arc<dyn RollUp>,
    interval: Duration,
}

impl Scheduler {
    /// Validates `tasks` and builds a scheduler with the default 1h interval.
    pub fn new(tasks: Vec<Task>, rollup: Arc<dyn RollUp>) -> Result<Self> {
        validate_tasks(&tasks).context("validate tasks")?;
        Ok(Self {
            tasks: Arc::new(tasks),
            rollup,
            interval: DEFAULT_SCHEDULER_INTERVAL,
        })
    }

    /// Builds a scheduler from process configuration: tasks are loaded from
    /// `config.tasks_file` and cycles are `config.interval` apart.
    pub fn from_config(config: &SchedulerConfig, rollup: Arc<dyn RollUp>) -> Result<Self> {
        let path = config
            .tasks_file
            .as_deref()
            .with_context(|| format!("{ENV_TASKS_FILE} is not set"))?;
        let tasks = load_tasks(path)?;
        Ok(Self::new(tasks, rollup)?.with_interval(config.interval))
    }

    /// Overrides the gap between cycles.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Gap between the end of one cycle and the start of the next.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Starts the scheduling loop and returns its event stream.
    ///
    /// The first cycle runs immediately. A cycle only starts once the event of
    /// the previous one has been received, so a consumer that stops reading
    /// stalls the loop. `cancel` is forwarded into every cycle; once it fires
    /// the loop stops without reporting the interrupted cycle and closes the
    /// channel. Dropping the receiver stops the loop too.
    pub fn run(&self, cancel: CancellationToken) -> mpsc::Receiver<Event> {
        let (events_tx, events_rx) = mpsc::channel(1);
        let tasks = self.tasks.clone();
        let rollup = self.rollup.clone();
        let interval = self.interval;

        tokio::spawn(async move {
            loop {
                // The previous event must be taken before the next cycle starts.
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    permit = events_tx.reserve() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                };

                let error = run_cycle(&tasks, rollup.as_ref(), &cancel).await.err();
                if cancel.is_cancelled() {
                    return;
                }
                match &error {
                    Some(err) => warn!(error = %format!("{err:#}"), "rollup cycle failed"),
                    None => info!(tasks = tasks.len(), "rollup cycle finished"),
                }
                permit.send(Event::rollup(error));

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });

        events_rx
    }
}

/// Runs every stream once, stopping at the first error.
async fn run_cycle(
    tasks: &[Task],
    rollup: &dyn RollUp,
    cancel: &CancellationToken,
) -> Result<()> {
    for task in tasks {
        for setting in &task.rollup_settings {
            rollup
                .run(cancel, run_options(task, setting))
                .await
                .with_context(|| {
                    format!(
                        "roll up {}.{} after {} interval {}",
                        task.database,
                        task.table,
                        humantime::format_duration(setting.after),
                        humantime::format_duration(setting.interval)
                    )
                })?;
        }
    }
    Ok(())
}

/// Engine options for one stream of `task`. A zero `copy_interval` selects
/// the 1h default.
pub fn run_options(task: &Task, setting: &RollUpSetting) -> RunOptions {
    RunOptions {
        database: task.database.clone(),
        table: task.table.clone(),
        temp_table: format!("{}{TEMP_TABLE_SUFFIX}", task.table),
        partition_key: task.partition_key,
        columns: setting.effective_columns(&task.column_settings),
        interval: setting.interval,
        after: setting.after,
        copy_interval: if task.copy_interval.is_zero() {
            DEFAULT_COPY_INTERVAL
        } else {
            task.copy_interval
        },
    }
}
