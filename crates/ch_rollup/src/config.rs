//! Process configuration: task files and environment overrides.
//!
//! Tasks are read from a JSON file. Durations are written the way operators
//! type them (`"24h"`, `"90m"`, `"1h 30m"`) and parsed with `humantime`.
//!
//! ```json
//! [{
//!   "database": "default",
//!   "table": "events",
//!   "partition_key": "24h",
//!   "column_settings": [
//!     {"name": "host"},
//!     {"name": "counter", "expression": "countMerge(counter)"},
//!     {"name": "event_time", "is_rollup_time": true}
//!   ],
//!   "rollup_settings": [{"after": "24h", "interval": "1h"}]
//! }]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};

use crate::types::{validate_tasks, Task};

/// Default gap between two scheduler cycles.
pub const DEFAULT_SCHEDULER_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// Default width of one aggregation statement's window.
pub const DEFAULT_COPY_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Environment variable overriding the scheduler interval.
pub const ENV_INTERVAL: &str = "CH_ROLLUP_INTERVAL";
/// Environment variable naming the task file.
pub const ENV_TASKS_FILE: &str = "CH_ROLLUP_TASKS_FILE";

pub(crate) fn default_copy_interval() -> Duration {
    DEFAULT_COPY_INTERVAL
}

/// Deserializes a humantime duration string such as `"24h"`.
pub(crate) fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
}

/// Scheduler settings taken from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Gap between the end of one cycle and the start of the next.
    pub interval: Duration,
    /// Task file to load, if configured.
    pub tasks_file: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SCHEDULER_INTERVAL,
            tasks_file: None,
        }
    }
}

impl SchedulerConfig {
    /// Reads `CH_ROLLUP_INTERVAL` and `CH_ROLLUP_TASKS_FILE`.
    pub fn from_env() -> Result<Self> {
        Self::from_values(
            std::env::var(ENV_INTERVAL).ok(),
            std::env::var(ENV_TASKS_FILE).ok(),
        )
    }

    fn from_values(interval: Option<String>, tasks_file: Option<String>) -> Result<Self> {
        let interval = parse_duration(interval, DEFAULT_SCHEDULER_INTERVAL)
            .with_context(|| format!("invalid {ENV_INTERVAL}"))?;
        if interval.is_zero() {
            anyhow::bail!("{ENV_INTERVAL} must be greater than 0");
        }
        let tasks_file = tasks_file
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map(PathBuf::from);
        Ok(Self {
            interval,
            tasks_file,
        })
    }
}

fn parse_duration(raw: Option<String>, default: Duration) -> Result<Duration> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => humantime::parse_duration(value)
            .with_context(|| format!("parse duration {value:?}")),
    }
}

/// Parses and validates tasks from JSON text.
pub fn parse_tasks(json: &str) -> Result<Vec<Task>> {
    let tasks: Vec<Task> = serde_json::from_str(json).context("decode tasks json")?;
    validate_tasks(&tasks).context("validate tasks")?;
    Ok(tasks)
}

/// Loads and validates tasks from a JSON file.
pub fn load_tasks(path: &Path) -> Result<Vec<Task>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read tasks file {}", path.display()))?;
    parse_tasks(&raw).with_context(|| format!("load tasks from {}", path.display()))
}
