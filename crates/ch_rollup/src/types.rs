//! Rollup task configuration and its validation.
//!
//! A [`Task`] names one source table. Each of its [`RollUpSetting`]s is an
//! independent rollup stream: "aggregate rows older than `after` into
//! `interval`-wide buckets". Column settings declared on the task apply to
//! every stream; a stream may override individual columns by name.

use std::time::Duration;

use serde::Deserialize;

use crate::config::{de_duration, default_copy_interval};
use crate::error::ConfigError;
use crate::sql::validate_entity_name;

/// One table to keep rolled up.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Task {
    /// Database holding the table.
    pub database: String,
    /// Table to roll up in place.
    pub table: String,
    /// Partition width of the table; rollup windows are aligned to it.
    #[serde(deserialize_with = "de_duration")]
    pub partition_key: Duration,
    /// Maximum window copied by a single aggregation statement; zero selects
    /// the 1h default.
    #[serde(
        default = "default_copy_interval",
        deserialize_with = "de_duration"
    )]
    pub copy_interval: Duration,
    /// Streams to run for this table.
    #[serde(default)]
    pub rollup_settings: Vec<RollUpSetting>,
    /// Columns shared by every stream.
    #[serde(default)]
    pub column_settings: Vec<ColumnSetting>,
}

/// One rollup stream of a task.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RollUpSetting {
    /// Minimum age of rows before they are rolled up.
    #[serde(deserialize_with = "de_duration")]
    pub after: Duration,
    /// Width of the buckets rows are aggregated into.
    #[serde(deserialize_with = "de_duration")]
    pub interval: Duration,
    /// Per-stream overrides of the task columns, matched by name.
    #[serde(default)]
    pub column_settings: Vec<ColumnSetting>,
}

/// How one column is carried into the rolled-up rows.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ColumnSetting {
    pub name: String,
    /// Marks the column rows are bucketed by.
    #[serde(default)]
    pub is_rollup_time: bool,
    /// Aggregate expression producing the column, e.g. `sumMerge(counter)`.
    #[serde(default)]
    pub expression: Option<String>,
}

impl ColumnSetting {
    /// A grouped passthrough column.
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// The bucketing time column.
    pub fn rollup_time(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_rollup_time: true,
            expression: None,
        }
    }

    /// A column computed by an aggregate expression.
    pub fn aggregate(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_rollup_time: false,
            expression: Some(expression.into()),
        }
    }

    /// The expression, treating an empty string as absent.
    pub fn expression(&self) -> Option<&str> {
        self.expression.as_deref().filter(|expr| !expr.is_empty())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_entity_name("column", &self.name)
    }
}

/// Validates every task, stopping at the first failure.
pub fn validate_tasks(tasks: &[Task]) -> Result<(), ConfigError> {
    tasks.iter().try_for_each(Task::validate)
}

impl Task {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_entity_name("table", &self.table)?;
        validate_entity_name("database", &self.database)?;
        require_positive("partition_key", self.partition_key)?;

        let mut time_column: Option<&str> = None;
        for column in &self.column_settings {
            column.validate()?;
            if !column.is_rollup_time {
                continue;
            }
            if let Some(first) = time_column {
                return Err(ConfigError::ManyTimeColumns {
                    first: first.to_string(),
                    second: column.name.clone(),
                });
            }
            time_column = Some(&column.name);
        }
        let time_column = time_column.ok_or(ConfigError::TimeColumnNotFound)?;

        for setting in &self.rollup_settings {
            setting.validate(time_column)?;
        }
        Ok(())
    }

    /// Name of the task's bucketing column, if declared.
    pub fn rollup_time_column(&self) -> Option<&str> {
        time_column_name(&self.column_settings)
    }
}

impl RollUpSetting {
    /// Validates the stream against the task's time column name.
    pub fn validate(&self, rollup_time_column: &str) -> Result<(), ConfigError> {
        require_whole_seconds("after", self.after)?;
        require_whole_seconds("interval", self.interval)?;
        for column in &self.column_settings {
            column.validate()?;
            if column.is_rollup_time || column.name == rollup_time_column {
                return Err(ConfigError::UnexpectedTimeColumn {
                    name: column.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Task columns with this stream's overrides applied.
    ///
    /// Overridden columns keep their task position; overrides for columns the
    /// task does not declare are appended in override order. Later duplicates
    /// replace earlier ones.
    pub fn effective_columns(&self, global: &[ColumnSetting]) -> Vec<ColumnSetting> {
        let mut merged: Vec<ColumnSetting> =
            Vec::with_capacity(global.len() + self.column_settings.len());
        for column in global.iter().chain(&self.column_settings) {
            match merged.iter_mut().find(|existing| existing.name == column.name) {
                Some(existing) => *existing = column.clone(),
                None => merged.push(column.clone()),
            }
        }
        merged
    }
}

/// First column flagged as the rollup time column.
pub fn time_column_name(columns: &[ColumnSetting]) -> Option<&str> {
    columns
        .iter()
        .find(|column| column.is_rollup_time)
        .map(|column| column.name.as_str())
}

pub(crate) fn require_positive(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::NonPositive { field, value });
    }
    Ok(())
}

/// Durations stored or rendered in whole seconds must be at least 1s.
pub(crate) fn require_whole_seconds(
    field: &'static str,
    value: Duration,
) -> Result<(), ConfigError> {
    require_positive(field, value)?;
    if value < Duration::from_secs(1) {
        return Err(ConfigError::SubSecond { field, value });
    }
    Ok(())
}
