//! Per-shard rollup checkpoints ("meta info").
//!
//! Every successful rollup appends one row recording how far a stream has
//! been rolled up. Rows are never updated or deleted; the current checkpoint
//! is the maximum over all rows of a stream, so duplicate or concurrent
//! appends are harmless and the checkpoint can only move forward.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::database::{Shard, SqlValue};
use crate::time_range::seconds;

/// Table holding checkpoint rows on every shard.
pub const META_INFO_TABLE: &str = "rollup_meta_info";

/// DDL for [`META_INFO_TABLE`]; safe to run repeatedly.
pub const META_INFO_TABLE_DEFINITION: &str = "CREATE TABLE IF NOT EXISTS rollup_meta_info(
    database String,
    table String,
    after_sec UInt64,
    interval_sec UInt64,
    roll_ups_at DateTime
) ENGINE = MergeTree() ORDER BY (database, table, after_sec, interval_sec, roll_ups_at)";

const SELECT_LATEST: &str = "SELECT max(roll_ups_at) FROM rollup_meta_info \
     WHERE database = ? AND table = ? AND after_sec = ? AND interval_sec = ? \
     GROUP BY database, table, after_sec, interval_sec";

const INSERT_META_INFO: &str = "INSERT INTO rollup_meta_info \
     (database, table, after_sec, interval_sec, roll_ups_at) VALUES (?, ?, ?, ?, ?)";

/// Identity of one rollup stream's progress.
///
/// Independent of the aggregated columns: changing a stream's column
/// settings continues from the same checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetaInfoKey {
    pub database: String,
    pub table: String,
    pub after: Duration,
    pub interval: Duration,
}

impl MetaInfoKey {
    fn args(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::from(self.database.as_str()),
            SqlValue::from(self.table.as_str()),
            SqlValue::from(seconds(self.after)),
            SqlValue::from(seconds(self.interval)),
        ]
    }
}

/// Latest rolled-up-to time of `key` on `shard`; `None` if the stream never ran.
pub async fn latest_rollup(
    shard: &dyn Shard,
    key: &MetaInfoKey,
) -> Result<Option<DateTime<Utc>>> {
    let row = shard.query_row(SELECT_LATEST, &key.args()).await?;
    row.map(|row| row.get::<DateTime<Utc>>(0))
        .transpose()
        .context("decode roll_ups_at")
}

/// Appends a checkpoint row for `key`.
pub async fn add_meta_info(
    shard: &dyn Shard,
    key: &MetaInfoKey,
    rolled_up_to: DateTime<Utc>,
) -> Result<()> {
    let mut args = key.args();
    args.push(SqlValue::from(rolled_up_to));
    shard.exec(INSERT_META_INFO, &args).await
}

/// Creates the checkpoint table if it does not exist yet.
pub async fn ensure_meta_info_table(shard: &dyn Shard) -> Result<()> {
    shard
        .exec(META_INFO_TABLE_DEFINITION, &[])
        .await
        .with_context(|| format!("create {META_INFO_TABLE}"))
}
