//! Rollup engine: one rollup stream executed on every shard of a cluster.
//!
//! Per shard the engine walks a fixed sequence of steps:
//!
//! 1. read the stream checkpoint; with no checkpoint yet, record
//!    `now` truncated to the partition key as the baseline and stop (history
//!    older than the first run is never rolled up);
//! 2. compute the target `now - after` truncated to the partition key and
//!    stop if it is not past the checkpoint;
//! 3. create the staging table as a copy of the source table structure,
//!    dropping and recreating it once if a crashed cycle left it behind;
//! 4. fill it with one aggregation statement per `copy_interval` window of
//!    `[checkpoint, target)`;
//! 5. replace every staging partition into the source table;
//! 6. drop the staging table, whatever happened in 4–5;
//! 7. append the new checkpoint.
//!
//! Shards run concurrently; the first failing shard cancels the others.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_COPY_INTERVAL;
use crate::database::{Cluster, Shard};
use crate::error::{query_error_kind, ConfigError, QueryErrorKind};
use crate::meta_info::{self, MetaInfoKey};
use crate::partitions;
use crate::scheduler::RollUp;
use crate::sql::validate_entity_name;
use crate::statement::RollUpStatement;
use crate::tables;
use crate::time_range::{to_time_delta, truncate, TimeRange};
use crate::types::{require_positive, require_whole_seconds, time_column_name, ColumnSetting};

/// Source of the current time, replaceable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Everything needed to run one rollup stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub database: String,
    pub table: String,
    /// Staging table, created and dropped within one run.
    pub temp_table: String,
    pub partition_key: Duration,
    /// Effective columns of the stream, in statement order.
    pub columns: Vec<ColumnSetting>,
    pub interval: Duration,
    pub after: Duration,
    /// Zero selects the 1h default.
    pub copy_interval: Duration,
}

impl RunOptions {
    fn with_defaults(mut self) -> Self {
        if self.copy_interval.is_zero() {
            self.copy_interval = DEFAULT_COPY_INTERVAL;
        }
        self
    }

    /// Checks names, durations and the presence of a time column.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_entity_name("database", &self.database)?;
        validate_entity_name("table", &self.table)?;
        validate_entity_name("temp table", &self.temp_table)?;
        require_positive("partition_key", self.partition_key)?;
        require_whole_seconds("interval", self.interval)?;
        require_whole_seconds("after", self.after)?;
        require_positive("copy_interval", self.copy_interval)?;
        for column in &self.columns {
            column.validate()?;
        }
        if time_column_name(&self.columns).is_none() {
            return Err(ConfigError::TimeColumnNotFound);
        }
        Ok(())
    }

    fn meta_info_key(&self) -> MetaInfoKey {
        MetaInfoKey {
            database: self.database.clone(),
            table: self.table.clone(),
            after: self.after,
            interval: self.interval,
        }
    }
}

/// Runs rollup streams against a [`Cluster`].
pub struct RollUpEngine {
    cluster: Arc<dyn Cluster>,
    clock: Arc<dyn Clock>,
}

impl RollUpEngine {
    pub fn new(cluster: Arc<dyn Cluster>) -> Self {
        Self {
            cluster,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Runs one stream on every shard of the cluster.
    ///
    /// All shards run concurrently under a child of `cancel`. The first shard
    /// error cancels the remaining shards and is returned.
    pub async fn run(&self, cancel: &CancellationToken, opts: RunOptions) -> Result<()> {
        let opts = opts.with_defaults();
        opts.validate().context("validate rollup options")?;

        let shards = self.cluster.shards().await.context("get shards")?;
        let group = cancel.child_token();

        let mut pending = shards
            .iter()
            .map(|shard| {
                let group = &group;
                let opts = &opts;
                async move {
                    tokio::select! {
                        biased;
                        _ = group.cancelled() => {
                            Err(anyhow!("rollup on {} cancelled", shard.name()))
                        }
                        result = self.run_on_shard(shard.as_ref(), opts) => {
                            result.with_context(|| format!("run rollup on {}", shard.name()))
                        }
                    }
                }
            })
            .collect::<FuturesUnordered<_>>();

        while let Some(result) = pending.next().await {
            if let Err(err) = result {
                group.cancel();
                return Err(err);
            }
        }
        Ok(())
    }

    async fn run_on_shard(&self, shard: &dyn Shard, opts: &RunOptions) -> Result<()> {
        let key = opts.meta_info_key();
        let latest = match meta_info::latest_rollup(shard, &key).await {
            Ok(Some(latest)) => latest,
            Ok(None) => return self.bootstrap(shard, &key, opts).await,
            Err(err) if query_error_kind(&err) == Some(QueryErrorKind::UnknownTable) => {
                meta_info::ensure_meta_info_table(shard).await?;
                return self.bootstrap(shard, &key, opts).await;
            }
            Err(err) => return Err(err.context("read rollup checkpoint")),
        };

        let now = self.clock.now();
        let lagged = now
            .checked_sub_signed(to_time_delta(opts.after)?)
            .ok_or_else(|| anyhow!("rollup lag {:?} before {now} is out of range", opts.after))?;
        let target = truncate(lagged, opts.partition_key)?;
        if target <= latest {
            debug!(
                shard = shard.name(),
                database = %opts.database,
                table = %opts.table,
                checkpoint = %latest,
                "nothing new to roll up"
            );
            return Ok(());
        }

        self.create_staging_table(shard, opts).await?;
        let outcome = self
            .fill_and_publish(shard, opts, TimeRange::new(latest, target))
            .await;
        // A leftover staging table is dropped by the next cycle's create path.
        if let Err(err) = tables::drop_table(shard, &opts.database, &opts.temp_table).await {
            debug!(
                shard = shard.name(),
                temp_table = %opts.temp_table,
                error = %format!("{err:#}"),
                "staging table cleanup failed"
            );
        }
        outcome?;

        meta_info::add_meta_info(shard, &key, target)
            .await
            .context("commit rollup checkpoint")?;
        info!(
            shard = shard.name(),
            database = %opts.database,
            table = %opts.table,
            from = %latest,
            to = %target,
            "rolled up window"
        );
        Ok(())
    }

    async fn bootstrap(
        &self,
        shard: &dyn Shard,
        key: &MetaInfoKey,
        opts: &RunOptions,
    ) -> Result<()> {
        let baseline = truncate(self.clock.now(), opts.partition_key)?;
        meta_info::add_meta_info(shard, key, baseline)
            .await
            .context("write initial rollup checkpoint")?;
        info!(
            shard = shard.name(),
            database = %opts.database,
            table = %opts.table,
            baseline = %baseline,
            "initialized rollup checkpoint"
        );
        Ok(())
    }

    async fn create_staging_table(&self, shard: &dyn Shard, opts: &RunOptions) -> Result<()> {
        let created =
            tables::create_table_as(shard, &opts.database, &opts.table, &opts.temp_table).await;
        let Err(err) = created else {
            return Ok(());
        };
        if query_error_kind(&err) != Some(QueryErrorKind::TableAlreadyExists) {
            return Err(err);
        }

        warn!(
            shard = shard.name(),
            temp_table = %opts.temp_table,
            "staging table left by an interrupted run, recreating"
        );
        tables::drop_table(shard, &opts.database, &opts.temp_table).await?;
        tables::create_table_as(shard, &opts.database, &opts.table, &opts.temp_table).await
    }

    async fn fill_and_publish(
        &self,
        shard: &dyn Shard,
        opts: &RunOptions,
        window: TimeRange,
    ) -> Result<()> {
        let statement = RollUpStatement {
            database: &opts.database,
            from_table: &opts.table,
            to_table: &opts.temp_table,
            interval: opts.interval,
            columns: &opts.columns,
        }
        .build();

        for range in window.split_by(opts.copy_interval)? {
            shard
                .exec(&statement, &[range.from.into(), range.to.into()])
                .await
                .with_context(|| format!("copy rollup window [{}, {})", range.from, range.to))?;
        }

        let partitions =
            partitions::list_active_partitions(shard, &opts.database, &opts.temp_table)
                .await
                .with_context(|| format!("get {}.{} partitions", opts.database, opts.temp_table))?;
        partitions::replace_partitions(
            shard,
            &opts.database,
            &opts.temp_table,
            &opts.table,
            &partitions,
        )
        .await
        .with_context(|| {
            format!(
                "replace partitions from {db}.{from} to {db}.{to}",
                db = opts.database,
                from = opts.temp_table,
                to = opts.table
            )
        })?;
        info!(
            shard = shard.name(),
            table = %opts.table,
            partitions = partitions.len(),
            "published staging partitions"
        );
        Ok(())
    }
}

#[async_trait]
impl RollUp for RollUpEngine {
    async fn run(&self, cancel: &CancellationToken, opts: RunOptions) -> Result<()> {
        RollUpEngine::run(self, cancel, opts).await
    }
}
