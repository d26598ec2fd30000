//! In-place rollup of ClickHouse tables.
//!
//! `ch_rollup` keeps high-resolution event tables bounded by periodically
//! replacing windows of old rows with an aggregated version of themselves:
//! - [`scheduler`] runs every configured stream on a fixed interval and
//!   reports one [`scheduler::Event`] per cycle,
//! - [`rollup`] executes one stream on every shard (checkpoint, staging copy,
//!   partition swap, checkpoint commit),
//! - [`meta_info`] stores per-shard checkpoints so repeated runs never
//!   reprocess rolled-up data.
//!
//! Connections are not part of this crate. A driver adapter implements
//! [`database::Shard`] and [`database::Cluster`] and classifies its errors
//! with a [`classify::ErrorClassifier`].
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use ch_rollup::{database::Cluster, rollup::RollUpEngine, scheduler::Scheduler};
//! # use ch_rollup::config::SchedulerConfig;
//! # async fn example(cluster: Arc<dyn Cluster>) -> anyhow::Result<()> {
//! let config = SchedulerConfig::from_env()?;
//! let scheduler = Scheduler::from_config(&config, Arc::new(RollUpEngine::new(cluster)))?;
//! let mut events = scheduler.run(tokio_util::sync::CancellationToken::new());
//! while let Some(event) = events.recv().await {
//!     tracing::info!(%event, "rollup cycle");
//! }
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod config;
pub mod database;
pub mod error;
pub mod meta_info;
pub mod partitions;
pub mod rollup;
pub mod scheduler;
pub mod sql;
pub mod statement;
pub mod tables;
pub mod time_range;
pub mod types;

pub use classify::{ClassifiedShard, ClickHouseClassifier, ErrorClassifier, ServerException};
pub use config::{load_tasks, SchedulerConfig};
pub use database::{Cluster, Row, Rows, Shard, SqlValue, StaticCluster};
pub use error::{ConfigError, QueryError, QueryErrorKind};
pub use rollup::{Clock, RollUpEngine, RunOptions, SystemClock};
pub use scheduler::{Event, EventType, RollUp, Scheduler};
pub use types::{ColumnSetting, RollUpSetting, Task};
