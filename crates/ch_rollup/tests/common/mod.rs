//! Shared helpers for integration tests.
//!
//! [`FakeShard`] is a small in-memory model of a ClickHouse node: it tracks
//! which tables exist, the checkpoint table contents and the partitions
//! written into each table. Failures are raised as [`ServerException`]s so
//! they go through the same classifier a real driver adapter would use.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use ch_rollup::classify::{CLICKHOUSE_TABLE_ALREADY_EXISTS, CLICKHOUSE_UNKNOWN_TABLE};
use ch_rollup::{
    Clock, ClickHouseClassifier, ColumnSetting, Row, Rows, RunOptions, ServerException, Shard,
    SqlValue, StaticCluster,
};

pub const HOUR: Duration = Duration::from_secs(3600);

/// Server code used for failures the engine must not heal.
pub const MEMORY_LIMIT_EXCEEDED: i32 = 241;

/// One recorded shard call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub statement: String,
    pub args: Vec<SqlValue>,
}

/// One stored checkpoint row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub database: String,
    pub table: String,
    pub after_sec: u64,
    pub interval_sec: u64,
    pub roll_ups_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    meta_table: bool,
    checkpoints: Vec<Checkpoint>,
    /// Unquoted `database.table` names.
    tables: BTreeSet<String>,
    partitions: BTreeMap<String, BTreeSet<String>>,
    replaced: Vec<String>,
    calls: Vec<Call>,
    closed_cursors: usize,
    failures: Vec<FailRule>,
    scan_failure: Option<i32>,
    cursor_failure: Option<i32>,
}

#[derive(Debug)]
struct FailRule {
    prefix: String,
    code: i32,
    /// Matching calls let through before the rule starts failing.
    skip: usize,
}

/// In-memory shard; clones share state.
#[derive(Clone)]
pub struct FakeShard {
    name: String,
    state: Arc<Mutex<State>>,
}

impl FakeShard {
    /// A shard whose checkpoint table exists and holds `events`.
    pub fn new(name: &str) -> Self {
        let shard = Self::without_meta_table(name);
        {
            let mut state = shard.state.lock().unwrap();
            state.meta_table = true;
        }
        shard
    }

    /// A shard that has never seen a rollup.
    pub fn without_meta_table(name: &str) -> Self {
        let mut state = State::default();
        state.tables.insert("default.events".to_string());
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Fails every statement starting with `prefix` with `code`.
    pub fn fail_on(&self, prefix: &str, code: i32) {
        self.fail_on_after(prefix, 0, code);
    }

    /// Lets `skip` statements starting with `prefix` through, then fails the
    /// rest with `code`.
    pub fn fail_on_after(&self, prefix: &str, skip: usize, code: i32) {
        self.state.lock().unwrap().failures.push(FailRule {
            prefix: prefix.to_string(),
            code,
            skip,
        });
    }

    /// Makes every cursor row fail to decode.
    pub fn fail_scans(&self, code: i32) {
        self.state.lock().unwrap().scan_failure = Some(code);
    }

    /// Makes every cursor report a terminal error once exhausted.
    pub fn fail_cursors(&self, code: i32) {
        self.state.lock().unwrap().cursor_failure = Some(code);
    }

    pub fn add_table(&self, name: &str) {
        self.state.lock().unwrap().tables.insert(name.to_string());
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.state.lock().unwrap().tables.contains(name)
    }

    pub fn has_meta_table(&self) -> bool {
        self.state.lock().unwrap().meta_table
    }

    pub fn add_checkpoint(&self, opts: &RunOptions, at: DateTime<Utc>) {
        self.state.lock().unwrap().checkpoints.push(Checkpoint {
            database: opts.database.clone(),
            table: opts.table.clone(),
            after_sec: opts.after.as_secs(),
            interval_sec: opts.interval.as_secs(),
            roll_ups_at: at,
        });
    }

    pub fn checkpoints(&self) -> Vec<Checkpoint> {
        self.state.lock().unwrap().checkpoints.clone()
    }

    pub fn latest_checkpoint(&self) -> Option<DateTime<Utc>> {
        self.checkpoints()
            .into_iter()
            .map(|checkpoint| checkpoint.roll_ups_at)
            .max()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Recorded calls whose statement starts with `prefix`.
    pub fn calls_starting_with(&self, prefix: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| call.statement.starts_with(prefix))
            .collect()
    }

    pub fn replaced_partitions(&self) -> Vec<String> {
        self.state.lock().unwrap().replaced.clone()
    }

    pub fn closed_cursors(&self) -> usize {
        self.state.lock().unwrap().closed_cursors
    }

    fn record(&self, statement: &str, args: &[SqlValue]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call {
            statement: statement.to_string(),
            args: args.to_vec(),
        });
        let Some(rule) = state
            .failures
            .iter_mut()
            .find(|rule| statement.starts_with(rule.prefix.as_str()))
        else {
            return Ok(());
        };
        if rule.skip > 0 {
            rule.skip -= 1;
            return Ok(());
        }
        Err(exception(rule.code, "injected failure"))
    }
}

fn exception(code: i32, message: &str) -> anyhow::Error {
    anyhow::Error::new(ServerException::new(code, message))
}

/// `"db"."table" ...` -> `db.table`.
fn entity(rest: &str) -> String {
    rest.split_whitespace()
        .next()
        .unwrap_or_default()
        .replace('"', "")
}

/// Partition id the fake assigns to rows starting at `at`.
pub fn partition_of(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H").to_string()
}

#[async_trait]
impl Shard for FakeShard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exec(&self, statement: &str, args: &[SqlValue]) -> Result<()> {
        self.record(statement, args)?;
        let mut state = self.state.lock().unwrap();

        if statement.starts_with("CREATE TABLE IF NOT EXISTS rollup_meta_info") {
            state.meta_table = true;
        } else if statement.starts_with("INSERT INTO rollup_meta_info") {
            if !state.meta_table {
                return Err(exception(CLICKHOUSE_UNKNOWN_TABLE, "rollup_meta_info"));
            }
            let checkpoint = match args {
                [SqlValue::String(database), SqlValue::String(table), SqlValue::UInt64(after_sec), SqlValue::UInt64(interval_sec), SqlValue::DateTime(roll_ups_at)] => {
                    Checkpoint {
                        database: database.clone(),
                        table: table.clone(),
                        after_sec: *after_sec,
                        interval_sec: *interval_sec,
                        roll_ups_at: *roll_ups_at,
                    }
                }
                other => return Err(anyhow!("unexpected checkpoint args {other:?}")),
            };
            state.checkpoints.push(checkpoint);
        } else if let Some(rest) = statement.strip_prefix("CREATE TABLE ") {
            let name = entity(rest);
            if !state.tables.insert(name.clone()) {
                return Err(exception(CLICKHOUSE_TABLE_ALREADY_EXISTS, &name));
            }
        } else if let Some(rest) = statement.strip_prefix("DROP TABLE ") {
            let name = entity(rest);
            if !state.tables.remove(&name) {
                return Err(exception(CLICKHOUSE_UNKNOWN_TABLE, &name));
            }
            state.partitions.remove(&name);
        } else if let Some(rest) = statement.strip_prefix("INSERT INTO ") {
            let name = entity(rest);
            if !state.tables.contains(&name) {
                return Err(exception(CLICKHOUSE_UNKNOWN_TABLE, &name));
            }
            let Some(SqlValue::DateTime(from)) = args.first() else {
                return Err(anyhow!("unexpected window args {args:?}"));
            };
            state
                .partitions
                .entry(name)
                .or_default()
                .insert(partition_of(*from));
        } else if statement.starts_with("ALTER TABLE ") {
            let Some(SqlValue::String(partition)) = args.first() else {
                return Err(anyhow!("unexpected partition args {args:?}"));
            };
            state.replaced.push(partition.clone());
        } else {
            return Err(anyhow!("unsupported statement {statement}"));
        }
        Ok(())
    }

    async fn query(&self, statement: &str, args: &[SqlValue]) -> Result<Box<dyn Rows>> {
        self.record(statement, args)?;
        if !statement.starts_with("SELECT partition FROM system.parts") {
            return Err(anyhow!("unsupported query {statement}"));
        }
        let [SqlValue::String(database), SqlValue::String(table), SqlValue::UInt64(1)] = args
        else {
            return Err(anyhow!("unexpected partition query args {args:?}"));
        };
        let state = self.state.lock().unwrap();
        let rows = state
            .partitions
            .get(&format!("{database}.{table}"))
            .into_iter()
            .flatten()
            .map(|partition| Row::new(vec![SqlValue::from(partition.as_str())]))
            .collect();
        Ok(Box::new(VecRows {
            rows,
            current: None,
            state: self.state.clone(),
        }))
    }

    async fn query_row(&self, statement: &str, args: &[SqlValue]) -> Result<Option<Row>> {
        self.record(statement, args)?;
        if !statement.starts_with("SELECT max(roll_ups_at) FROM rollup_meta_info") {
            return Err(anyhow!("unsupported query {statement}"));
        }
        let state = self.state.lock().unwrap();
        if !state.meta_table {
            return Err(exception(CLICKHOUSE_UNKNOWN_TABLE, "rollup_meta_info"));
        }
        let latest = state
            .checkpoints
            .iter()
            .filter(|checkpoint| {
                args == [
                    SqlValue::from(checkpoint.database.as_str()),
                    SqlValue::from(checkpoint.table.as_str()),
                    SqlValue::from(checkpoint.after_sec),
                    SqlValue::from(checkpoint.interval_sec),
                ]
            })
            .map(|checkpoint| checkpoint.roll_ups_at)
            .max();
        Ok(latest.map(|at| Row::new(vec![SqlValue::from(at)])))
    }
}

struct VecRows {
    rows: VecDeque<Row>,
    current: Option<Row>,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl Rows for VecRows {
    async fn advance(&mut self) -> bool {
        self.current = self.rows.pop_front();
        self.current.is_some()
    }

    fn scan(&mut self) -> Result<Row> {
        if let Some(code) = self.state.lock().unwrap().scan_failure {
            return Err(exception(code, "cannot decode row"));
        }
        self.current
            .clone()
            .ok_or_else(|| anyhow!("scan without a current row"))
    }

    async fn close(&mut self) -> Result<()> {
        self.state.lock().unwrap().closed_cursors += 1;
        Ok(())
    }

    fn err(&mut self) -> Result<()> {
        match self.state.lock().unwrap().cursor_failure {
            Some(code) => Err(exception(code, "stream interrupted")),
            None => Ok(()),
        }
    }
}

/// Shard whose every call waits forever.
pub struct StuckShard;

#[async_trait]
impl Shard for StuckShard {
    fn name(&self) -> &str {
        "stuck"
    }

    async fn exec(&self, _statement: &str, _args: &[SqlValue]) -> Result<()> {
        std::future::pending().await
    }

    async fn query(&self, _statement: &str, _args: &[SqlValue]) -> Result<Box<dyn Rows>> {
        std::future::pending().await
    }

    async fn query_row(&self, _statement: &str, _args: &[SqlValue]) -> Result<Option<Row>> {
        std::future::pending().await
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
        })
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += TimeDelta::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

pub fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, day, hour, minute, 0).unwrap()
}

/// Cluster of `shards`, classified as ClickHouse.
pub fn cluster(shards: Vec<Arc<dyn Shard>>) -> Arc<StaticCluster> {
    Arc::new(StaticCluster::new(shards, Arc::new(ClickHouseClassifier)))
}

/// Options for `default.events` with hourly partitions and a 1h lag.
pub fn options() -> RunOptions {
    RunOptions {
        database: "default".to_string(),
        table: "events".to_string(),
        temp_table: "events_temp".to_string(),
        partition_key: HOUR,
        columns: vec![
            ColumnSetting::plain("host"),
            ColumnSetting::aggregate("value", "max(value)"),
            ColumnSetting::rollup_time("event_time"),
        ],
        interval: HOUR,
        after: HOUR,
        copy_interval: HOUR,
    }
}
