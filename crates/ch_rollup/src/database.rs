//! Store capabilities the rollup engine is written against.
//!
//! The engine never opens connections itself. A driver adapter implements
//! [`Shard`] for one node of the store and [`Cluster`] for the set of shards a
//! rollup should touch. Every error those methods return should go through an
//! [`ErrorClassifier`](crate::classify::ErrorClassifier) so the engine can
//! recognise the two store conditions it heals locally; wrapping a shard in
//! [`ClassifiedShard`](crate::classify::ClassifiedShard) does that.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::classify::{ClassifiedShard, ErrorClassifier};

/// A bound query parameter or a decoded column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    String(String),
    UInt64(u64),
    DateTime(DateTime<Utc>),
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<u64> for SqlValue {
    fn from(value: u64) -> Self {
        Self::UInt64(value)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::DateTime(value)
    }
}

/// Conversion from a decoded column value into a Rust type.
pub trait FromSqlValue: Sized {
    fn from_sql_value(value: &SqlValue) -> Result<Self>;
}

impl FromSqlValue for String {
    fn from_sql_value(value: &SqlValue) -> Result<Self> {
        match value {
            SqlValue::String(value) => Ok(value.clone()),
            other => Err(anyhow!("expected String column, got {other:?}")),
        }
    }
}

impl FromSqlValue for u64 {
    fn from_sql_value(value: &SqlValue) -> Result<Self> {
        match value {
            SqlValue::UInt64(value) => Ok(*value),
            other => Err(anyhow!("expected UInt64 column, got {other:?}")),
        }
    }
}

impl FromSqlValue for DateTime<Utc> {
    fn from_sql_value(value: &SqlValue) -> Result<Self> {
        match value {
            SqlValue::DateTime(value) => Ok(*value),
            other => Err(anyhow!("expected DateTime column, got {other:?}")),
        }
    }
}

/// One decoded result row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    values: Vec<SqlValue>,
}

impl Row {
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Decodes column `index` as `T`.
    pub fn get<T: FromSqlValue>(&self, index: usize) -> Result<T> {
        let value = self
            .values
            .get(index)
            .ok_or_else(|| anyhow!("column {index} out of range ({} columns)", self.values.len()))?;
        T::from_sql_value(value)
    }
}

/// Forward-only cursor over a query result.
///
/// Usage mirrors database/sql style drivers: call [`Rows::advance`] until it
/// returns `false`, [`Rows::scan`] the current row after each successful
/// advance, then check [`Rows::err`] for a terminal streaming error and
/// [`Rows::close`] the cursor.
#[async_trait]
pub trait Rows: Send {
    /// Moves to the next row; `false` once exhausted or on a streaming error.
    async fn advance(&mut self) -> bool;
    /// Decodes the current row.
    fn scan(&mut self) -> Result<Row>;
    /// Releases the cursor.
    async fn close(&mut self) -> Result<()>;
    /// Terminal error that stopped iteration, if any.
    fn err(&mut self) -> Result<()>;
}

/// One node of the store the rollup runs against.
#[async_trait]
pub trait Shard: Send + Sync {
    /// Human-readable shard identity used in logs and errors.
    fn name(&self) -> &str;
    /// Executes a statement that returns no rows.
    async fn exec(&self, statement: &str, args: &[SqlValue]) -> Result<()>;
    /// Runs a query and returns a cursor over its rows.
    async fn query(&self, statement: &str, args: &[SqlValue]) -> Result<Box<dyn Rows>>;
    /// Runs a query expected to return at most one row; `None` when empty.
    async fn query_row(&self, statement: &str, args: &[SqlValue]) -> Result<Option<Row>>;
}

/// Source of the shards a rollup should run on.
///
/// Implementations may return a different shard set on every call.
#[async_trait]
pub trait Cluster: Send + Sync {
    async fn shards(&self) -> Result<Vec<Arc<dyn Shard>>>;
}

/// Fixed shard set, each shard wrapped with the same error classifier.
pub struct StaticCluster {
    shards: Vec<Arc<dyn Shard>>,
}

impl StaticCluster {
    pub fn new(shards: Vec<Arc<dyn Shard>>, classifier: Arc<dyn ErrorClassifier>) -> Self {
        let shards = shards
            .into_iter()
            .map(|shard| {
                Arc::new(ClassifiedShard::new(shard, classifier.clone())) as Arc<dyn Shard>
            })
            .collect();
        Self { shards }
    }
}

#[async_trait]
impl Cluster for StaticCluster {
    async fn shards(&self) -> Result<Vec<Arc<dyn Shard>>> {
        Ok(self.shards.clone())
    }
}
