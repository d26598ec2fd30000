//! Store-error classification.
//!
//! Drivers report failures in their own error types. The engine only needs to
//! know whether a failure means "unknown table" or "table already exists", so
//! a per-dialect [`ErrorClassifier`] maps native errors to a
//! [`QueryErrorKind`] and [`ClassifiedShard`] applies it to everything a
//! shard, its cursors and its single-row results return.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::database::{Row, Rows, Shard, SqlValue};
use crate::error::{query_error_kind, QueryError, QueryErrorKind};

/// ClickHouse server code for `UNKNOWN_TABLE`.
pub const CLICKHOUSE_UNKNOWN_TABLE: i32 = 60;
/// ClickHouse server code for `TABLE_ALREADY_EXISTS`.
pub const CLICKHOUSE_TABLE_ALREADY_EXISTS: i32 = 57;

/// Maps a native store error to a kind the engine reacts to.
pub trait ErrorClassifier: Send + Sync {
    /// `None` leaves the error untouched.
    fn classify(&self, err: &anyhow::Error) -> Option<QueryErrorKind>;
}

impl<F> ErrorClassifier for F
where
    F: Fn(&anyhow::Error) -> Option<QueryErrorKind> + Send + Sync,
{
    fn classify(&self, err: &anyhow::Error) -> Option<QueryErrorKind> {
        self(err)
    }
}

/// Classifier that recognises nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl ErrorClassifier for PassThrough {
    fn classify(&self, _err: &anyhow::Error) -> Option<QueryErrorKind> {
        None
    }
}

/// Server-side exception as reported by a ClickHouse driver adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("code: {code}, message: {message}")]
pub struct ServerException {
    pub code: i32,
    pub message: String,
}

impl ServerException {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Classifies ClickHouse server exceptions by their numeric code.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClickHouseClassifier;

impl ErrorClassifier for ClickHouseClassifier {
    fn classify(&self, err: &anyhow::Error) -> Option<QueryErrorKind> {
        let exception = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<ServerException>())?;
        match exception.code {
            CLICKHOUSE_UNKNOWN_TABLE => Some(QueryErrorKind::UnknownTable),
            CLICKHOUSE_TABLE_ALREADY_EXISTS => Some(QueryErrorKind::TableAlreadyExists),
            _ => None,
        }
    }
}

/// Wraps `err` in a [`QueryError`] when the classifier recognises it.
pub fn classify_error(classifier: &dyn ErrorClassifier, err: anyhow::Error) -> anyhow::Error {
    if query_error_kind(&err).is_some() {
        return err;
    }
    match classifier.classify(&err) {
        Some(kind) => anyhow::Error::new(QueryError::new(kind, err)),
        None => err,
    }
}

/// Shard decorator that classifies every error the inner shard returns.
pub struct ClassifiedShard {
    inner: Arc<dyn Shard>,
    classifier: Arc<dyn ErrorClassifier>,
}

impl ClassifiedShard {
    pub fn new(inner: Arc<dyn Shard>, classifier: Arc<dyn ErrorClassifier>) -> Self {
        Self { inner, classifier }
    }

    fn wrap<T>(&self, result: Result<T>) -> Result<T> {
        result.map_err(|err| classify_error(self.classifier.as_ref(), err))
    }
}

#[async_trait]
impl Shard for ClassifiedShard {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn exec(&self, statement: &str, args: &[SqlValue]) -> Result<()> {
        self.wrap(self.inner.exec(statement, args).await)
    }

    async fn query(&self, statement: &str, args: &[SqlValue]) -> Result<Box<dyn Rows>> {
        let rows = self.wrap(self.inner.query(statement, args).await)?;
        Ok(Box::new(ClassifiedRows {
            inner: rows,
            classifier: self.classifier.clone(),
        }))
    }

    async fn query_row(&self, statement: &str, args: &[SqlValue]) -> Result<Option<Row>> {
        self.wrap(self.inner.query_row(statement, args).await)
    }
}

struct ClassifiedRows {
    inner: Box<dyn Rows>,
    classifier: Arc<dyn ErrorClassifier>,
}

impl ClassifiedRows {
    fn wrap<T>(&self, result: Result<T>) -> Result<T> {
        result.map_err(|err| classify_error(self.classifier.as_ref(), err))
    }
}

#[async_trait]
impl Rows for ClassifiedRows {
    async fn advance(&mut self) -> bool {
        self.inner.advance().await
    }

    fn scan(&mut self) -> Result<Row> {
        let result = self.inner.scan();
        self.wrap(result)
    }

    async fn close(&mut self) -> Result<()> {
        let result = self.inner.close().await;
        self.wrap(result)
    }

    fn err(&mut self) -> Result<()> {
        let result = self.inner.err();
        self.wrap(result)
    }
}
