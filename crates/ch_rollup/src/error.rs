//! Typed error taxonomy.
//!
//! Most of the crate propagates `anyhow::Error` with context attached at each
//! layer. Two families are typed so callers can match on them through an
//! anyhow chain:
//! - [`ConfigError`]: configuration rejected before any I/O happens;
//! - [`QueryError`]: store errors a classifier recognised, which drive the
//!   engine's self-healing paths.

use std::fmt;
use std::time::Duration;

/// Store error categories the rollup engine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryErrorKind {
    /// The referenced table does not exist (ClickHouse code 60).
    UnknownTable,
    /// The table being created already exists (ClickHouse code 57).
    TableAlreadyExists,
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTable => f.write_str("UnknownTable"),
            Self::TableAlreadyExists => f.write_str("TableAlreadyExists"),
        }
    }
}

/// A store error tagged with the category it was classified into.
///
/// Errors a classifier does not recognise are never wrapped, so the presence
/// of a `QueryError` in a chain always carries a meaningful kind.
#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct QueryError {
    pub kind: QueryErrorKind,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl QueryError {
    pub fn new(kind: QueryErrorKind, source: anyhow::Error) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }
}

/// Returns the classified kind of the first [`QueryError`] in the chain.
pub fn query_error_kind(err: &anyhow::Error) -> Option<QueryErrorKind> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<QueryError>())
        .map(|query_err| query_err.kind)
}

/// Configuration rejected by validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{what} name {name:?} must contain only letters, numbers and underscores and start with a letter or underscore (max 64 chars)")]
    InvalidName { what: &'static str, name: String },
    #[error("{field} must be greater than 0 (got {value:?})")]
    NonPositive { field: &'static str, value: Duration },
    #[error("{field} must be at least 1s (got {value:?})")]
    SubSecond { field: &'static str, value: Duration },
    #[error("only one rollup time column allowed (found {first:?} and {second:?})")]
    ManyTimeColumns { first: String, second: String },
    #[error("column with is_rollup_time not found")]
    TimeColumnNotFound,
    #[error("rollup time column can be defined only in global settings (override {name:?})")]
    UnexpectedTimeColumn { name: String },
}
