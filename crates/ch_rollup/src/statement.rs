//! Generation of the aggregation statement that fills a staging table.
//!
//! The statement selects one window of the source table, buckets the time
//! column to the stream interval and groups by every non-aggregated column:
//!
//! ```text
//! INSERT INTO "db"."staging" ("a", "b", "t")
//! SELECT "a", max(b), toStartOfInterval("t", INTERVAL 3600 SECOND) as "t"
//! FROM "db"."source" WHERE "source"."t" >= ? AND "source"."t" < ?
//! GROUP BY "a", "t"
//! ```
//!
//! The two placeholders are bound to the window bounds at execution time.
//! Identifiers are interpolated quoted and must be validated beforehand;
//! aggregate expressions are trusted configuration and emitted verbatim.

use std::fmt;
use std::time::Duration;

use crate::sql::{quoted_database_entity, quoted_entity};
use crate::time_range::seconds;
use crate::types::{time_column_name, ColumnSetting};

/// Inputs of one aggregation statement. All names must be validated.
#[derive(Debug, Clone, Copy)]
pub struct RollUpStatement<'a> {
    pub database: &'a str,
    pub from_table: &'a str,
    pub to_table: &'a str,
    pub interval: Duration,
    pub columns: &'a [ColumnSetting],
}

impl RollUpStatement<'_> {
    /// Renders the statement text.
    pub fn build(&self) -> String {
        let mut sql = String::new();
        // Writing into a String cannot fail.
        let _ = self.write(&mut sql);
        sql
    }

    fn write(&self, w: &mut dyn fmt::Write) -> fmt::Result {
        let time_column = time_column_name(self.columns).unwrap_or_default();

        write!(
            w,
            "INSERT INTO {} (",
            quoted_database_entity(self.database, self.to_table)
        )?;
        write_list(w, self.columns.iter().map(|column| quoted_entity(&column.name)))?;

        w.write_str(") SELECT ")?;
        write_list(
            w,
            self.columns
                .iter()
                .map(|column| self.select_item(column, time_column)),
        )?;

        let time_ref = quoted_database_entity(self.from_table, time_column);
        write!(
            w,
            " FROM {} WHERE {time_ref} >= ? AND {time_ref} < ? GROUP BY ",
            quoted_database_entity(self.database, self.from_table)
        )?;
        write_list(
            w,
            self.columns
                .iter()
                .filter(|column| column.expression().is_none())
                .map(|column| quoted_entity(&column.name)),
        )
    }

    fn select_item(&self, column: &ColumnSetting, time_column: &str) -> String {
        if column.is_rollup_time {
            return interval_expression(time_column, self.interval);
        }
        match column.expression() {
            Some(expression) => expression.to_string(),
            None => quoted_entity(&column.name),
        }
    }
}

/// Buckets `time_column` to the start of `interval`-second windows.
fn interval_expression(time_column: &str, interval: Duration) -> String {
    let column = quoted_entity(time_column);
    format!(
        "toStartOfInterval({column}, INTERVAL {} SECOND) as {column}",
        seconds(interval)
    )
}

fn write_list(w: &mut dyn fmt::Write, items: impl Iterator<Item = String>) -> fmt::Result {
    for (idx, item) in items.enumerate() {
        if idx > 0 {
            w.write_str(", ")?;
        }
        w.write_str(&item)?;
    }
    Ok(())
}
