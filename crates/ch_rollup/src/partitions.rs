//! Discovery and atomic replacement of table partitions.
//!
//! A staging table is published partition by partition with
//! `ALTER TABLE ... REPLACE PARTITION`, which the store applies atomically per
//! partition. A publish interrupted halfway leaves some partitions replaced;
//! the next cycle regenerates the same staging partitions from the same
//! checkpoint and replaces all of them again.

use anyhow::{Context, Result};

use crate::database::{Rows, Shard, SqlValue};
use crate::sql::quoted_database_entity;

const SELECT_ACTIVE_PARTITIONS: &str = "SELECT partition FROM system.parts \
     WHERE database = ? AND table = ? AND active = ? GROUP BY partition";

/// Partition ids with at least one active part in `database.table`.
pub async fn list_active_partitions(
    shard: &dyn Shard,
    database: &str,
    table: &str,
) -> Result<Vec<String>> {
    let args = [
        SqlValue::from(database),
        SqlValue::from(table),
        SqlValue::from(1u64),
    ];
    let mut rows = shard.query(SELECT_ACTIVE_PARTITIONS, &args).await?;
    let result = collect_partitions(rows.as_mut()).await;
    // Close errors are irrelevant once every row was read or reading failed.
    let _ = rows.close().await;
    result
}

async fn collect_partitions(rows: &mut dyn Rows) -> Result<Vec<String>> {
    let mut partitions = Vec::new();
    while rows.advance().await {
        let row = rows.scan().context("scan partition row")?;
        partitions.push(row.get::<String>(0).context("decode partition id")?);
    }
    rows.err().context("iterate partitions")?;
    Ok(partitions)
}

/// Replaces each partition of `database.to` with its copy from `database.from`.
///
/// Partitions are replaced sequentially; the first failure stops the rest.
/// Table names must already be validated.
pub async fn replace_partitions(
    shard: &dyn Shard,
    database: &str,
    from: &str,
    to: &str,
    partitions: &[String],
) -> Result<()> {
    let statement = format!(
        "ALTER TABLE {} REPLACE PARTITION ? FROM {}",
        quoted_database_entity(database, to),
        quoted_database_entity(database, from)
    );
    for partition in partitions {
        shard
            .exec(&statement, &[SqlValue::from(partition.as_str())])
            .await
            .with_context(|| format!("replace partition {partition}"))?;
    }
    Ok(())
}
