//! Table DDL used to manage the staging table.

use anyhow::{Context, Result};

use crate::database::Shard;
use crate::sql::{quoted_database_entity, validate_entity_name};

/// Creates `database.dst_table` with the structure of `database.src_table`.
pub async fn create_table_as(
    shard: &dyn Shard,
    database: &str,
    src_table: &str,
    dst_table: &str,
) -> Result<()> {
    validate_entity_name("database", database)?;
    validate_entity_name("table", src_table)?;
    validate_entity_name("table", dst_table)?;

    let statement = format!(
        "CREATE TABLE {} AS {}",
        quoted_database_entity(database, dst_table),
        quoted_database_entity(database, src_table)
    );
    shard
        .exec(&statement, &[])
        .await
        .with_context(|| format!("create table {dst_table} as {src_table} in {database}"))
}

/// Drops `database.table`.
pub async fn drop_table(shard: &dyn Shard, database: &str, table: &str) -> Result<()> {
    validate_entity_name("database", database)?;
    validate_entity_name("table", table)?;

    let statement = format!("DROP TABLE {}", quoted_database_entity(database, table));
    shard
        .exec(&statement, &[])
        .await
        .with_context(|| format!("drop table {table} in {database}"))
}
