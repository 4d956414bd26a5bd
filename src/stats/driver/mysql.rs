//! MySQL driver
//!
//! Same layout as the PostgreSQL driver with a native JSON column. `key`
//! is a reserved word here and is always quoted.

use super::{
    bind_key_values, decode_stored, merge_stored, table_name, where_clause, Driver, Identifier,
    JoinedIdentifier, WriteOp,
};
use crate::stats::error::StatsResult;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use std::time::Duration;
use tracing::debug;

pub struct MysqlDriver {
    pool: MySqlPool,
    table: String,
    mode: JoinedIdentifier,
    separator: String,
}

fn quote(column: &str) -> String {
    format!("`{}`", column)
}

impl MysqlDriver {
    /// Build a lazily connecting pool for `dsn`.
    pub fn connect(dsn: &str, table: &str, mode: JoinedIdentifier, separator: &str) -> StatsResult<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_lazy(dsn)?;

        Ok(Self {
            pool,
            table: table_name(table)?,
            mode,
            separator: separator.to_string(),
        })
    }

    fn columns(&self) -> String {
        self.mode
            .columns()
            .iter()
            .map(|c| quote(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn select_sql(&self) -> String {
        format!(
            "SELECT CAST(data AS CHAR) FROM {} WHERE {}",
            quote(&self.table),
            where_clause(self.mode, quote, |_| "?".to_string())
        )
    }

    fn upsert_sql(&self) -> String {
        let placeholders = vec!["?"; self.mode.columns().len()].join(", ");
        format!(
            "INSERT INTO {} ({}, data) VALUES ({}, CAST(? AS JSON)) ON DUPLICATE KEY UPDATE data = VALUES(data)",
            quote(&self.table),
            self.columns(),
            placeholders
        )
    }

    async fn apply(
        &self,
        op: WriteOp,
        identifiers: &[Identifier],
        values: &Map<String, Value>,
    ) -> StatsResult<()> {
        let select = format!("{} FOR UPDATE", self.select_sql());
        let upsert = self.upsert_sql();

        let mut tx = self.pool.begin().await?;
        for identifier in identifiers {
            let stored = identifier.join(self.mode, &self.separator);

            let existing: Option<String> =
                bind_key_values!(sqlx::query_scalar(&select), stored.bind_values())
                    .fetch_optional(&mut *tx)
                    .await?;
            let data = merge_stored(existing.as_deref(), op, values)?;

            bind_key_values!(sqlx::query(&upsert), stored.bind_values())
                .bind(data)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        debug!(table = %self.table, count = identifiers.len(), ?op, "mysql write");
        Ok(())
    }
}

#[async_trait]
impl Driver for MysqlDriver {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn target(&self) -> String {
        self.table.clone()
    }

    async fn inc(&self, identifiers: &[Identifier], values: &Map<String, Value>) -> StatsResult<()> {
        self.apply(WriteOp::Increment, identifiers, values).await
    }

    async fn set(&self, identifiers: &[Identifier], values: &Map<String, Value>) -> StatsResult<()> {
        self.apply(WriteOp::Set, identifiers, values).await
    }

    async fn get(&self, identifiers: &[Identifier]) -> StatsResult<Vec<Map<String, Value>>> {
        let select = self.select_sql();

        let mut out = Vec::with_capacity(identifiers.len());
        for identifier in identifiers {
            let stored = identifier.join(self.mode, &self.separator);
            let raw: Option<String> =
                bind_key_values!(sqlx::query_scalar(&select), stored.bind_values())
                    .fetch_optional(&self.pool)
                    .await?;
            out.push(match raw {
                Some(raw) => decode_stored(&raw)?,
                None => Map::new(),
            });
        }
        Ok(out)
    }

    async fn setup(&self) -> StatsResult<()> {
        let key_columns = match self.mode {
            JoinedIdentifier::Full => "`key` VARCHAR(255) NOT NULL",
            JoinedIdentifier::Partial => "`key` VARCHAR(255) NOT NULL, `at` BIGINT NOT NULL",
            JoinedIdentifier::Separated => {
                "`key` VARCHAR(255) NOT NULL, `granularity` VARCHAR(64) NOT NULL, `at` BIGINT NOT NULL"
            }
        };
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({}, data JSON NOT NULL, PRIMARY KEY ({}))",
            quote(&self.table),
            key_columns,
            self.columns()
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }
}
