//! Embedded SQLite driver
//!
//! One connection behind a mutex; writes run inside a transaction so a
//! read-modify-write of a bucket is atomic.

use super::{
    decode_stored, merge_stored, table_name, where_clause, Driver, Identifier, JoinedIdentifier,
    SqlValue, WriteOp,
};
use crate::stats::error::{StatsError, StatsResult};
use async_trait::async_trait;
use rusqlite::{params_from_iter, Connection, OpenFlags, OptionalExtension};
use serde_json::{Map, Value};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Path that opens a private in-memory database
pub const MEMORY_PATH: &str = ":memory:";

pub struct SqliteDriver {
    conn: Mutex<Connection>,
    table: String,
    mode: JoinedIdentifier,
    separator: String,
}

impl SqliteDriver {
    /// Open (or create) the database file at `path`.
    pub fn open(path: &str, table: &str, mode: JoinedIdentifier, separator: &str) -> StatsResult<Self> {
        let conn = if path.trim() == MEMORY_PATH {
            Connection::open_in_memory()?
        } else {
            Connection::open_with_flags(
                path.trim(),
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        };
        conn.busy_timeout(Duration::from_secs(5))?;

        Ok(Self {
            conn: Mutex::new(conn),
            table: table_name(table)?,
            mode,
            separator: separator.to_string(),
        })
    }

    fn lock(&self) -> StatsResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StatsError::Lock(e.to_string()))
    }

    fn select_sql(&self) -> String {
        format!(
            "SELECT data FROM {} WHERE {}",
            self.table,
            where_clause(self.mode, |c| c.to_string(), |_| "?".to_string())
        )
    }

    fn upsert_sql(&self) -> String {
        let columns = self.mode.columns().join(", ");
        let placeholders = vec!["?"; self.mode.columns().len() + 1].join(", ");
        format!(
            "INSERT INTO {table} ({columns}, data) VALUES ({placeholders})
             ON CONFLICT ({columns}) DO UPDATE SET data = excluded.data",
            table = self.table,
            columns = columns,
            placeholders = placeholders,
        )
    }

    fn write_blocking(
        &self,
        op: WriteOp,
        identifiers: &[Identifier],
        values: &Map<String, Value>,
    ) -> StatsResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut select = tx.prepare_cached(&self.select_sql())?;
            let mut upsert = tx.prepare_cached(&self.upsert_sql())?;

            for identifier in identifiers {
                let stored = identifier.join(self.mode, &self.separator);
                let key_values = stored.bind_values();

                let existing: Option<String> = select
                    .query_row(params_from_iter(key_values.iter()), |row| row.get(0))
                    .optional()?;
                let data = merge_stored(existing.as_deref(), op, values)?;

                let mut row = key_values;
                row.push(SqlValue::Text(data));
                upsert.execute(params_from_iter(row.iter()))?;
            }
        }
        tx.commit()?;

        debug!(table = %self.table, count = identifiers.len(), ?op, "sqlite write");
        Ok(())
    }

    fn get_blocking(&self, identifiers: &[Identifier]) -> StatsResult<Vec<Map<String, Value>>> {
        let conn = self.lock()?;
        let mut select = conn.prepare_cached(&self.select_sql())?;

        let mut out = Vec::with_capacity(identifiers.len());
        for identifier in identifiers {
            let stored = identifier.join(self.mode, &self.separator);
            let raw: Option<String> = select
                .query_row(params_from_iter(stored.bind_values().iter()), |row| row.get(0))
                .optional()?;
            out.push(match raw {
                Some(raw) => decode_stored(&raw)?,
                None => Map::new(),
            });
        }
        Ok(out)
    }

    fn setup_blocking(&self) -> StatsResult<()> {
        let conn = self.lock()?;
        let key_columns = match self.mode {
            JoinedIdentifier::Full => "key TEXT NOT NULL",
            JoinedIdentifier::Partial => "key TEXT NOT NULL, at INTEGER NOT NULL",
            JoinedIdentifier::Separated => {
                "key TEXT NOT NULL, granularity TEXT NOT NULL, at INTEGER NOT NULL"
            }
        };
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} ({}, data TEXT NOT NULL DEFAULT '{{}}', PRIMARY KEY ({}))",
                self.table,
                key_columns,
                self.mode.columns().join(", ")
            ),
            [],
        )?;
        Ok(())
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn target(&self) -> String {
        self.table.clone()
    }

    async fn inc(&self, identifiers: &[Identifier], values: &Map<String, Value>) -> StatsResult<()> {
        self.write_blocking(WriteOp::Increment, identifiers, values)
    }

    async fn set(&self, identifiers: &[Identifier], values: &Map<String, Value>) -> StatsResult<()> {
        self.write_blocking(WriteOp::Set, identifiers, values)
    }

    async fn get(&self, identifiers: &[Identifier]) -> StatsResult<Vec<Map<String, Value>>> {
        self.get_blocking(identifiers)
    }

    async fn setup(&self) -> StatsResult<()> {
        self.setup_blocking()
    }
}
