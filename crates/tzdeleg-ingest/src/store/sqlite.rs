//! SQLite-backed [`EventStore`].
//!
//! One connection is shared behind a mutex. Every call runs on the blocking
//! pool and is bounded by the configured call timeout.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tzdeleg_core::{Amount, Cursor, Delegation, sum_amounts, year_bounds};

use super::schema;
use super::{DelegationStats, EventStore, StatsProvider, UpsertOutcome};
use crate::{Error, Result};

const SELECT_COLUMNS: &str =
    "operation_hash, level, timestamp, delegator, amount, block_hash, baker";

/// Delegation store on a single SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    call_timeout: Duration,
}

impl SqliteStore {
    /// Open or create a store at `path`.
    pub fn open(path: impl AsRef<Path>, call_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::Database(format!("Failed to open SQLite: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::Database(format!("Failed to set PRAGMA: {}", e)))?;

        schema::init_schema(&conn)
            .map_err(|e| Error::Database(format!("Failed to init schema: {}", e)))?;

        tracing::info!("Opened delegation store at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            call_timeout,
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("Failed to open in-memory SQLite: {}", e)))?;

        schema::init_schema(&conn)
            .map_err(|e| Error::Database(format!("Failed to init schema: {}", e)))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            call_timeout: Duration::from_secs(30),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn call<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let task = tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn)
        });

        match tokio::time::timeout(self.call_timeout, task).await {
            Ok(joined) => joined?,
            Err(_) => Err(Error::Timeout {
                operation,
                after: self.call_timeout,
            }),
        }
    }

    fn unix_now() -> i64 {
        Utc::now().timestamp()
    }
}

fn from_unix(col: usize, secs: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or(rusqlite::Error::IntegralValueOutOfRange(col, secs))
}

fn row_to_delegation(row: &Row<'_>) -> rusqlite::Result<Delegation> {
    let amount: String = row.get(4)?;
    let amount = Amount::parse(&amount)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

    Ok(Delegation {
        operation_hash: row.get(0)?,
        level: row.get(1)?,
        timestamp: from_unix(2, row.get(2)?)?,
        delegator: row.get(3)?,
        amount,
        block_hash: row.get(5)?,
        baker: row.get(6)?,
    })
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn upsert_batch(&self, batch: &[Delegation]) -> Result<UpsertOutcome> {
        if batch.is_empty() {
            return Ok(UpsertOutcome::default());
        }

        let batch = batch.to_vec();
        let outcome = self
            .call("upsert batch", move |conn| {
                let now = Self::unix_now();
                let tx = conn.transaction()?;
                let mut outcome = UpsertOutcome::default();
                {
                    let mut exists =
                        tx.prepare_cached("SELECT 1 FROM delegations WHERE operation_hash = ?")?;
                    let mut upsert = tx.prepare_cached(
                        "INSERT INTO delegations
                            (operation_hash, level, timestamp, delegator, amount, block_hash, baker, created_at)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                         ON CONFLICT(operation_hash) DO UPDATE SET
                            level = excluded.level,
                            timestamp = excluded.timestamp,
                            delegator = excluded.delegator,
                            amount = excluded.amount,
                            block_hash = excluded.block_hash,
                            baker = excluded.baker",
                    )?;

                    for d in &batch {
                        if exists.exists([&d.operation_hash])? {
                            outcome.updated += 1;
                        } else {
                            outcome.inserted += 1;
                        }
                        upsert.execute(params![
                            d.operation_hash,
                            d.level,
                            d.timestamp.timestamp(),
                            d.delegator,
                            d.amount.as_str(),
                            d.block_hash,
                            d.baker,
                            now,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(outcome)
            })
            .await?;

        tracing::debug!(
            "Upserted batch: {} inserted, {} updated",
            outcome.inserted,
            outcome.updated
        );
        Ok(outcome)
    }

    async fn list_all(&self, year: Option<i32>) -> Result<Vec<Delegation>> {
        let bounds = year.map(year_bounds).transpose()?;

        self.call("list delegations", move |conn| {
            let order = "ORDER BY timestamp DESC, level DESC, id DESC";
            let rows = match bounds {
                Some((start, end)) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {SELECT_COLUMNS} FROM delegations
                         WHERE timestamp >= ? AND timestamp < ? {order}"
                    ))?;
                    let rows = stmt
                        .query_map([start.timestamp(), end.timestamp()], row_to_delegation)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
                None => {
                    let mut stmt =
                        conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM delegations {order}"))?;
                    let rows = stmt
                        .query_map([], row_to_delegation)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
            };
            Ok(rows)
        })
        .await
    }

    async fn highest_level(&self) -> Result<i64> {
        self.call("highest level", |conn| {
            let level: i64 =
                conn.query_row("SELECT COALESCE(MAX(level), 0) FROM delegations", [], |r| {
                    r.get(0)
                })?;
            Ok(level)
        })
        .await
    }

    async fn exists_by_delegator_and_level(&self, delegator: &str, level: i64) -> Result<bool> {
        let delegator = delegator.to_string();
        self.call("exists by delegator and level", move |conn| {
            let found = conn
                .prepare_cached("SELECT 1 FROM delegations WHERE delegator = ? AND level = ? LIMIT 1")?
                .exists(params![delegator, level])?;
            Ok(found)
        })
        .await
    }

    async fn update_cursor(&self, level: i64, observed: DateTime<Utc>) -> Result<()> {
        self.call("update cursor", move |conn| {
            conn.execute(
                "INSERT INTO indexing_cursor (id, last_level, last_observed_time, updated_at)
                 VALUES (1, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    last_level = MAX(last_level, excluded.last_level),
                    last_observed_time = MAX(
                        COALESCE(last_observed_time, excluded.last_observed_time),
                        excluded.last_observed_time
                    ),
                    updated_at = excluded.updated_at",
                params![level, observed.timestamp(), Self::unix_now()],
            )?;
            Ok(())
        })
        .await
    }

    async fn read_cursor(&self) -> Result<Cursor> {
        self.call("read cursor", |conn| {
            let row: Option<(i64, Option<i64>)> = conn
                .query_row(
                    "SELECT last_level, last_observed_time FROM indexing_cursor WHERE id = 1",
                    [],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;

            let Some((last_level, observed)) = row else {
                return Ok(Cursor::default());
            };
            Ok(Cursor {
                last_level,
                last_observed_time: observed.map(|s| from_unix(1, s)).transpose()?,
            })
        })
        .await
    }

    async fn latest_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        self.call("latest timestamp", |conn| {
            let secs: Option<i64> =
                conn.query_row("SELECT MAX(timestamp) FROM delegations", [], |r| r.get(0))?;
            Ok(secs.map(|s| from_unix(0, s)).transpose()?)
        })
        .await
    }

    async fn count_since(&self, since: DateTime<Utc>) -> Result<u64> {
        self.call("count since", move |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM delegations WHERE timestamp >= ?",
                [since.timestamp()],
                |r| r.get(0),
            )?;
            Ok(n as u64)
        })
        .await
    }

    async fn count(&self) -> Result<u64> {
        self.call("count", |conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM delegations", [], |r| r.get(0))?;
            Ok(n as u64)
        })
        .await
    }

    fn stats_provider(&self) -> Option<&dyn StatsProvider> {
        Some(self)
    }
}

#[async_trait]
impl StatsProvider for SqliteStore {
    async fn stats(&self) -> Result<DelegationStats> {
        self.call("stats", |conn| {
            let (total, unique_delegators, oldest, latest, highest_level): (
                i64,
                i64,
                Option<i64>,
                Option<i64>,
                i64,
            ) = conn.query_row(
                "SELECT COUNT(*), COUNT(DISTINCT delegator), MIN(timestamp), MAX(timestamp),
                        COALESCE(MAX(level), 0)
                 FROM delegations",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )?;

            let mut unparsable = 0u64;
            let mut amounts = Vec::new();
            let mut stmt = conn.prepare("SELECT amount FROM delegations")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let raw: String = row.get(0)?;
                match Amount::parse(&raw) {
                    Ok(amount) => amounts.push(amount),
                    Err(_) => unparsable += 1,
                }
            }
            if unparsable > 0 {
                tracing::warn!("{} stored amounts could not be parsed", unparsable);
            }

            Ok(DelegationStats {
                total: total as u64,
                unique_delegators: unique_delegators as u64,
                total_amount: sum_amounts(&amounts).to_string(),
                unparsable_amounts: unparsable,
                latest: latest.map(|s| from_unix(3, s)).transpose()?,
                oldest: oldest.map(|s| from_unix(2, s)).transpose()?,
                highest_level,
            })
        })
        .await
    }
}
