//! SQLite schema for the delegation store.
//!
//! This module defines the database schema and provides migration utilities.
//! Version 1 keyed delegations on `(delegator, level)`, which silently dropped
//! distinct operations sharing a block. Version 2 keys on `operation_hash`.

use rusqlite::{Connection, Result};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema.
///
/// Creates all tables if they don't exist and runs any pending migrations.
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        tracing::info!(
            "Migrating delegation store schema v{} -> v{}",
            current_version,
            SCHEMA_VERSION
        );
        migrate(conn, current_version, SCHEMA_VERSION)?;
    }

    Ok(())
}

/// Get the current schema version (0 if not initialized).
pub(crate) fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

const DELEGATIONS_V2: &str = r#"
    CREATE TABLE IF NOT EXISTS delegations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        operation_hash TEXT NOT NULL UNIQUE,
        level INTEGER NOT NULL,
        timestamp INTEGER NOT NULL,
        delegator TEXT NOT NULL,
        amount TEXT NOT NULL,
        block_hash TEXT NOT NULL,
        baker TEXT,
        created_at INTEGER NOT NULL
    );
"#;

const INDEXES_AND_CURSOR: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_delegations_level ON delegations(level);
    CREATE INDEX IF NOT EXISTS idx_delegations_timestamp ON delegations(timestamp DESC);
    CREATE INDEX IF NOT EXISTS idx_delegations_delegator ON delegations(delegator);

    -- Singleton ingestion cursor
    CREATE TABLE IF NOT EXISTS indexing_cursor (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        last_level INTEGER NOT NULL DEFAULT 0,
        last_observed_time INTEGER,
        updated_at INTEGER NOT NULL DEFAULT 0
    );
    INSERT OR IGNORE INTO indexing_cursor (id, last_level, last_observed_time, updated_at)
    VALUES (1, 0, NULL, 0);
"#;

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(DELEGATIONS_V2)?;
    conn.execute_batch(INDEXES_AND_CURSOR)?;
    Ok(())
}

fn migrate(conn: &Connection, from: i32, to: i32) -> Result<()> {
    for version in from..to {
        if version == 1 {
            migrate_v1_to_v2(conn)?;
        }
    }
    set_schema_version(conn, to)?;
    Ok(())
}

/// Migrate from v1 to v2: rebuild `delegations` without the
/// `(delegator, level)` key, keeping the first row per operation hash.
fn migrate_v1_to_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        BEGIN;
        ALTER TABLE delegations RENAME TO delegations_v1;
        DROP INDEX IF EXISTS idx_delegations_level;
        DROP INDEX IF EXISTS idx_delegations_timestamp;
        DROP INDEX IF EXISTS idx_delegations_delegator;
        "#,
    )?;
    conn.execute_batch(DELEGATIONS_V2)?;
    conn.execute_batch(
        r#"
        INSERT INTO delegations
            (id, operation_hash, level, timestamp, delegator, amount, block_hash, baker, created_at)
        SELECT id, operation_hash, level, timestamp, delegator, amount, block_hash, NULL, created_at
        FROM delegations_v1
        WHERE operation_hash IS NOT NULL
          AND id IN (SELECT MIN(id) FROM delegations_v1 GROUP BY operation_hash);
        DROP TABLE delegations_v1;
        "#,
    )?;
    conn.execute_batch(INDEXES_AND_CURSOR)?;
    conn.execute_batch("COMMIT;")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn table_names(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_init_schema_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables = table_names(&conn);
        assert!(tables.contains(&"delegations".to_string()));
        assert!(tables.contains(&"indexing_cursor".to_string()));
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);

        let level: i64 = conn
            .query_row("SELECT last_level FROM indexing_cursor WHERE id = 1", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(level, 0);
    }

    #[test]
    fn test_init_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }

    #[test]
    fn test_same_level_rows_allowed() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        for hash in ["opA", "opB"] {
            conn.execute(
                "INSERT INTO delegations
                    (operation_hash, level, timestamp, delegator, amount, block_hash, created_at)
                 VALUES (?, 100, 0, 'tz1same', '1', 'B', 0)",
                [hash],
            )
            .unwrap();
        }
    }

    #[test]
    fn test_migrate_v1_drops_delegator_level_key() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE schema_version (version INTEGER NOT NULL);
            INSERT INTO schema_version (version) VALUES (1);
            CREATE TABLE delegations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                operation_hash TEXT,
                level INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                delegator TEXT NOT NULL,
                amount TEXT NOT NULL,
                block_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(delegator, level)
            );
            CREATE INDEX idx_delegations_level ON delegations(level);
            INSERT INTO delegations (operation_hash, level, timestamp, delegator, amount, block_hash, created_at)
            VALUES ('op1', 10, 100, 'tz1a', '5', 'B1', 0),
                   ('op2', 11, 200, 'tz1a', '6', 'B2', 0),
                   ('op1', 12, 300, 'tz1b', '7', 'B3', 0);
            "#,
        )
        .unwrap();

        init_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 2);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM delegations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);

        // First row per hash survives.
        let amount: String = conn
            .query_row(
                "SELECT amount FROM delegations WHERE operation_hash = 'op1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(amount, "5");

        // Same delegator and level is now legal.
        conn.execute(
            "INSERT INTO delegations
                (operation_hash, level, timestamp, delegator, amount, block_hash, created_at)
             VALUES ('op3', 10, 100, 'tz1a', '1', 'B1', 0)",
            [],
        )
        .unwrap();

        assert!(table_names(&conn).contains(&"indexing_cursor".to_string()));
        assert!(!table_names(&conn).contains(&"delegations_v1".to_string()));
    }
}
