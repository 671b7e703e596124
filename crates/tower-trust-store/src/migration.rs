//! Database schema migrations for SQLite.
//!
//! A simple versioned migration system. Each migration is a SQL batch that
//! transforms the schema from version N to N+1.

use rusqlite::Connection;

use tower_trust_core::time::now_millis;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 2;

/// Initialize or migrate the database schema.
///
/// Idempotent: safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
        tracing::debug!(from = current, to = CURRENT_VERSION, "schema migrated");
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        2 => apply_v2(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Signing keys: never deleted, only retired or revoked
        CREATE TABLE signing_keys (
            kid TEXT PRIMARY KEY,
            algorithm TEXT NOT NULL,
            material BLOB NOT NULL,            -- 32 bytes keyed-hash secret
            created_at INTEGER NOT NULL,
            rotates_at INTEGER NOT NULL,       -- fixed at creation
            rotated_at INTEGER,
            status TEXT NOT NULL CHECK (status IN ('active', 'rotated', 'revoked'))
        );

        -- At most one active key
        CREATE UNIQUE INDEX idx_signing_keys_one_active
            ON signing_keys(status) WHERE status = 'active';

        -- Receipts: one row per accepted upload
        CREATE TABLE receipts (
            receipt_id TEXT PRIMARY KEY,
            manifest_hash BLOB NOT NULL,       -- 32 bytes
            status TEXT NOT NULL,
            uploaded_at INTEGER NOT NULL,
            verified_at INTEGER,
            body BLOB NOT NULL                 -- CBOR TowerReceipt
        );

        CREATE INDEX idx_receipts_uploaded ON receipts(uploaded_at);
        CREATE INDEX idx_receipts_manifest ON receipts(manifest_hash);

        -- Replay protection
        CREATE TABLE nonces (
            value TEXT PRIMARY KEY,
            expires_at INTEGER NOT NULL,
            recorded_at INTEGER NOT NULL
        );

        CREATE INDEX idx_nonces_expires ON nonces(expires_at);

        -- Restart-safe maintenance bookkeeping
        CREATE TABLE maintenance (
            name TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        );

        -- Committed ledger events, append only
        CREATE TABLE ledger_events (
            seq INTEGER PRIMARY KEY,           -- 1-based, no gaps
            event_id TEXT NOT NULL UNIQUE,
            idempotency_key TEXT NOT NULL UNIQUE,
            hash BLOB NOT NULL,                -- chain hash of the committed event
            committed_at INTEGER NOT NULL,
            body BLOB NOT NULL                 -- CBOR LedgerEvent
        );
        "#,
    )?;

    Ok(())
}

/// Migration v2: key scope and usage, nonces unique per context.
fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        ALTER TABLE signing_keys ADD COLUMN scope TEXT NOT NULL DEFAULT 'tower'
            CHECK (scope IN ('factory', 'tower', 'federation'));
        ALTER TABLE signing_keys ADD COLUMN usage TEXT NOT NULL DEFAULT 'signing'
            CHECK (usage IN ('signing', 'verification'));

        CREATE TABLE nonces_v2 (
            context TEXT NOT NULL,
            value TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            recorded_at INTEGER NOT NULL,
            PRIMARY KEY (context, value)
        );

        INSERT INTO nonces_v2 (context, value, expires_at, recorded_at)
            SELECT 'default', value, expires_at, recorded_at FROM nonces;

        DROP TABLE nonces;
        ALTER TABLE nonces_v2 RENAME TO nonces;

        CREATE INDEX idx_nonces_expires ON nonces(expires_at);
        CREATE INDEX idx_nonces_context ON nonces(context);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "signing_keys",
            "receipts",
            "nonces",
            "maintenance",
            "ledger_events",
            "schema_migrations",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_v1_rows_carried_into_v2() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE schema_migrations (version INTEGER PRIMARY KEY, applied_at INTEGER NOT NULL)",
            [],
        )
        .unwrap();
        apply_v1(&conn).unwrap();
        conn.execute("INSERT INTO schema_migrations VALUES (1, 0)", []).unwrap();
        conn.execute(
            "INSERT INTO signing_keys (kid, algorithm, material, created_at, rotates_at, status)
             VALUES ('k1', 'BLAKE3-KEYED', x'00', 0, 0, 'active')",
            [],
        )
        .unwrap();
        conn.execute("INSERT INTO nonces VALUES ('n1', 100, 0)", []).unwrap();

        migrate(&mut conn).unwrap();

        let (scope, usage): (String, String) = conn
            .query_row("SELECT scope, usage FROM signing_keys WHERE kid = 'k1'", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!((scope.as_str(), usage.as_str()), ("tower", "signing"));

        let context: String = conn
            .query_row("SELECT context FROM nonces WHERE value = 'n1'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(context, "default");
    }

    #[test]
    fn test_same_nonce_in_two_contexts() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let insert = "INSERT INTO nonces (context, value, expires_at, recorded_at) VALUES (?1, 'n', 1, 0)";
        conn.execute(insert, ["federation_sync"]).unwrap();
        conn.execute(insert, ["governance_ack"]).unwrap();
        assert!(conn.execute(insert, ["governance_ack"]).is_err());
    }

    #[test]
    fn test_second_active_key_rejected_by_index() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let insert = "INSERT INTO signing_keys (kid, algorithm, material, created_at, rotates_at, status)
                      VALUES (?1, 'BLAKE3-KEYED', x'00', 0, 0, 'active')";
        conn.execute(insert, ["a"]).unwrap();
        assert!(conn.execute(insert, ["b"]).is_err());
    }
}
