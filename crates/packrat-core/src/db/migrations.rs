//! Database migrations

use rusqlite::Connection;

use crate::error::Result;
use crate::models::EntityType;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: Initial schema
fn migrate_v1(conn: &Connection) -> Result<()> {
    let mut ddl = String::from(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    );

    // One identical table per tracked entity type. The domain payload lives
    // in the `data` JSON column; the promoted columns are what the sync
    // engine filters and orders on.
    for ty in [
        EntityType::Trip,
        EntityType::Person,
        EntityType::Item,
        EntityType::DefaultItemRule,
        EntityType::TripRule,
        EntityType::RulePack,
    ] {
        let table = ty.table();
        ddl.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                scope_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_scope ON {table}(scope_id);
            CREATE INDEX IF NOT EXISTS idx_{table}_updated ON {table}(updated_at DESC);"
        ));
    }

    ddl.push_str(
        "CREATE TABLE IF NOT EXISTS pending_changes (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            operation TEXT NOT NULL,
            data TEXT NOT NULL,
            partial INTEGER NOT NULL DEFAULT 0,
            trip_id TEXT,
            user_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            version INTEGER NOT NULL,
            synced INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_pending_changes_unsynced
            ON pending_changes(synced, seq);
        CREATE INDEX IF NOT EXISTS idx_pending_changes_entity
            ON pending_changes(entity_type, entity_id, synced);
        CREATE TABLE IF NOT EXISTS sync_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS sync_conflicts (
            id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            server_updated_at TEXT NOT NULL,
            data TEXT NOT NULL,
            resolved INTEGER NOT NULL DEFAULT 0,
            timestamp TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sync_conflicts_entity
            ON sync_conflicts(entity_type, entity_id, resolved);
        INSERT INTO schema_version (version) VALUES (1);
        COMMIT;",
    );

    conn.execute_batch(&ddl)?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_migrations() {
        let conn = setup();
        run(&conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = setup();
        run(&conn).unwrap();
        run(&conn).unwrap(); // Should not fail

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_entity_tables_exist() {
        let conn = setup();
        run(&conn).unwrap();

        for table in [
            "trips",
            "people",
            "trip_items",
            "default_item_rules",
            "trip_rules",
            "rule_packs",
        ] {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1)",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert!(exists, "missing table {table}");
        }
    }
}
