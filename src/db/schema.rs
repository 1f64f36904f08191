//! Database schema definitions

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::TerritoryError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), TerritoryError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else if current_version > SCHEMA_VERSION {
        return Err(TerritoryError::Config(format!(
            "Database schema v{} is newer than this build (v{})",
            current_version, SCHEMA_VERSION
        )));
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, TerritoryError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), TerritoryError> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), TerritoryError> {
    conn.execute_batch(CITIES_SCHEMA)?;
    conn.execute_batch(AGENTS_SCHEMA)?;
    conn.execute_batch(ASSIGNMENTS_SCHEMA)?;
    conn.execute_batch(GUARDS_SCHEMA)?;
    conn.execute_batch(INDEXES_SCHEMA)?;
    Ok(())
}

fn migrate_schema(conn: &Connection, from_version: i32) -> Result<(), TerritoryError> {
    // Only v1 exists so far; later versions add their steps here.
    info!(from_version, "No migration steps registered");
    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// City catalog
///
/// `owner_id` is UNIQUE so no agent can own two cities, and SQLite allows
/// any number of NULLs for the vacant ones.
const CITIES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cities (
    id TEXT PRIMARY KEY NOT NULL,
    country_code TEXT NOT NULL,
    name TEXT NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    reserved INTEGER NOT NULL DEFAULT 0 CHECK (reserved IN (0, 1)),

    owner_id TEXT UNIQUE REFERENCES agents(id),
    claimed_at TEXT,

    created_at TEXT NOT NULL
);
"#;

/// Agents
///
/// `city_id` is UNIQUE: at most one agent points at any city.
const AGENTS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS agents (
    id TEXT PRIMARY KEY NOT NULL,
    display_name TEXT,

    city_id TEXT UNIQUE REFERENCES cities(id),

    voided INTEGER NOT NULL DEFAULT 0 CHECK (voided IN (0, 1)),
    void_zone TEXT,
    void_latitude REAL,
    void_longitude REAL,
    voided_at TEXT,

    last_liveness_at TEXT,
    created_at TEXT NOT NULL,

    CHECK (voided = 0 OR city_id IS NULL)
);
"#;

/// Assignment trail (append-only)
const ASSIGNMENTS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS assignments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    city_id TEXT REFERENCES cities(id),
    agent_id TEXT,
    action TEXT NOT NULL CHECK (action IN ('claimed', 'released', 'voided', 'administrative-override')),
    actor TEXT NOT NULL,
    reason TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);
"#;

/// Triggers that hold the invariants even against hand-written SQL
const GUARDS_SCHEMA: &str = r#"
CREATE TRIGGER IF NOT EXISTS assignments_no_update
BEFORE UPDATE ON assignments
BEGIN
    SELECT RAISE(ABORT, 'assignments are append-only');
END;

CREATE TRIGGER IF NOT EXISTS assignments_no_delete
BEFORE DELETE ON assignments
BEGIN
    SELECT RAISE(ABORT, 'assignments are append-only');
END;

CREATE TRIGGER IF NOT EXISTS agents_void_is_terminal
BEFORE UPDATE OF voided ON agents
WHEN OLD.voided = 1 AND NEW.voided = 0
BEGIN
    SELECT RAISE(ABORT, 'voided agents cannot be restored');
END;

CREATE TRIGGER IF NOT EXISTS cities_referenced_by_trail
BEFORE DELETE ON cities
WHEN EXISTS (SELECT 1 FROM assignments WHERE city_id = OLD.id)
BEGIN
    SELECT RAISE(ABORT, 'city is referenced by the assignment trail');
END;
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_cities_country ON cities(country_code);
CREATE INDEX IF NOT EXISTS idx_cities_eligible ON cities(country_code, reserved, owner_id);

CREATE INDEX IF NOT EXISTS idx_agents_liveness ON agents(voided, last_liveness_at);

CREATE INDEX IF NOT EXISTS idx_assignments_city ON assignments(city_id, id);
CREATE INDEX IF NOT EXISTS idx_assignments_agent ON assignments(agent_id, id);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_init_is_idempotent() {
        let conn = open();
        init_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_assignment_trail_rejects_updates_and_deletes() {
        let conn = open();
        conn.execute(
            "INSERT INTO assignments (agent_id, action, actor, reason, created_at)
             VALUES ('a', 'voided', 'system', 'test', '2026-01-01T00:00:00.000Z')",
            [],
        )
        .unwrap();

        assert!(conn.execute("UPDATE assignments SET reason = 'edited'", []).is_err());
        assert!(conn.execute("DELETE FROM assignments", []).is_err());
    }

    #[test]
    fn test_void_flag_cannot_be_cleared() {
        let conn = open();
        conn.execute(
            "INSERT INTO agents (id, voided, created_at) VALUES ('a', 1, '2026-01-01T00:00:00.000Z')",
            [],
        )
        .unwrap();

        assert!(conn.execute("UPDATE agents SET voided = 0 WHERE id = 'a'", []).is_err());
    }

    #[test]
    fn test_owner_uniqueness_enforced_by_store() {
        let conn = open();
        conn.execute_batch(
            "INSERT INTO agents (id, created_at) VALUES ('a', 'now');
             INSERT INTO cities (id, country_code, name, latitude, longitude, created_at)
             VALUES ('paris', 'FR', 'Paris', 48.85, 2.35, 'now'),
                    ('lyon', 'FR', 'Lyon', 45.76, 4.83, 'now');
             UPDATE cities SET owner_id = 'a' WHERE id = 'paris';",
        )
        .unwrap();

        assert!(conn
            .execute("UPDATE cities SET owner_id = 'a' WHERE id = 'lyon'", [])
            .is_err());
    }
}
