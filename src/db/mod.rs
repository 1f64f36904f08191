//! SQLite store for the territory catalog, agents and assignment trail
//!
//! ## Tables
//!
//! - `cities` - Claimable cities (country, coordinates, reserved flag, owner)
//! - `agents` - Registered agents (territory, void state, last liveness)
//! - `assignments` - Append-only trail of every ownership change
//!
//! ## Connections
//!
//! File-backed databases open two connections: a writer that runs every
//! mutating transaction (`BEGIN IMMEDIATE`, so concurrent writers queue on
//! SQLite's write lock rather than failing at commit), and a read-only
//! connection that sees the last committed WAL snapshot. Catalog queries and
//! liveness status therefore never wait on a writer. In-memory databases
//! cannot share state across connections and use the writer for both.

pub mod schema;
pub mod models;
pub mod cities;
pub mod agents;
pub mod assignments;
pub mod allocation;

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

use crate::error::TerritoryError;

/// Database file name inside the storage directory
pub const DB_FILE_NAME: &str = "territory.db";

/// SQLite database for cities, agents and assignments
pub struct TerritoryDb {
    writer: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
}

impl TerritoryDb {
    /// Open or create the database in `storage_dir`
    pub fn open(storage_dir: &Path, busy_timeout: Duration) -> Result<Self, TerritoryError> {
        let db_path = storage_dir.join(DB_FILE_NAME);
        info!("Opening SQLite database at {:?}", db_path);

        let writer = Connection::open(&db_path)?;
        writer.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;
        writer.busy_timeout(busy_timeout)?;
        schema::init_schema(&writer)?;

        let reader = Connection::open_with_flags(
            &db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        reader.busy_timeout(busy_timeout)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Some(Mutex::new(reader)),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, TerritoryError> {
        debug!("Opening in-memory SQLite database");

        let writer = Connection::open_in_memory()?;
        writer.execute_batch("PRAGMA foreign_keys=ON;")?;
        schema::init_schema(&writer)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: None,
        })
    }

    /// Run a read-only query against the last committed state
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, TerritoryError>
    where
        F: FnOnce(&Connection) -> Result<T, TerritoryError>,
    {
        let lock = self.reader.as_ref().unwrap_or(&self.writer);
        let conn = lock
            .lock()
            .map_err(|e| TerritoryError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation with exclusive access
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, TerritoryError>
    where
        F: FnOnce(&mut Connection) -> Result<T, TerritoryError>,
    {
        let mut conn = self
            .writer
            .lock()
            .map_err(|e| TerritoryError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, TerritoryError> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<u64, TerritoryError> {
                let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
                Ok(n as u64)
            };

            Ok(DbStats {
                city_count: count("SELECT COUNT(*) FROM cities")?,
                owned_city_count: count("SELECT COUNT(*) FROM cities WHERE owner_id IS NOT NULL")?,
                reserved_city_count: count("SELECT COUNT(*) FROM cities WHERE reserved = 1")?,
                agent_count: count("SELECT COUNT(*) FROM agents")?,
                voided_agent_count: count("SELECT COUNT(*) FROM agents WHERE voided = 1")?,
                assignment_count: count("SELECT COUNT(*) FROM assignments")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DbStats {
    pub city_count: u64,
    pub owned_city_count: u64,
    pub reserved_city_count: u64,
    pub agent_count: u64,
    pub voided_agent_count: u64,
    pub assignment_count: u64,
}

// Re-exports
pub use models::{Actor, Agent, AssignmentAction, AssignmentRecord, City, NewCity, Territory};
pub use cities::BulkResult;
pub use allocation::{ClaimOutcome, OverrideOutcome, ReleaseOutcome, VoidOutcome};
