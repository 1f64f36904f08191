//! Assignment trail: append and query
//!
//! Rows are only ever inserted. The `id` column is AUTOINCREMENT and every
//! insert happens inside the writer transaction that made the ownership
//! change, so id order is commit order.

use rusqlite::{params, Connection};

use super::models::{AssignmentRecord, NewAssignment};
use crate::error::TerritoryError;

/// Append one record, returning its id
pub(crate) fn append(conn: &Connection, entry: &NewAssignment<'_>, at: &str) -> Result<i64, TerritoryError> {
    conn.execute(
        "INSERT INTO assignments (city_id, agent_id, action, actor, reason, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            entry.city_id,
            entry.agent_id,
            entry.action.as_str(),
            entry.actor.as_str(),
            entry.reason,
            at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Trail for one city, oldest first
pub fn list_for_city(conn: &Connection, city_id: &str, limit: u32) -> Result<Vec<AssignmentRecord>, TerritoryError> {
    query(
        conn,
        "SELECT * FROM assignments WHERE city_id = ? ORDER BY id ASC LIMIT ?",
        city_id,
        limit,
    )
}

/// Trail for one agent, oldest first
pub fn list_for_agent(conn: &Connection, agent_id: &str, limit: u32) -> Result<Vec<AssignmentRecord>, TerritoryError> {
    query(
        conn,
        "SELECT * FROM assignments WHERE agent_id = ? ORDER BY id ASC LIMIT ?",
        agent_id,
        limit,
    )
}

/// Records appended after `after_id`, oldest first
pub fn list_since(conn: &Connection, after_id: i64, limit: u32) -> Result<Vec<AssignmentRecord>, TerritoryError> {
    let mut stmt = conn.prepare("SELECT * FROM assignments WHERE id > ? ORDER BY id ASC LIMIT ?")?;
    let records = stmt
        .query_map(params![after_id, limit as i64], AssignmentRecord::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Highest record id so far (0 when the trail is empty)
pub fn latest_id(conn: &Connection) -> Result<i64, TerritoryError> {
    let id: i64 = conn.query_row("SELECT COALESCE(MAX(id), 0) FROM assignments", [], |row| row.get(0))?;
    Ok(id)
}

fn query(conn: &Connection, sql: &str, key: &str, limit: u32) -> Result<Vec<AssignmentRecord>, TerritoryError> {
    let mut stmt = conn.prepare(sql)?;
    let records = stmt
        .query_map(params![key, limit as i64], AssignmentRecord::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}
