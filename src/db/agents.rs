//! Agent registry and liveness rows

use rusqlite::{params, Connection, OptionalExtension};

use super::models::Agent;
use crate::error::TerritoryError;
use crate::void_placement::VoidPlacement;

/// Get an agent by ID
pub fn get_agent(conn: &Connection, id: &str) -> Result<Option<Agent>, TerritoryError> {
    let agent = conn
        .query_row("SELECT * FROM agents WHERE id = ?", params![id], Agent::from_row)
        .optional()?;
    Ok(agent)
}

/// List agents, newest first
pub fn list_agents(conn: &Connection, include_voided: bool, limit: u32) -> Result<Vec<Agent>, TerritoryError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM agents WHERE (?1 OR voided = 0) ORDER BY created_at DESC, id LIMIT ?2",
    )?;
    let agents = stmt
        .query_map(params![include_voided, limit as i64], Agent::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(agents)
}

/// Create an agent with no territory
pub fn insert_agent(
    conn: &Connection,
    id: &str,
    display_name: Option<&str>,
    last_liveness_at: Option<&str>,
    created_at: &str,
) -> Result<Agent, TerritoryError> {
    let changes = conn.execute(
        "INSERT OR IGNORE INTO agents (id, display_name, last_liveness_at, created_at) VALUES (?, ?, ?, ?)",
        params![id, display_name, last_liveness_at, created_at],
    )?;
    if changes == 0 {
        return Err(TerritoryError::InvalidInput(format!("Agent already registered: {}", id)));
    }

    get_agent(conn, id)?
        .ok_or_else(|| TerritoryError::Internal("Agent not found after insert".to_string()))
}

/// Remove an agent that never held territory and has no trail entries.
///
/// Used to roll back a registration whose claim failed. Returns false if
/// the agent is gone or is no longer a bare placeholder.
pub fn delete_placeholder(conn: &Connection, id: &str) -> Result<bool, TerritoryError> {
    let changes = conn.execute(
        "DELETE FROM agents
         WHERE id = ?1 AND city_id IS NULL AND voided = 0
           AND NOT EXISTS (SELECT 1 FROM assignments WHERE agent_id = ?1)",
        params![id],
    )?;
    Ok(changes > 0)
}

/// Move `last_liveness_at` forward, never backward. Voided agents are
/// left untouched.
///
/// Returns true if the stored timestamp changed.
pub fn record_liveness(conn: &Connection, id: &str, at: &str) -> Result<bool, TerritoryError> {
    let changes = conn.execute(
        "UPDATE agents SET last_liveness_at = ?2
         WHERE id = ?1 AND voided = 0
           AND (last_liveness_at IS NULL OR last_liveness_at < ?2)",
        params![id, at],
    )?;
    Ok(changes > 0)
}

/// Non-voided agents whose last liveness is at or before `cutoff`,
/// or who never proved liveness at all.
pub fn list_inactive_since(conn: &Connection, cutoff: &str) -> Result<Vec<Agent>, TerritoryError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM agents
         WHERE voided = 0 AND (last_liveness_at IS NULL OR last_liveness_at <= ?)
         ORDER BY id",
    )?;
    let agents = stmt
        .query_map(params![cutoff], Agent::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(agents)
}

/// Non-voided agents whose last liveness falls in `(after, until]`.
pub fn list_liveness_between(conn: &Connection, after: &str, until: &str) -> Result<Vec<Agent>, TerritoryError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM agents
         WHERE voided = 0 AND last_liveness_at > ? AND last_liveness_at <= ?
         ORDER BY last_liveness_at, id",
    )?;
    let agents = stmt
        .query_map(params![after, until], Agent::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(agents)
}

pub(crate) fn set_city(conn: &Connection, id: &str, city_id: Option<&str>) -> Result<(), TerritoryError> {
    conn.execute(
        "UPDATE agents SET city_id = ? WHERE id = ? AND voided = 0",
        params![city_id, id],
    )?;
    Ok(())
}

pub(crate) fn set_void(
    conn: &Connection,
    id: &str,
    placement: &VoidPlacement,
    at: &str,
) -> Result<(), TerritoryError> {
    conn.execute(
        "UPDATE agents
         SET voided = 1, city_id = NULL, void_zone = ?, void_latitude = ?, void_longitude = ?, voided_at = ?
         WHERE id = ? AND voided = 0",
        params![placement.zone, placement.latitude, placement.longitude, at, id],
    )?;
    Ok(())
}
