//! Transactional ownership changes
//!
//! Every function here runs as one `BEGIN IMMEDIATE` transaction: the
//! ownership columns on both sides and the assignment record commit together
//! or not at all. Eligibility is re-read inside the transaction and the owner
//! write is conditional (`WHERE owner_id IS NULL`), so two racing claims on
//! the same city cannot both win; the loser sees `AlreadyOwned` from its own
//! transaction.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::debug;

use super::models::{Actor, Agent, AssignmentAction, City, NewAssignment, Territory};
use super::{agents, assignments, cities};
use crate::error::TerritoryError;
use crate::void_placement::VoidPlacement;

/// Reason recorded on the release that precedes a void.
pub const EVICTED_REASON: &str = "evicted";

#[derive(Debug, Clone, Serialize)]
pub struct ClaimOutcome {
    pub city: City,
    pub agent: Agent,
    pub record_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReleaseOutcome {
    /// The city as it stands after release; `None` if nothing was held.
    pub city: Option<City>,
    pub record_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverrideOutcome {
    pub city: City,
    pub agent: Agent,
    pub displaced_agent_id: Option<String>,
    pub record_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoidOutcome {
    pub agent: Agent,
    pub released_city_id: Option<String>,
    pub record_ids: Vec<i64>,
}

/// Self-service (or admin) claim of a vacant city.
pub fn claim_city(
    conn: &mut Connection,
    city_id: &str,
    agent_id: &str,
    actor: &Actor,
    reason: &str,
    at: &str,
) -> Result<ClaimOutcome, TerritoryError> {
    let tx = begin(conn)?;

    let agent = load_agent(&tx, agent_id)?;
    ensure_can_take_city(&agent)?;

    let city = load_city(&tx, city_id)?;
    if city.reserved && !actor.is_admin() {
        return Err(TerritoryError::Reserved(city.id));
    }
    if let Some(owner_id) = city.owner_id {
        return Err(TerritoryError::AlreadyOwned { city_id: city.id, owner_id });
    }

    take_city(&tx, city_id, agent_id, at)?;
    let record_id = assignments::append(
        &tx,
        &NewAssignment {
            city_id: Some(city_id),
            agent_id: Some(agent_id),
            action: AssignmentAction::Claimed,
            actor,
            reason,
        },
        at,
    )?;

    let city = load_city(&tx, city_id)?;
    let agent = load_agent(&tx, agent_id)?;
    tx.commit()?;

    debug!(city_id, agent_id, record_id, "Claim committed");
    Ok(ClaimOutcome { city, agent, record_id })
}

/// Clear an agent's city in both directions. A no-op without a record if
/// the agent holds nothing.
pub fn release_agent(
    conn: &mut Connection,
    agent_id: &str,
    actor: &Actor,
    reason: &str,
    at: &str,
) -> Result<ReleaseOutcome, TerritoryError> {
    let tx = begin(conn)?;

    let agent = load_agent(&tx, agent_id)?;
    if agent.voided {
        return Err(TerritoryError::AgentVoided(agent.id));
    }
    let Some(city_id) = agent.territory.city_id().map(str::to_string) else {
        return Ok(ReleaseOutcome { city: None, record_id: None });
    };

    let record_id = drop_city(&tx, &city_id, agent_id, actor, reason, at)?;
    let city = load_city(&tx, &city_id)?;
    tx.commit()?;

    debug!(city_id = %city_id, agent_id, record_id, "Release committed");
    Ok(ReleaseOutcome {
        city: Some(city),
        record_id: Some(record_id),
    })
}

/// Assign a city regardless of the reserved flag, displacing any owner.
pub fn administrative_override(
    conn: &mut Connection,
    city_id: &str,
    agent_id: &str,
    actor: &Actor,
    reason: &str,
    at: &str,
) -> Result<OverrideOutcome, TerritoryError> {
    let tx = begin(conn)?;

    let agent = load_agent(&tx, agent_id)?;
    ensure_can_take_city(&agent)?;

    let city = load_city(&tx, city_id)?;
    let mut record_ids = Vec::with_capacity(2);

    let displaced_agent_id = city.owner_id.clone();
    if let Some(previous) = displaced_agent_id.as_deref() {
        let displaced_reason = format!("displaced by administrative override: {}", reason);
        record_ids.push(drop_city(&tx, city_id, previous, actor, &displaced_reason, at)?);
    }

    take_city(&tx, city_id, agent_id, at)?;
    record_ids.push(assignments::append(
        &tx,
        &NewAssignment {
            city_id: Some(city_id),
            agent_id: Some(agent_id),
            action: AssignmentAction::AdministrativeOverride,
            actor,
            reason,
        },
        at,
    )?);

    let city = load_city(&tx, city_id)?;
    let agent = load_agent(&tx, agent_id)?;
    tx.commit()?;

    debug!(city_id, agent_id, displaced = ?displaced_agent_id, "Override committed");
    Ok(OverrideOutcome {
        city,
        agent,
        displaced_agent_id,
        record_ids,
    })
}

/// Permanently evict an agent into the void.
///
/// With `inactive_before` set, the agent's liveness is re-checked inside the
/// transaction and `Ok(None)` is returned (nothing written) if it proved
/// liveness after the cutoff.
pub fn void_agent(
    conn: &mut Connection,
    agent_id: &str,
    placement: &VoidPlacement,
    actor: &Actor,
    reason: &str,
    at: &str,
    inactive_before: Option<DateTime<Utc>>,
) -> Result<Option<VoidOutcome>, TerritoryError> {
    let tx = begin(conn)?;

    let agent = load_agent(&tx, agent_id)?;
    if agent.voided {
        return Err(TerritoryError::AlreadyVoided(agent.id));
    }
    if let (Some(cutoff), Some(last)) = (inactive_before, agent.last_liveness_at) {
        if last > cutoff {
            debug!(agent_id, "Agent proved liveness before void committed");
            return Ok(None);
        }
    }

    let mut record_ids = Vec::with_capacity(2);
    let released_city_id = agent.territory.city_id().map(str::to_string);
    if let Some(city_id) = released_city_id.as_deref() {
        record_ids.push(drop_city(&tx, city_id, agent_id, actor, EVICTED_REASON, at)?);
    }

    agents::set_void(&tx, agent_id, placement, at)?;
    record_ids.push(assignments::append(
        &tx,
        &NewAssignment {
            city_id: released_city_id.as_deref(),
            agent_id: Some(agent_id),
            action: AssignmentAction::Voided,
            actor,
            reason,
        },
        at,
    )?);

    let agent = load_agent(&tx, agent_id)?;
    tx.commit()?;

    debug!(agent_id, zone = %placement.zone, "Void committed");
    Ok(Some(VoidOutcome {
        agent,
        released_city_id,
        record_ids,
    }))
}

fn begin(conn: &mut Connection) -> Result<Transaction<'_>, TerritoryError> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

fn load_agent(conn: &Connection, agent_id: &str) -> Result<Agent, TerritoryError> {
    agents::get_agent(conn, agent_id)?.ok_or_else(|| TerritoryError::AgentNotFound(agent_id.to_string()))
}

fn load_city(conn: &Connection, city_id: &str) -> Result<City, TerritoryError> {
    cities::get_city(conn, city_id)?.ok_or_else(|| TerritoryError::CityNotFound(city_id.to_string()))
}

fn ensure_can_take_city(agent: &Agent) -> Result<(), TerritoryError> {
    match &agent.territory {
        _ if agent.voided => Err(TerritoryError::AgentVoided(agent.id.clone())),
        Territory::City { city_id } => Err(TerritoryError::AgentAlreadyHasTerritory {
            agent_id: agent.id.clone(),
            city_id: city_id.clone(),
        }),
        Territory::Void(_) => Err(TerritoryError::AgentVoided(agent.id.clone())),
        Territory::Unassigned => Ok(()),
    }
}

/// Point city and agent at each other. Fails with `AlreadyOwned` if the
/// city was taken since it was read.
fn take_city(conn: &Connection, city_id: &str, agent_id: &str, at: &str) -> Result<(), TerritoryError> {
    if !cities::set_owner_if_vacant(conn, city_id, agent_id, at)? {
        let owner_id = load_city(conn, city_id)?.owner_id.unwrap_or_default();
        return Err(TerritoryError::AlreadyOwned {
            city_id: city_id.to_string(),
            owner_id,
        });
    }
    agents::set_city(conn, agent_id, Some(city_id))
}

/// Clear both sides of an ownership pair and record the release.
fn drop_city(
    conn: &Connection,
    city_id: &str,
    agent_id: &str,
    actor: &Actor,
    reason: &str,
    at: &str,
) -> Result<i64, TerritoryError> {
    if !cities::clear_owner(conn, city_id, agent_id)? {
        return Err(TerritoryError::Internal(format!(
            "Ownership mismatch: agent {} points at {} but the city disagrees",
            agent_id, city_id
        )));
    }
    agents::set_city(conn, agent_id, None)?;
    assignments::append(
        conn,
        &NewAssignment {
            city_id: Some(city_id),
            agent_id: Some(agent_id),
            action: AssignmentAction::Released,
            actor,
            reason,
        },
        at,
    )
}
