//! Allocation service - the only writer of ownership and void state
//!
//! Wraps the transactional operations in [`crate::db::allocation`] with a
//! clock, logging, and event emission after commit.

use std::sync::Arc;

use tracing::{info, warn};

use crate::clock::{to_db_timestamp, Clock};
use crate::db::allocation::{
    self, ClaimOutcome, OverrideOutcome, ReleaseOutcome, VoidOutcome,
};
use crate::db::{Actor, AssignmentAction, TerritoryDb};
use crate::error::TerritoryError;
use crate::void_placement::VoidPlacement;

use super::events::{EventBus, TerritoryEvent};

pub struct AllocationService {
    db: Arc<TerritoryDb>,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
}

impl AllocationService {
    pub fn new(db: Arc<TerritoryDb>, events: Arc<EventBus>, clock: Arc<dyn Clock>) -> Self {
        Self { db, events, clock }
    }

    /// Claim a vacant city for an agent.
    ///
    /// Reserved cities are refused unless `actor` is an administrator.
    pub fn claim(
        &self,
        city_id: &str,
        agent_id: &str,
        actor: &Actor,
        reason: &str,
    ) -> Result<ClaimOutcome, TerritoryError> {
        let at = to_db_timestamp(self.clock.now());
        let outcome = self
            .db
            .with_conn_mut(|conn| allocation::claim_city(conn, city_id, agent_id, actor, reason, &at))
            .inspect_err(|e| log_rejection("claim", city_id, agent_id, e))?;

        info!(city_id, agent_id, actor = %actor, "City claimed");
        self.events.emit(TerritoryEvent::new(
            AssignmentAction::Claimed,
            Some(city_id.to_string()),
            Some(agent_id.to_string()),
            actor.clone(),
            reason,
            at,
        ));

        Ok(outcome)
    }

    /// Release whatever city the agent holds.
    ///
    /// Returns an outcome with `city: None` and emits nothing when the agent
    /// held no city.
    pub fn release(&self, agent_id: &str, actor: &Actor, reason: &str) -> Result<ReleaseOutcome, TerritoryError> {
        let at = to_db_timestamp(self.clock.now());
        let outcome = self
            .db
            .with_conn_mut(|conn| allocation::release_agent(conn, agent_id, actor, reason, &at))
            .inspect_err(|e| log_rejection("release", "-", agent_id, e))?;

        if let Some(city) = &outcome.city {
            info!(city_id = %city.id, agent_id, actor = %actor, "City released");
            self.events.emit(TerritoryEvent::new(
                AssignmentAction::Released,
                Some(city.id.clone()),
                Some(agent_id.to_string()),
                actor.clone(),
                reason,
                at,
            ));
        }

        Ok(outcome)
    }

    /// Assign a city regardless of reservation, displacing any current
    /// owner. Authorization of `actor` is the caller's job; the actor is
    /// recorded on every resulting trail entry.
    pub fn administrative_override(
        &self,
        city_id: &str,
        agent_id: &str,
        actor: &Actor,
        reason: &str,
    ) -> Result<OverrideOutcome, TerritoryError> {
        let at = to_db_timestamp(self.clock.now());
        let outcome = self
            .db
            .with_conn_mut(|conn| {
                allocation::administrative_override(conn, city_id, agent_id, actor, reason, &at)
            })
            .inspect_err(|e| log_rejection("override", city_id, agent_id, e))?;

        info!(
            city_id,
            agent_id,
            displaced = ?outcome.displaced_agent_id,
            actor = %actor,
            "Administrative override"
        );
        let mut event = TerritoryEvent::new(
            AssignmentAction::AdministrativeOverride,
            Some(city_id.to_string()),
            Some(agent_id.to_string()),
            actor.clone(),
            reason,
            at,
        );
        event.displaced_agent_id = outcome.displaced_agent_id.clone();
        self.events.emit(event);

        Ok(outcome)
    }

    /// Permanently evict an agent to `placement`.
    pub fn void_agent(
        &self,
        agent_id: &str,
        placement: &VoidPlacement,
        actor: &Actor,
        reason: &str,
    ) -> Result<VoidOutcome, TerritoryError> {
        self.void_inner(agent_id, placement, actor, reason, None)?
            .ok_or_else(|| TerritoryError::Internal("Unguarded void returned no outcome".to_string()))
    }

    /// Void only if the agent is still inactive at commit time: its last
    /// liveness must be at or before `inactive_before`. `Ok(None)` means the
    /// agent came back and nothing was written.
    pub(crate) fn void_if_inactive(
        &self,
        agent_id: &str,
        placement: &VoidPlacement,
        actor: &Actor,
        reason: &str,
        inactive_before: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<VoidOutcome>, TerritoryError> {
        self.void_inner(agent_id, placement, actor, reason, Some(inactive_before))
    }

    fn void_inner(
        &self,
        agent_id: &str,
        placement: &VoidPlacement,
        actor: &Actor,
        reason: &str,
        inactive_before: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Option<VoidOutcome>, TerritoryError> {
        let at = to_db_timestamp(self.clock.now());
        let outcome = self
            .db
            .with_conn_mut(|conn| {
                allocation::void_agent(conn, agent_id, placement, actor, reason, &at, inactive_before)
            })
            .inspect_err(|e| log_rejection("void", "-", agent_id, e))?;

        if let Some(voided) = &outcome {
            info!(
                agent_id,
                zone = %placement.zone,
                released_city_id = ?voided.released_city_id,
                actor = %actor,
                "Agent voided"
            );
            // city_id is the city released on the way into the void, if any
            self.events.emit(TerritoryEvent::new(
                AssignmentAction::Voided,
                voided.released_city_id.clone(),
                Some(agent_id.to_string()),
                actor.clone(),
                reason,
                at,
            ));
        }

        Ok(outcome)
    }
}

fn log_rejection(operation: &str, city_id: &str, agent_id: &str, error: &TerritoryError) {
    if error.is_retryable() || error.is_permanent() || error.is_not_found() {
        info!(operation, city_id, agent_id, error = %error, "Allocation rejected");
    } else {
        warn!(operation, city_id, agent_id, error = %error, "Allocation failed");
    }
}
