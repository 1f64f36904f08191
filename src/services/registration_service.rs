//! Registration service - placeholder agent plus bounded random claim
//!
//! A random pick is only advisory, so a concurrent registration can take
//! the picked city before our claim commits. `AlreadyOwned` is therefore
//! retried with a fresh pick, up to a fixed number of attempts and a
//! wall-clock budget. If registration fails for any reason, the placeholder
//! agent is deleted again.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::{to_db_timestamp, Clock};
use crate::config::RegistrationConfig;
use crate::db::allocation::ClaimOutcome;
use crate::db::{agents, Actor, Agent, City, TerritoryDb};
use crate::error::TerritoryError;

use super::allocation_service::AllocationService;
use super::catalog_service::{normalize_country, CatalogService, EligiblePick};

/// Reason recorded on registration claims
pub const REGISTRATION_REASON: &str = "registration";

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub agent: Agent,
    pub city: City,
    pub attempts: u32,
}

pub struct RegistrationService {
    db: Arc<TerritoryDb>,
    catalog: Arc<CatalogService>,
    allocation: Arc<AllocationService>,
    clock: Arc<dyn Clock>,
    config: RegistrationConfig,
}

impl RegistrationService {
    pub fn new(
        db: Arc<TerritoryDb>,
        catalog: Arc<CatalogService>,
        allocation: Arc<AllocationService>,
        clock: Arc<dyn Clock>,
        config: RegistrationConfig,
    ) -> Self {
        Self {
            db,
            catalog,
            allocation,
            clock,
            config,
        }
    }

    /// Create an agent without territory. Registration counts as a proof
    /// of life.
    pub fn register_agent(&self, agent_id: &str, display_name: Option<&str>) -> Result<Agent, TerritoryError> {
        validate_agent_id(agent_id)?;
        let now = to_db_timestamp(self.clock.now());
        let agent = self
            .db
            .with_conn_mut(|conn| agents::insert_agent(conn, agent_id, display_name, Some(&now), &now))?;
        debug!(agent_id, "Agent registered");
        Ok(agent)
    }

    /// Register a new agent and give it a random eligible city in `country_code`.
    pub fn register(
        &self,
        agent_id: &str,
        display_name: Option<&str>,
        country_code: &str,
    ) -> Result<Registration, TerritoryError> {
        self.register_with(agent_id, display_name, country_code, |country| {
            self.catalog.pick_random_eligible(country)
        })
    }

    fn register_with<P>(
        &self,
        agent_id: &str,
        display_name: Option<&str>,
        country_code: &str,
        pick: P,
    ) -> Result<Registration, TerritoryError>
    where
        P: FnMut(&str) -> Result<EligiblePick, TerritoryError>,
    {
        self.register_agent(agent_id, display_name)?;

        match self.claim_with(agent_id, country_code, pick) {
            Ok((outcome, attempts)) => {
                info!(agent_id, city_id = %outcome.city.id, attempts, "Registration complete");
                Ok(Registration {
                    agent: outcome.agent,
                    city: outcome.city,
                    attempts,
                })
            }
            Err(e) => {
                self.rollback_placeholder(agent_id);
                Err(e)
            }
        }
    }

    /// Claim a random eligible city for an existing agent, retrying lost
    /// races within the configured bounds. Returns the claim and the number
    /// of attempts it took.
    pub fn claim_random(&self, agent_id: &str, country_code: &str) -> Result<(ClaimOutcome, u32), TerritoryError> {
        self.claim_with(agent_id, country_code, |country| {
            self.catalog.pick_random_eligible(country)
        })
    }

    /// The bounded pick-then-claim loop over an arbitrary picker
    fn claim_with<P>(
        &self,
        agent_id: &str,
        country_code: &str,
        mut pick: P,
    ) -> Result<(ClaimOutcome, u32), TerritoryError>
    where
        P: FnMut(&str) -> Result<EligiblePick, TerritoryError>,
    {
        let country = normalize_country(country_code);
        let started = Instant::now();
        let budget = self.config.max_claim_elapsed();
        let mut attempts = 0u32;

        while attempts < self.config.max_claim_attempts {
            if attempts > 0 && started.elapsed() >= budget {
                debug!(agent_id, attempts, "Claim time budget spent");
                break;
            }
            attempts += 1;

            let city = match pick(&country)? {
                EligiblePick::Found { city } => city,
                EligiblePick::Unavailable { alternatives } => {
                    return Err(TerritoryError::Exhausted {
                        country_code: country,
                        attempts,
                        alternatives,
                    });
                }
            };

            match self
                .allocation
                .claim(&city.id, agent_id, &Actor::SelfRegistration, REGISTRATION_REASON)
            {
                Ok(outcome) => return Ok((outcome, attempts)),
                Err(TerritoryError::AlreadyOwned { city_id, .. }) => {
                    debug!(agent_id, city_id = %city_id, attempts, "Lost claim race, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        warn!(agent_id, country_code = %country, attempts, "Claim retries exhausted");
        let alternatives = self
            .catalog
            .country_availability()?
            .into_iter()
            .filter(|c| c.country_code != country)
            .collect();
        Err(TerritoryError::Exhausted {
            country_code: country,
            attempts,
            alternatives,
        })
    }

    pub fn get_agent(&self, agent_id: &str) -> Result<Agent, TerritoryError> {
        self.db
            .with_conn(|conn| agents::get_agent(conn, agent_id))?
            .ok_or_else(|| TerritoryError::AgentNotFound(agent_id.to_string()))
    }

    pub fn list_agents(&self, include_voided: bool, limit: u32) -> Result<Vec<Agent>, TerritoryError> {
        self.db
            .with_conn(|conn| agents::list_agents(conn, include_voided, limit))
    }

    fn rollback_placeholder(&self, agent_id: &str) {
        match self
            .db
            .with_conn_mut(|conn| agents::delete_placeholder(conn, agent_id))
        {
            Ok(true) => debug!(agent_id, "Placeholder agent rolled back"),
            Ok(false) => warn!(agent_id, "Placeholder agent was not bare; left in place"),
            Err(e) => warn!(agent_id, error = %e, "Failed to roll back placeholder agent"),
        }
    }
}

fn validate_agent_id(agent_id: &str) -> Result<(), TerritoryError> {
    if agent_id.trim().is_empty() {
        return Err(TerritoryError::InvalidInput("Agent id must not be empty".into()));
    }
    if agent_id.len() > 128 {
        return Err(TerritoryError::InvalidInput("Agent id longer than 128 bytes".into()));
    }
    Ok(())
}
