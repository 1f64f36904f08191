//! Liveness service - proof-of-life bookkeeping and eviction warnings
//!
//! The warning window and the sweep read the same threshold from
//! [`EvictionConfig`], so an agent always passes through the warning window
//! before it becomes eligible for eviction.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;

use crate::clock::{to_db_timestamp, Clock};
use crate::config::EvictionConfig;
use crate::db::{agents, Agent, TerritoryDb};
use crate::error::TerritoryError;

/// Where an agent stands relative to eviction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LivenessStatus {
    /// Within the warning window of eviction, or already overdue
    pub approaching: bool,
    /// Whole days since last liveness; `None` if it was never recorded
    pub days_inactive: Option<i64>,
    /// Whole days left before the sweep may void the agent (0 when due)
    pub days_until_void: i64,
}

/// Compute status from inactivity alone
pub fn liveness_status(days_inactive: Option<i64>, threshold_days: u32, warning_days: u32) -> LivenessStatus {
    let threshold = i64::from(threshold_days);
    let days_until_void = match days_inactive {
        Some(days) => (threshold - days).max(0),
        None => 0,
    };

    LivenessStatus {
        approaching: days_until_void <= i64::from(warning_days),
        days_inactive,
        days_until_void,
    }
}

/// Whole days between `last` and `now`, never negative
pub fn whole_days_between(last: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - last).num_days().max(0)
}

/// An agent inside the warning window
#[derive(Debug, Clone, Serialize)]
pub struct ApproachingEviction {
    pub agent: Agent,
    pub status: LivenessStatus,
}

pub struct LivenessService {
    db: Arc<TerritoryDb>,
    clock: Arc<dyn Clock>,
    eviction: EvictionConfig,
}

impl LivenessService {
    pub fn new(db: Arc<TerritoryDb>, clock: Arc<dyn Clock>, eviction: EvictionConfig) -> Self {
        Self { db, clock, eviction }
    }

    /// Record a proof of life. Older timestamps than the stored one are
    /// ignored; returns whether the stored value moved forward. A voided
    /// agent cannot come back, so its proofs fail with `AgentVoided`.
    pub fn record_liveness(&self, agent_id: &str, at: Option<DateTime<Utc>>) -> Result<bool, TerritoryError> {
        let at = at.unwrap_or_else(|| self.clock.now());
        let stamp = to_db_timestamp(at);

        let advanced = self.db.with_conn_mut(|conn| {
            let advanced = agents::record_liveness(conn, agent_id, &stamp)?;
            if !advanced {
                match agents::get_agent(conn, agent_id)? {
                    None => return Err(TerritoryError::AgentNotFound(agent_id.to_string())),
                    Some(agent) if agent.voided => return Err(TerritoryError::AgentVoided(agent.id)),
                    Some(_) => {}
                }
            }
            Ok(advanced)
        })?;

        debug!(agent_id, at = %stamp, advanced, "Liveness recorded");
        Ok(advanced)
    }

    /// Whole days since last liveness; `None` stands for "never"
    pub fn days_since(&self, agent_id: &str) -> Result<Option<i64>, TerritoryError> {
        let agent = self.agent(agent_id)?;
        let now = self.clock.now();
        Ok(agent.last_liveness_at.map(|last| whole_days_between(last, now)))
    }

    /// Eviction status of a live agent. Voided agents have no status to
    /// report and fail with `AgentVoided`.
    pub fn status(&self, agent_id: &str, threshold_days: u32, warning_days: u32) -> Result<LivenessStatus, TerritoryError> {
        let agent = self.agent(agent_id)?;
        if agent.voided {
            return Err(TerritoryError::AgentVoided(agent.id));
        }
        let days = agent
            .last_liveness_at
            .map(|last| whole_days_between(last, self.clock.now()));
        Ok(liveness_status(days, threshold_days, warning_days))
    }

    /// Status against the configured eviction threshold
    pub fn status_default(&self, agent_id: &str) -> Result<LivenessStatus, TerritoryError> {
        self.status(agent_id, self.eviction.threshold_days, self.eviction.warning_days)
    }

    /// Non-voided agents inside the warning window but not yet due
    pub fn list_approaching(&self, threshold_days: u32, warning_days: u32) -> Result<Vec<ApproachingEviction>, TerritoryError> {
        let now = self.clock.now();
        let after = to_db_timestamp(now - Duration::days(i64::from(threshold_days)));
        let until = to_db_timestamp(
            now - Duration::days(i64::from(threshold_days.saturating_sub(warning_days))),
        );

        let agents = self
            .db
            .with_conn(|conn| agents::list_liveness_between(conn, &after, &until))?;

        Ok(agents
            .into_iter()
            .map(|agent| {
                let days = agent.last_liveness_at.map(|last| whole_days_between(last, now));
                let status = liveness_status(days, threshold_days, warning_days);
                ApproachingEviction { agent, status }
            })
            .collect())
    }

    pub fn eviction_config(&self) -> &EvictionConfig {
        &self.eviction
    }

    fn agent(&self, agent_id: &str) -> Result<Agent, TerritoryError> {
        self.db
            .with_conn(|conn| agents::get_agent(conn, agent_id))?
            .ok_or_else(|| TerritoryError::AgentNotFound(agent_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn setup() -> (LivenessService, Arc<ManualClock>, Arc<TerritoryDb>) {
        let db = Arc::new(TerritoryDb::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(start()));
        let svc = LivenessService::new(db.clone(), clock.clone(), EvictionConfig::default());
        (svc, clock, db)
    }

    fn add_agent(db: &TerritoryDb, id: &str, last: Option<DateTime<Utc>>) {
        let last = last.map(to_db_timestamp);
        db.with_conn_mut(|conn| agents::insert_agent(conn, id, None, last.as_deref(), "t0"))
            .unwrap();
    }

    #[test]
    fn test_status_is_pure_function_of_days() {
        assert_eq!(
            liveness_status(Some(3), 7, 2),
            LivenessStatus { approaching: false, days_inactive: Some(3), days_until_void: 4 }
        );
        assert_eq!(
            liveness_status(Some(5), 7, 2),
            LivenessStatus { approaching: true, days_inactive: Some(5), days_until_void: 2 }
        );
        assert_eq!(liveness_status(Some(9), 7, 2).days_until_void, 0);
        assert!(liveness_status(None, 7, 2).approaching);
    }

    #[test]
    fn test_days_since_never_recorded() {
        let (svc, _clock, db) = setup();
        add_agent(&db, "ghost", None);
        assert_eq!(svc.days_since("ghost").unwrap(), None);
        assert!(matches!(svc.days_since("nobody"), Err(TerritoryError::AgentNotFound(_))));
    }

    #[test]
    fn test_out_of_order_heartbeat_does_not_regress() {
        let (svc, clock, db) = setup();
        add_agent(&db, "a", Some(start()));

        clock.advance(Duration::days(3));
        assert!(svc.record_liveness("a", None).unwrap());
        assert!(!svc.record_liveness("a", Some(start() + Duration::days(1))).unwrap());

        clock.advance(Duration::days(2));
        assert_eq!(svc.days_since("a").unwrap(), Some(2));
    }

    #[test]
    fn test_record_liveness_unknown_agent() {
        let (svc, _clock, _db) = setup();
        assert!(matches!(
            svc.record_liveness("nobody", None),
            Err(TerritoryError::AgentNotFound(_))
        ));
    }

    #[test]
    fn test_voided_agent_has_no_status_and_no_heartbeat() {
        let (svc, clock, db) = setup();
        add_agent(&db, "a", Some(start()));
        db.with_conn_mut(|conn| {
            agents::set_void(conn, "a", &crate::void_placement::void_placement("a"), "t1")
        })
        .unwrap();

        assert!(matches!(svc.status_default("a"), Err(TerritoryError::AgentVoided(_))));

        clock.advance(Duration::days(1));
        assert!(matches!(
            svc.record_liveness("a", None),
            Err(TerritoryError::AgentVoided(_))
        ));
        assert_eq!(svc.days_since("a").unwrap(), Some(1));
    }

    #[test]
    fn test_list_approaching_uses_window() {
        let (svc, clock, db) = setup();
        add_agent(&db, "fresh", Some(start()));
        add_agent(&db, "warned", Some(start() - Duration::days(1)));
        add_agent(&db, "overdue", Some(start() - Duration::days(3)));

        clock.advance(Duration::days(5) + Duration::hours(1));
        let approaching = svc.list_approaching(7, 2).unwrap();
        let ids: Vec<_> = approaching.iter().map(|a| a.agent.id.as_str()).collect();
        assert_eq!(ids, vec!["warned", "fresh"]);
        assert!(approaching.iter().all(|a| a.status.approaching));
    }
}
