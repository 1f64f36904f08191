//! Eviction service - voids agents that stopped proving liveness
//!
//! A sweep reads its candidates from the last committed state, then voids
//! each one in its own transaction through the allocation service. Each
//! void re-checks inactivity at commit time, so an agent that sent a
//! heartbeat mid-sweep is skipped rather than evicted. One agent's failure
//! never stops the rest of the batch.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::clock::{to_db_timestamp, Clock};
use crate::db::{agents, Actor, TerritoryDb};
use crate::error::TerritoryError;
use crate::void_placement::void_placement;

use super::allocation_service::AllocationService;

/// Why a candidate was left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Proved liveness between selection and commit
    StillActive,
    /// Voided by a concurrent sweep
    AlreadyVoided,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedAgent {
    pub agent_id: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepFailure {
    pub agent_id: String,
    pub error: String,
}

/// Result of one sweep
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub threshold_days: u32,
    pub swept_at: String,
    pub candidates: usize,
    pub voided: Vec<String>,
    pub skipped: Vec<SkippedAgent>,
    pub failures: Vec<SweepFailure>,
}

pub struct EvictionService {
    db: Arc<TerritoryDb>,
    allocation: Arc<AllocationService>,
    clock: Arc<dyn Clock>,
}

impl EvictionService {
    pub fn new(db: Arc<TerritoryDb>, allocation: Arc<AllocationService>, clock: Arc<dyn Clock>) -> Self {
        Self { db, allocation, clock }
    }

    /// Void every non-voided agent with at least `threshold_days` of
    /// inactivity (or none recorded at all).
    pub fn sweep(&self, threshold_days: u32) -> Result<SweepReport, TerritoryError> {
        let now = self.clock.now();
        let cutoff_stamp = to_db_timestamp(inactivity_cutoff(now, threshold_days));

        let candidates: Vec<String> = self
            .db
            .with_conn(|conn| agents::list_inactive_since(conn, &cutoff_stamp))?
            .into_iter()
            .map(|agent| agent.id)
            .collect();

        info!(threshold_days, candidates = candidates.len(), "Starting eviction sweep");
        let report = self.void_candidates(candidates, threshold_days, now);
        info!(
            voided = report.voided.len(),
            skipped = report.skipped.len(),
            failures = report.failures.len(),
            "Eviction sweep finished"
        );
        Ok(report)
    }

    /// Void each candidate in its own transaction. The candidate list may
    /// be stale by now; the commit-time checks sort out who is still due.
    fn void_candidates(&self, candidates: Vec<String>, threshold_days: u32, now: DateTime<Utc>) -> SweepReport {
        let cutoff = inactivity_cutoff(now, threshold_days);
        let reason = format!("no liveness for {} days", threshold_days);
        let mut report = SweepReport {
            threshold_days,
            swept_at: to_db_timestamp(now),
            candidates: candidates.len(),
            voided: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
        };

        for agent_id in candidates {
            let placement = void_placement(&agent_id);
            match self
                .allocation
                .void_if_inactive(&agent_id, &placement, &Actor::System, &reason, cutoff)
            {
                Ok(Some(_)) => report.voided.push(agent_id),
                Ok(None) => report.skipped.push(SkippedAgent {
                    agent_id,
                    reason: SkipReason::StillActive,
                }),
                Err(TerritoryError::AlreadyVoided(_)) => report.skipped.push(SkippedAgent {
                    agent_id,
                    reason: SkipReason::AlreadyVoided,
                }),
                Err(e) => {
                    warn!(agent_id = %agent_id, error = %e, "Failed to void agent");
                    report.failures.push(SweepFailure {
                        agent_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        report
    }
}

fn inactivity_cutoff(now: DateTime<Utc>, threshold_days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(threshold_days))
}
