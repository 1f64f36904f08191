//! Read-only access to the assignment trail

use std::sync::Arc;

use tracing::debug;

use crate::db::{assignments, AssignmentRecord, TerritoryDb};
use crate::error::TerritoryError;

/// Default page size for trail queries
pub const DEFAULT_TRAIL_LIMIT: u32 = 500;

pub struct AuditService {
    db: Arc<TerritoryDb>,
}

impl AuditService {
    pub fn new(db: Arc<TerritoryDb>) -> Self {
        Self { db }
    }

    /// Every ownership change involving `city_id`, oldest first
    pub fn trail_for_city(&self, city_id: &str, limit: u32) -> Result<Vec<AssignmentRecord>, TerritoryError> {
        let records = self
            .db
            .with_conn(|conn| assignments::list_for_city(conn, city_id, limit))?;
        debug!(city_id, count = records.len(), "Loaded city trail");
        Ok(records)
    }

    /// Every ownership change involving `agent_id`, oldest first
    pub fn trail_for_agent(&self, agent_id: &str, limit: u32) -> Result<Vec<AssignmentRecord>, TerritoryError> {
        let records = self
            .db
            .with_conn(|conn| assignments::list_for_agent(conn, agent_id, limit))?;
        debug!(agent_id, count = records.len(), "Loaded agent trail");
        Ok(records)
    }

    /// Records after `after_id`, for tailing the trail
    pub fn since(&self, after_id: i64, limit: u32) -> Result<Vec<AssignmentRecord>, TerritoryError> {
        self.db.with_conn(|conn| assignments::list_since(conn, after_id, limit))
    }

    /// Id of the newest record, 0 for an empty trail
    pub fn latest_id(&self) -> Result<i64, TerritoryError> {
        self.db.with_conn(assignments::latest_id)
    }
}
