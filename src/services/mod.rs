//! Service layer for territory-engine
//!
//! Services sit between callers (CLI, daemon, embedding applications) and the
//! repository functions in [`crate::db`]. They add:
//! - Input validation
//! - A shared [`Clock`] for every timestamp
//! - Logging of accepted and rejected operations
//! - Event emission after commit
//!
//! ## Architecture
//!
//! ```text
//! CLI / Sweeper / embedding app
//!     ↓
//! Service Layer (registration, allocation, liveness, eviction, audit)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```
//!
//! Only [`AllocationService`] writes ownership, territory or void state.

pub mod events;
pub mod catalog_service;
pub mod allocation_service;
pub mod liveness_service;
pub mod eviction_service;
pub mod registration_service;
pub mod audit_service;

// Re-exports
pub use events::{EventBus, EventListener, LoggingEventListener, TerritoryEvent};
pub use catalog_service::{CatalogService, EligiblePick};
pub use allocation_service::AllocationService;
pub use liveness_service::{ApproachingEviction, LivenessService, LivenessStatus};
pub use eviction_service::{EvictionService, SkipReason, SweepReport};
pub use registration_service::{Registration, RegistrationService};
pub use audit_service::AuditService;

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::TerritoryDb;

/// Service container for dependency injection
///
/// Holds all services over one database, one event bus and one clock.
pub struct Services {
    pub db: Arc<TerritoryDb>,
    pub clock: Arc<dyn Clock>,
    pub catalog: Arc<CatalogService>,
    pub allocation: Arc<AllocationService>,
    pub liveness: Arc<LivenessService>,
    pub eviction: Arc<EvictionService>,
    pub registration: Arc<RegistrationService>,
    pub audit: Arc<AuditService>,
    pub events: Arc<EventBus>,
}

impl Services {
    /// Create all services with the system clock
    pub fn new(db: Arc<TerritoryDb>, config: &Config) -> Self {
        Self::with_clock(db, Arc::new(SystemClock), config)
    }

    /// Create all services with a caller-supplied clock (tests drive time
    /// through [`crate::clock::ManualClock`])
    pub fn with_clock(db: Arc<TerritoryDb>, clock: Arc<dyn Clock>, config: &Config) -> Self {
        let events = Arc::new(EventBus::new());

        let catalog = Arc::new(CatalogService::new(db.clone(), clock.clone()));
        let allocation = Arc::new(AllocationService::new(db.clone(), events.clone(), clock.clone()));
        let liveness = Arc::new(LivenessService::new(
            db.clone(),
            clock.clone(),
            config.eviction.clone(),
        ));
        let eviction = Arc::new(EvictionService::new(db.clone(), allocation.clone(), clock.clone()));
        let registration = Arc::new(RegistrationService::new(
            db.clone(),
            catalog.clone(),
            allocation.clone(),
            clock.clone(),
            config.registration.clone(),
        ));
        let audit = Arc::new(AuditService::new(db.clone()));

        Self {
            db,
            clock,
            catalog,
            allocation,
            liveness,
            eviction,
            registration,
            audit,
            events,
        }
    }
}
