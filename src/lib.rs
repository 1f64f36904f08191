//! Territory Engine - exclusive city ownership with liveness-based eviction
//!
//! Agents claim cities from a fixed catalog. Each city has at most one owner
//! and each agent holds at most one city. Agents must keep proving liveness;
//! the sweeper permanently voids agents that go quiet past the eviction
//! threshold, releasing their city and parking them at a deterministic
//! ocean coordinate.
//!
//! ## Components
//!
//! | Component | Module |
//! |-----------|--------|
//! | Resource catalog | [`services::catalog_service`], [`db::cities`] |
//! | Allocation engine | [`services::allocation_service`], [`db::allocation`] |
//! | Liveness tracker | [`services::liveness_service`] |
//! | Eviction sweeper | [`services::eviction_service`], [`sweeper`] |
//! | Void placement | [`void_placement`] |
//! | Assignment trail | [`services::audit_service`], [`db::assignments`] |
//! | Notifications | [`services::events`] |
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/territory-engine/
//! ├── territory.db        # SQLite (WAL): cities, agents, assignments
//! └── config.toml         # Configuration
//! ```

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod services;
pub mod sweeper;
pub mod void_placement;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, EvictionConfig, RegistrationConfig};
pub use db::{Actor, Agent, AssignmentAction, AssignmentRecord, City, NewCity, Territory, TerritoryDb};
pub use error::{CountryAvailability, TerritoryError};
pub use services::{Services, SweepReport, TerritoryEvent};
pub use sweeper::Sweeper;
pub use void_placement::{void_placement, VoidPlacement};
