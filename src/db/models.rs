//! Row types for cities, agents and the assignment trail
//!
//! SQLite stores timestamps as fixed-width RFC 3339 TEXT (see
//! [`crate::clock::to_db_timestamp`]) and booleans as 0/1 INTEGER.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::clock::from_db_timestamp;
use crate::error::TerritoryError;
use crate::void_placement::VoidPlacement;

// ============================================================================
// Actors
// ============================================================================

/// Who performed an allocation change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Actor {
    /// An agent claiming for itself during registration or relocation.
    SelfRegistration,
    /// Automated jobs such as the eviction sweep.
    System,
    /// A named administrator.
    Admin(String),
}

pub mod actors {
    pub const SELF_REGISTRATION: &str = "self-registration";
    pub const SYSTEM: &str = "system";
}

impl Actor {
    pub fn admin(id: impl Into<String>) -> Result<Self, TerritoryError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(TerritoryError::InvalidInput("Admin id must not be empty".into()));
        }
        if trimmed == actors::SELF_REGISTRATION || trimmed == actors::SYSTEM {
            return Err(TerritoryError::InvalidInput(format!(
                "'{}' is reserved and cannot be used as an admin id",
                trimmed
            )));
        }
        Ok(Actor::Admin(trimmed.to_string()))
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Actor::Admin(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Actor::SelfRegistration => actors::SELF_REGISTRATION,
            Actor::System => actors::SYSTEM,
            Actor::Admin(id) => id,
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Actor {
    type Err = TerritoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            actors::SELF_REGISTRATION => Ok(Actor::SelfRegistration),
            actors::SYSTEM => Ok(Actor::System),
            other => Actor::admin(other),
        }
    }
}

impl From<Actor> for String {
    fn from(actor: Actor) -> Self {
        actor.as_str().to_string()
    }
}

impl TryFrom<String> for Actor {
    type Error = TerritoryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ============================================================================
// Assignment actions
// ============================================================================

/// Kind of ownership change recorded in the assignment trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssignmentAction {
    Claimed,
    Released,
    Voided,
    AdministrativeOverride,
}

impl AssignmentAction {
    pub const ALL: [AssignmentAction; 4] = [
        AssignmentAction::Claimed,
        AssignmentAction::Released,
        AssignmentAction::Voided,
        AssignmentAction::AdministrativeOverride,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentAction::Claimed => "claimed",
            AssignmentAction::Released => "released",
            AssignmentAction::Voided => "voided",
            AssignmentAction::AdministrativeOverride => "administrative-override",
        }
    }
}

impl fmt::Display for AssignmentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignmentAction {
    type Err = TerritoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AssignmentAction::ALL
            .iter()
            .find(|action| action.as_str() == s)
            .copied()
            .ok_or_else(|| TerritoryError::InvalidInput(format!("Unknown assignment action: {}", s)))
    }
}

// ============================================================================
// Cities
// ============================================================================

/// A claimable city from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    pub id: String,
    pub country_code: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub reserved: bool,
    pub owner_id: Option<String>,
    pub claimed_at: Option<String>,
    pub created_at: String,
}

impl City {
    pub(crate) fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            country_code: row.get("country_code")?,
            name: row.get("name")?,
            latitude: row.get("latitude")?,
            longitude: row.get("longitude")?,
            reserved: row.get::<_, i64>("reserved")? != 0,
            owner_id: row.get("owner_id")?,
            claimed_at: row.get("claimed_at")?,
            created_at: row.get("created_at")?,
        })
    }

    /// Open for self-service claim.
    pub fn is_eligible(&self) -> bool {
        !self.reserved && self.owner_id.is_none()
    }
}

/// Catalog entry as loaded from a seed file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewCity {
    pub id: String,
    pub country_code: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub reserved: bool,
}

// ============================================================================
// Agents
// ============================================================================

/// What an agent currently occupies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Territory {
    Unassigned,
    City { city_id: String },
    Void(VoidPlacement),
}

impl Territory {
    pub fn city_id(&self) -> Option<&str> {
        match self {
            Territory::City { city_id } => Some(city_id),
            _ => None,
        }
    }
}

/// A registered agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub display_name: Option<String>,
    pub territory: Territory,
    pub voided: bool,
    pub voided_at: Option<String>,
    pub last_liveness_at: Option<DateTime<Utc>>,
    pub created_at: String,
}

impl Agent {
    pub(crate) fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let voided = row.get::<_, i64>("voided")? != 0;
        let city_id: Option<String> = row.get("city_id")?;
        let void_zone: Option<String> = row.get("void_zone")?;

        let territory = match (voided, city_id, void_zone) {
            (true, _, Some(zone)) => Territory::Void(VoidPlacement {
                zone,
                latitude: row.get::<_, Option<f64>>("void_latitude")?.unwrap_or_default(),
                longitude: row.get::<_, Option<f64>>("void_longitude")?.unwrap_or_default(),
            }),
            (_, Some(city_id), _) => Territory::City { city_id },
            _ => Territory::Unassigned,
        };

        let last_liveness: Option<String> = row.get("last_liveness_at")?;

        Ok(Self {
            id: row.get("id")?,
            display_name: row.get("display_name")?,
            territory,
            voided,
            voided_at: row.get("voided_at")?,
            last_liveness_at: last_liveness.as_deref().and_then(from_db_timestamp),
            created_at: row.get("created_at")?,
        })
    }
}

// ============================================================================
// Assignment trail
// ============================================================================

/// One append-only entry in the assignment trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub id: i64,
    pub city_id: Option<String>,
    pub agent_id: Option<String>,
    pub action: AssignmentAction,
    pub actor: Actor,
    pub reason: String,
    pub created_at: String,
}

impl AssignmentRecord {
    pub(crate) fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let action: String = row.get("action")?;
        let actor: String = row.get("actor")?;
        Ok(Self {
            id: row.get("id")?,
            city_id: row.get("city_id")?,
            agent_id: row.get("agent_id")?,
            action: action.parse().map_err(conversion_error)?,
            actor: actor.parse().map_err(conversion_error)?,
            reason: row.get("reason")?,
            created_at: row.get("created_at")?,
        })
    }
}

fn conversion_error(e: TerritoryError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

/// Assignment entry about to be appended.
#[derive(Debug, Clone)]
pub struct NewAssignment<'a> {
    pub city_id: Option<&'a str>,
    pub agent_id: Option<&'a str>,
    pub action: AssignmentAction,
    pub actor: &'a Actor,
    pub reason: &'a str,
}
