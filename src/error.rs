//! Error types for territory-engine

use serde::Serialize;
use thiserror::Error;

/// Eligible-city count for one country, used to suggest alternatives
/// when a country has run dry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountryAvailability {
    pub country_code: String,
    pub eligible: u64,
}

#[derive(Error, Debug)]
pub enum TerritoryError {
    #[error("City not found: {0}")]
    CityNotFound(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("City {city_id} is already owned by {owner_id}")]
    AlreadyOwned { city_id: String, owner_id: String },

    #[error("Agent {agent_id} already holds {city_id}; release it first")]
    AgentAlreadyHasTerritory { agent_id: String, city_id: String },

    #[error("City {0} is reserved and can only be assigned by an administrator")]
    Reserved(String),

    #[error("Agent {0} has been voided and cannot hold territory")]
    AgentVoided(String),

    #[error("Agent {0} is already voided")]
    AlreadyVoided(String),

    #[error("No city could be claimed in {country_code} after {attempts} attempts")]
    Exhausted {
        country_code: String,
        attempts: u32,
        alternatives: Vec<CountryAvailability>,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TerritoryError {
    /// Transient conflicts that the tie-break loop may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TerritoryError::AlreadyOwned { .. } | TerritoryError::AgentAlreadyHasTerritory { .. }
        )
    }

    /// Rejections that no amount of retrying will change.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            TerritoryError::Reserved(_)
                | TerritoryError::AgentVoided(_)
                | TerritoryError::AlreadyVoided(_)
        )
    }

    /// Unknown city or agent (the 404-equivalent).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TerritoryError::CityNotFound(_) | TerritoryError::AgentNotFound(_)
        )
    }
}
