//! Catalog service - read access to cities and catalog administration
//!
//! Random selection here is advisory only: it reserves nothing, and the
//! allocation service re-checks eligibility inside the claim transaction.

use std::path::Path;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::{to_db_timestamp, Clock};
use crate::db::{cities, BulkResult, City, NewCity, TerritoryDb};
use crate::error::{CountryAvailability, TerritoryError};

/// Outcome of a random pick in one country
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EligiblePick {
    Found { city: City },
    /// Nothing eligible; other countries ranked by eligible count
    Unavailable { alternatives: Vec<CountryAvailability> },
}

/// On-disk catalog layout (`[[city]]` tables in TOML)
#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(rename = "city", default)]
    cities: Vec<NewCity>,
}

pub struct CatalogService {
    db: Arc<TerritoryDb>,
    clock: Arc<dyn Clock>,
}

impl CatalogService {
    pub fn new(db: Arc<TerritoryDb>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get(&self, city_id: &str) -> Result<City, TerritoryError> {
        self.db
            .with_conn(|conn| cities::get_city(conn, city_id))?
            .ok_or_else(|| TerritoryError::CityNotFound(city_id.to_string()))
    }

    pub fn list(&self, country_code: Option<&str>) -> Result<Vec<City>, TerritoryError> {
        let country = country_code.map(normalize_country);
        self.db.with_conn(|conn| cities::list_cities(conn, country.as_deref()))
    }

    /// Unreserved, unowned cities in a country
    pub fn list_eligible(&self, country_code: &str) -> Result<Vec<City>, TerritoryError> {
        let country = normalize_country(country_code);
        self.db.with_conn(|conn| cities::list_eligible(conn, &country))
    }

    /// Countries with eligible cities, most available first
    pub fn country_availability(&self) -> Result<Vec<CountryAvailability>, TerritoryError> {
        self.db.with_conn(cities::country_availability)
    }

    /// Pick an eligible city uniformly at random
    pub fn pick_random_eligible(&self, country_code: &str) -> Result<EligiblePick, TerritoryError> {
        self.pick_random_eligible_with(country_code, &mut rand::thread_rng())
    }

    pub fn pick_random_eligible_with<R: Rng + ?Sized>(
        &self,
        country_code: &str,
        rng: &mut R,
    ) -> Result<EligiblePick, TerritoryError> {
        let country = normalize_country(country_code);
        let eligible = self.list_eligible(&country)?;

        match eligible.choose(rng) {
            Some(city) => {
                debug!(country_code = %country, city_id = %city.id, pool = eligible.len(), "Picked eligible city");
                Ok(EligiblePick::Found { city: city.clone() })
            }
            None => {
                let alternatives = self
                    .country_availability()?
                    .into_iter()
                    .filter(|c| c.country_code != country)
                    .collect();
                debug!(country_code = %country, "No eligible city");
                Ok(EligiblePick::Unavailable { alternatives })
            }
        }
    }

    // =========================================================================
    // Catalog Administration
    // =========================================================================

    /// Load catalog entries, skipping ids already present
    pub fn seed(&self, items: Vec<NewCity>) -> Result<BulkResult, TerritoryError> {
        let at = to_db_timestamp(self.clock.now());
        let result = self.db.with_conn_mut(|conn| cities::insert_cities(conn, items, &at))?;
        info!(
            inserted = result.inserted,
            skipped = result.skipped,
            errors = result.errors.len(),
            "Catalog seeded"
        );
        Ok(result)
    }

    /// Seed from a `.toml` (`[[city]]` tables) or `.json` (array) file
    pub fn seed_from_file(&self, path: &Path) -> Result<BulkResult, TerritoryError> {
        let items = load_catalog_file(path)?;
        self.seed(items)
    }

    /// Change the reserved flag. An existing owner keeps the city.
    pub fn set_reserved(&self, city_id: &str, reserved: bool) -> Result<City, TerritoryError> {
        let updated = self
            .db
            .with_conn_mut(|conn| cities::set_reserved(conn, city_id, reserved))?;
        if !updated {
            return Err(TerritoryError::CityNotFound(city_id.to_string()));
        }
        info!(city_id, reserved, "City reserved flag changed");
        self.get(city_id)
    }
}

/// Parse a catalog file by extension
pub fn load_catalog_file(path: &Path) -> Result<Vec<NewCity>, TerritoryError> {
    let content = std::fs::read_to_string(path)?;
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();

    match extension {
        "json" => Ok(serde_json::from_str(&content)?),
        "toml" => {
            let file: CatalogFile = toml::from_str(&content)
                .map_err(|e| TerritoryError::InvalidInput(format!("Invalid catalog TOML: {}", e)))?;
            Ok(file.cities)
        }
        other => Err(TerritoryError::InvalidInput(format!(
            "Unsupported catalog format '{}' (expected .toml or .json)",
            other
        ))),
    }
}

pub(crate) fn normalize_country(country_code: &str) -> String {
    country_code.trim().to_uppercase()
}
