//! City catalog queries and seeding

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::debug;

use super::models::{City, NewCity};
use crate::error::{CountryAvailability, TerritoryError};

/// Get a city by ID
pub fn get_city(conn: &Connection, id: &str) -> Result<Option<City>, TerritoryError> {
    let city = conn
        .query_row("SELECT * FROM cities WHERE id = ?", params![id], City::from_row)
        .optional()?;
    Ok(city)
}

/// List cities, optionally restricted to one country
pub fn list_cities(conn: &Connection, country_code: Option<&str>) -> Result<Vec<City>, TerritoryError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM cities WHERE (?1 IS NULL OR country_code = ?1) ORDER BY country_code, name",
    )?;
    let cities = stmt
        .query_map(params![country_code], City::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cities)
}

/// Unreserved, unowned cities in a country
pub fn list_eligible(conn: &Connection, country_code: &str) -> Result<Vec<City>, TerritoryError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM cities
         WHERE country_code = ? AND reserved = 0 AND owner_id IS NULL
         ORDER BY id",
    )?;
    let cities = stmt
        .query_map(params![country_code], City::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    debug!(country_code, count = cities.len(), "Listed eligible cities");
    Ok(cities)
}

/// Countries that still have eligible cities, most available first
pub fn country_availability(conn: &Connection) -> Result<Vec<CountryAvailability>, TerritoryError> {
    let mut stmt = conn.prepare(
        "SELECT country_code, COUNT(*) AS eligible FROM cities
         WHERE reserved = 0 AND owner_id IS NULL
         GROUP BY country_code
         ORDER BY eligible DESC, country_code ASC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CountryAvailability {
                country_code: row.get(0)?,
                eligible: row.get::<_, i64>(1)? as u64,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Result of a bulk seed
#[derive(Debug, Clone, Serialize)]
pub struct BulkResult {
    pub inserted: u64,
    pub skipped: u64,
    pub errors: Vec<String>,
}

/// Insert catalog entries, skipping ids that already exist
pub fn insert_cities(
    conn: &mut Connection,
    items: Vec<NewCity>,
    created_at: &str,
) -> Result<BulkResult, TerritoryError> {
    let tx = conn.transaction()?;

    let mut inserted = 0u64;
    let mut skipped = 0u64;
    let mut errors = vec![];

    for input in items {
        if let Err(reason) = validate_city(&input) {
            errors.push(format!("{}: {}", input.id, reason));
            continue;
        }

        let changes = tx.execute(
            "INSERT OR IGNORE INTO cities (id, country_code, name, latitude, longitude, reserved, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                input.id,
                input.country_code.to_uppercase(),
                input.name,
                input.latitude,
                input.longitude,
                input.reserved as i64,
                created_at,
            ],
        );

        match changes {
            Ok(0) => skipped += 1,
            Ok(_) => inserted += 1,
            Err(e) => errors.push(format!("{}: {}", input.id, e)),
        }
    }

    tx.commit()?;

    Ok(BulkResult {
        inserted,
        skipped,
        errors,
    })
}

fn validate_city(input: &NewCity) -> Result<(), String> {
    if input.id.trim().is_empty() {
        return Err("id must not be empty".into());
    }
    if input.country_code.trim().is_empty() {
        return Err("country_code must not be empty".into());
    }
    if !(-90.0..=90.0).contains(&input.latitude) {
        return Err(format!("latitude {} out of range", input.latitude));
    }
    if !(-180.0..=180.0).contains(&input.longitude) {
        return Err(format!("longitude {} out of range", input.longitude));
    }
    Ok(())
}

/// Flip the reserved flag. Returns false if the city does not exist.
pub fn set_reserved(conn: &Connection, id: &str, reserved: bool) -> Result<bool, TerritoryError> {
    let changes = conn.execute(
        "UPDATE cities SET reserved = ? WHERE id = ?",
        params![reserved as i64, id],
    )?;
    Ok(changes > 0)
}

/// Take ownership only if the city is still vacant at write time.
///
/// Returns false when someone else got there first.
pub(crate) fn set_owner_if_vacant(
    conn: &Connection,
    city_id: &str,
    agent_id: &str,
    at: &str,
) -> Result<bool, TerritoryError> {
    let changes = conn.execute(
        "UPDATE cities SET owner_id = ?, claimed_at = ? WHERE id = ? AND owner_id IS NULL",
        params![agent_id, at, city_id],
    )?;
    Ok(changes == 1)
}

/// Clear ownership if `agent_id` is the current owner.
pub(crate) fn clear_owner(conn: &Connection, city_id: &str, agent_id: &str) -> Result<bool, TerritoryError> {
    let changes = conn.execute(
        "UPDATE cities SET owner_id = NULL, claimed_at = NULL WHERE id = ? AND owner_id = ?",
        params![city_id, agent_id],
    )?;
    Ok(changes == 1)
}
