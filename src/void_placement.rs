//! Deterministic placement for voided agents
//!
//! A voided agent is parked somewhere that is not a city: one of a small
//! set of named ocean zones, at a bounded offset from the zone centre.
//! The placement is a pure function of the agent id (SHA-256 of the id
//! picks the zone and the offset), so it can be recomputed anywhere and
//! always agrees. Placements carry no allocation semantics and may
//! coincide between agents.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A named zone that voided agents are spread across.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoidZone {
    pub name: &'static str,
    pub center_latitude: f64,
    pub center_longitude: f64,
    /// Maximum absolute offset applied to the centre, in degrees.
    pub latitude_spread: f64,
    pub longitude_spread: f64,
}

pub const VOID_ZONES: [VoidZone; 5] = [
    VoidZone {
        name: "Pacific Ocean",
        center_latitude: 0.0,
        center_longitude: -150.0,
        latitude_spread: 20.0,
        longitude_spread: 20.0,
    },
    VoidZone {
        name: "Atlantic Ocean",
        center_latitude: 5.0,
        center_longitude: -30.0,
        latitude_spread: 20.0,
        longitude_spread: 10.0,
    },
    VoidZone {
        name: "Indian Ocean",
        center_latitude: -20.0,
        center_longitude: 80.0,
        latitude_spread: 15.0,
        longitude_spread: 15.0,
    },
    VoidZone {
        name: "Southern Ocean",
        center_latitude: -62.0,
        center_longitude: 0.0,
        latitude_spread: 4.0,
        longitude_spread: 60.0,
    },
    VoidZone {
        name: "Arctic Ocean",
        center_latitude: 82.0,
        center_longitude: 0.0,
        latitude_spread: 4.0,
        longitude_spread: 60.0,
    },
];

/// Where a voided agent ends up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoidPlacement {
    pub zone: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Compute the void placement for an agent.
pub fn void_placement(agent_id: &str) -> VoidPlacement {
    let digest = Sha256::digest(agent_id.as_bytes());

    let mut zone_bytes = [0u8; 8];
    zone_bytes.copy_from_slice(&digest[0..8]);
    let zone_index = (u64::from_be_bytes(zone_bytes) % VOID_ZONES.len() as u64) as usize;
    let zone = &VOID_ZONES[zone_index];

    let lat_offset = unit_offset(&digest[8..12]) * zone.latitude_spread;
    let lng_offset = unit_offset(&digest[12..16]) * zone.longitude_spread;

    VoidPlacement {
        zone: zone.name.to_string(),
        latitude: round6(zone.center_latitude + lat_offset),
        longitude: round6(zone.center_longitude + lng_offset),
    }
}

/// Map four hash bytes onto [-1.0, 1.0].
fn unit_offset(bytes: &[u8]) -> f64 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    let value = u32::from_be_bytes(buf) as f64 / u32::MAX as f64;
    value * 2.0 - 1.0
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}
