// Domain model for the MTA subway station tracker.
//
// A Station is an aggregation of GTFS stops that belong to the same
// real-world complex; the live feeds address individual platform-level
// stops, so everything here is keyed back to stations through the
// stop->station index built at load time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

// ============================================================================
// Identifiers
// ============================================================================

/// Platform-level GTFS stop identifier, e.g. "127".
pub type StopId = String;

/// Station identifier. Always the stop ID of the station's canonical
/// anchor stop.
pub type StationId = String;

/// The process-wide station table.
pub type Stations = HashMap<StationId, Station>;

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// Coarse travel direction, decoded from the trailing character of a
/// realtime stop ID ("127N" / "127S").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    North,
    South,
}

impl Direction {
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "N" => Some(Direction::North),
            "S" => Some(Direction::South),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Stop {
    pub id: StopId,
    pub name: String,
    pub coordinates: Coordinates,
}

/// A live predicted arrival for one trip at one station/direction.
#[derive(Debug, Clone, Serialize)]
pub struct Arrival {
    pub trip_id: String,
    pub route_id: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Station {
    pub id: StationId,
    pub name: String,
    pub coordinates: Coordinates,
    /// Member stop IDs, in the order the transfer rows merged them in.
    pub stop_ids: Vec<StopId>,
    pub arrivals: HashMap<Direction, Vec<Arrival>>,
    pub updated: Option<DateTime<Utc>>,
}

impl Station {
    pub fn new(id: StationId, coordinates: Coordinates) -> Self {
        Station {
            id,
            name: String::new(),
            coordinates,
            stop_ids: Vec::new(),
            arrivals: HashMap::new(),
            updated: None,
        }
    }

    /// Inserts an arrival into the direction bucket, replacing any
    /// existing entry for the same trip ID in place.
    pub fn record_arrival(&mut self, direction: Direction, arrival: Arrival) {
        let bucket = self.arrivals.entry(direction).or_default();
        match bucket.iter_mut().find(|a| a.trip_id == arrival.trip_id) {
            Some(existing) => *existing = arrival,
            None => bucket.push(arrival),
        }
    }

    /// Drops arrivals that are not strictly in the future, collapses to
    /// one entry per trip ID, and re-sorts every bucket ascending by
    /// arrival time.
    pub fn prune_and_sort(&mut self, now: DateTime<Utc>) {
        for bucket in self.arrivals.values_mut() {
            let mut trip_ids: HashSet<String> = HashSet::with_capacity(bucket.len());
            bucket.retain(|a| a.time > now && trip_ids.insert(a.trip_id.clone()));
            bucket.sort_by_key(|a| a.time);
        }
    }
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum SSTError {
    NetworkError(String),
    ParseError(String),
    FileError(String),
    StationNotFound,
}

impl std::fmt::Display for SSTError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SSTError::NetworkError(e) => write!(f, "Network error: {}", e),
            SSTError::ParseError(e) => write!(f, "Parse error: {}", e),
            SSTError::FileError(e) => write!(f, "File error: {}", e),
            SSTError::StationNotFound => write!(f, "Station not found"),
        }
    }
}

impl std::error::Error for SSTError {}

pub type Result<T> = std::result::Result<T, SSTError>;

// ============================================================================
// Tests
// ============================================================================
