// Static topology loading and station building.
//
// Consumes the agency's GTFS stops.txt and transfers.txt and contracts
// the transfer graph into stations. The pass over transfer rows is
// deliberately order-dependent: the first row to claim a destination
// stop wins, and later rows naming the same destination are discarded.

use crate::sst_models::{
    Coordinates, Result, SSTError, Station, StationId, Stations, Stop, StopId,
};
use lazy_static::lazy_static;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;

lazy_static! {
    /// Historically duplicated platform codes that represent one
    /// physical station, remapped to the designated canonical ID.
    static ref CANONICAL_OVERRIDES: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("L03", "R20");
        m
    };

    /// Stops that are never merged into another station even though a
    /// transfer path exists (e.g. 42 St - Port Authority vs Times Sq).
    static ref SEPARATE_STATIONS: HashSet<&'static str> = ["A27", "132"].into_iter().collect();
}

// ============================================================================
// Input rows
// ============================================================================

#[derive(Debug, Deserialize)]
struct StopRow {
    #[serde(rename = "stop_id")]
    id: StopId,
    #[serde(rename = "stop_name")]
    name: String,
    #[serde(rename = "stop_lat")]
    lat: f64,
    #[serde(rename = "stop_lon")]
    lon: f64,
    #[serde(rename = "parent_station", default)]
    parent_station: Option<String>,
}

/// A walkable connection between two stops; consumed once during the
/// contraction pass and not retained.
#[derive(Debug, Clone, Deserialize)]
pub struct Transfer {
    #[serde(rename = "from_stop_id")]
    pub from_stop_id: StopId,
    #[serde(rename = "to_stop_id")]
    pub to_stop_id: StopId,
    #[serde(rename = "transfer_type", default)]
    pub transfer_type: i32,
    #[serde(rename = "min_transfer_time", default)]
    pub min_transfer_secs: Option<i32>,
}

/// Output of the one-shot topology load. `stop_to_station` is
/// read-only after startup; `stations` is handed to the poller behind
/// the shared lock.
pub struct Topology {
    pub stations: Stations,
    pub stop_to_station: HashMap<StopId, StationId>,
}

// ============================================================================
// Loading
// ============================================================================

pub fn load_topology(gtfs_dir: &Path) -> Result<Topology> {
    let stops = read_stops(&gtfs_dir.join("stops.txt"))?;
    let transfers = read_transfers(&gtfs_dir.join("transfers.txt"))?;
    Ok(build_stations(&stops, &transfers))
}

fn read_stops(path: &Path) -> Result<HashMap<StopId, Stop>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| SSTError::FileError(format!("Failed to open {}: {}", path.display(), e)))?;

    let mut stops = HashMap::new();
    for row in reader.deserialize() {
        let row: StopRow = match row {
            Ok(row) => row,
            Err(e) => {
                log::warn!("skipping invalid stop row: {}", e);
                continue;
            }
        };
        // Only parentless stops anchor stations; platform entries point
        // at them via parent_station.
        if row.parent_station.is_none() {
            stops.insert(
                row.id.clone(),
                Stop {
                    id: row.id,
                    name: row.name,
                    coordinates: Coordinates {
                        lat: row.lat,
                        lon: row.lon,
                    },
                },
            );
        }
    }
    Ok(stops)
}

fn read_transfers(path: &Path) -> Result<Vec<Transfer>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| SSTError::FileError(format!("Failed to open {}: {}", path.display(), e)))?;

    let mut transfers = Vec::new();
    for row in reader.deserialize() {
        match row {
            Ok(row) => transfers.push(row),
            Err(e) => log::warn!("skipping invalid transfer row: {}", e),
        }
    }
    Ok(transfers)
}

// ============================================================================
// Station building
// ============================================================================

/// Resolves a stop ID through the override table.
pub fn canonical_id(id: &str) -> &str {
    CANONICAL_OVERRIDES.get(id).copied().unwrap_or(id)
}

fn is_separate(transfer: &Transfer) -> bool {
    SEPARATE_STATIONS.contains(transfer.from_stop_id.as_str())
        || SEPARATE_STATIONS.contains(transfer.to_stop_id.as_str())
}

/// Contracts the transfer graph into stations. Single left-to-right
/// pass; transfers whose destination has already been claimed are
/// skipped, as are transfers whose origin is unknown (stale rows in
/// the static data).
pub fn build_stations(stops: &HashMap<StopId, Stop>, transfers: &[Transfer]) -> Topology {
    let mut seen: HashSet<StopId> = HashSet::new();
    let mut stations: Stations = HashMap::new();
    let mut stop_to_station: HashMap<StopId, StationId> = HashMap::new();

    for transfer in transfers {
        if seen.contains(&transfer.to_stop_id) {
            continue;
        }

        let canonical = canonical_id(&transfer.from_stop_id).to_string();
        let Some(anchor) = stops.get(&canonical) else {
            continue;
        };

        let station = stations
            .entry(canonical.clone())
            .or_insert_with(|| Station::new(canonical.clone(), anchor.coordinates));
        push_member(&mut station.stop_ids, &canonical);
        push_member(&mut station.stop_ids, &transfer.from_stop_id);
        stop_to_station.insert(canonical.clone(), canonical.clone());
        stop_to_station.insert(transfer.from_stop_id.clone(), canonical.clone());
        seen.insert(canonical.clone());
        seen.insert(transfer.from_stop_id.clone());

        if is_separate(transfer) {
            // The destination stays a station of its own.
            let dest = canonical_id(&transfer.to_stop_id).to_string();
            if let Some(stop) = stops.get(&dest) {
                let station = stations
                    .entry(dest.clone())
                    .or_insert_with(|| Station::new(dest.clone(), stop.coordinates));
                push_member(&mut station.stop_ids, &dest);
                stop_to_station.insert(dest.clone(), dest.clone());
                stop_to_station.insert(transfer.to_stop_id.clone(), dest.clone());
                seen.insert(transfer.to_stop_id.clone());
            }
        } else if let Some(station) = stations.get_mut(&canonical) {
            push_member(&mut station.stop_ids, &transfer.to_stop_id);
            stop_to_station.insert(transfer.to_stop_id.clone(), canonical.clone());
            seen.insert(transfer.to_stop_id.clone());
        }
    }

    for station in stations.values_mut() {
        station.name = display_name(&station.stop_ids, stops);
    }

    Topology {
        stations,
        stop_to_station,
    }
}

fn push_member(members: &mut Vec<StopId>, id: &str) {
    if !members.iter().any(|m| m == id) {
        members.push(id.to_string());
    }
}

/// Order-preserving deduplicated join of the member stop names,
/// remapping each member through the override table first.
fn display_name(members: &[StopId], stops: &HashMap<StopId, Stop>) -> String {
    let mut names: Vec<&str> = Vec::with_capacity(members.len());
    for id in members {
        if let Some(stop) = stops.get(canonical_id(id)) {
            if !names.contains(&stop.name.as_str()) {
                names.push(&stop.name);
            }
        }
    }
    names.join(" / ")
}

// ============================================================================
// Tests
// ============================================================================
