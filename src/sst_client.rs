// Query facade over the station model.
//
// The station table is shared with the feed poller behind one
// process-wide lock; the stop->station index and the spatial index are
// immutable after startup and read without locking.

use crate::sst_models::{
    Coordinates, Result, SSTError, Station, StationId, Stations, StopId,
};
use crate::sst_spatial::{StationIndex, StationNode};
use crate::sst_static::{Topology, load_topology};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct Client {
    stations: Arc<RwLock<Stations>>,
    stop_to_station: Arc<HashMap<StopId, StationId>>,
    spatial: StationIndex,
}

impl Client {
    /// Builds the station model from a GTFS directory containing
    /// stops.txt and transfers.txt. Load failures are fatal.
    pub fn load(gtfs_dir: &Path) -> Result<Self> {
        Ok(Self::new(load_topology(gtfs_dir)?))
    }

    pub fn new(topology: Topology) -> Self {
        let nodes = topology
            .stations
            .values()
            .map(|s| StationNode::new(s.coordinates, s.id.clone()))
            .collect();
        Client {
            stations: Arc::new(RwLock::new(topology.stations)),
            stop_to_station: Arc::new(topology.stop_to_station),
            spatial: StationIndex::build(nodes),
        }
    }

    pub(crate) fn stations_handle(&self) -> Arc<RwLock<Stations>> {
        self.stations.clone()
    }

    pub(crate) fn stop_index_handle(&self) -> Arc<HashMap<StopId, StationId>> {
        self.stop_to_station.clone()
    }

    /// Returns a snapshot of every station. The snapshot is consistent
    /// per station but not across the whole set relative to concurrent
    /// merges.
    pub async fn stations(&self) -> Vec<Station> {
        self.stations.read().await.values().cloned().collect()
    }

    pub async fn station(&self, id: &str) -> Result<Station> {
        self.stations
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(SSTError::StationNotFound)
    }

    /// Resolves a platform-level stop ID to its station.
    pub async fn station_by_stop_id(&self, stop_id: &str) -> Result<Station> {
        let station_id = self
            .stop_to_station
            .get(stop_id)
            .ok_or(SSTError::StationNotFound)?;
        self.station(station_id).await
    }

    /// Returns up to `count` stations ordered by distance from the
    /// coordinates. An index hit missing from the station table is
    /// skipped rather than failing the query.
    pub async fn closest_stations(&self, coordinates: Coordinates, count: usize) -> Vec<Station> {
        let stations = self.stations.read().await;
        self.spatial
            .nearest(coordinates, count)
            .iter()
            .filter_map(|id| stations.get(id).cloned())
            .collect()
    }
}
