// R-tree over station coordinates for nearest-station queries.
//
// Distances are plain Euclidean over (lat, lon) treated as a flat
// plane; at city scale the error against geodesic distance is noise.

use crate::sst_models::{Coordinates, StationId};
use rstar::{AABB, PointDistance, RTree, RTreeObject};

/// Upper bound on results per nearest-station query.
pub const MAX_RESULTS: usize = 5;

#[derive(Debug, Clone)]
pub struct StationNode {
    pub station_id: StationId,
    point: [f64; 2],
}

impl StationNode {
    pub fn new(coordinates: Coordinates, station_id: StationId) -> Self {
        StationNode {
            station_id,
            point: [coordinates.lat, coordinates.lon],
        }
    }
}

impl RTreeObject for StationNode {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.point)
    }
}

impl PointDistance for StationNode {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.point[0] - point[0];
        let dy = self.point[1] - point[1];
        dx * dx + dy * dy
    }
}

/// Immutable spatial index, built once after the station set is
/// finalized.
pub struct StationIndex {
    tree: RTree<StationNode>,
}

impl StationIndex {
    pub fn build(nodes: Vec<StationNode>) -> Self {
        StationIndex {
            tree: RTree::bulk_load(nodes),
        }
    }

    /// Returns up to `count` station IDs ordered by distance from the
    /// query point. `count` is clamped to 1..=MAX_RESULTS. Tie order
    /// between equidistant stations is whatever the tree yields.
    pub fn nearest(&self, coordinates: Coordinates, count: usize) -> Vec<StationId> {
        let count = count.clamp(1, MAX_RESULTS);
        self.tree
            .nearest_neighbor_iter(&[coordinates.lat, coordinates.lon])
            .take(count)
            .map(|node| node.station_id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> StationIndex {
        let nodes = vec![
            StationNode::new(Coordinates { lat: 40.0, lon: -74.0 }, "A".to_string()),
            StationNode::new(Coordinates { lat: 41.0, lon: -74.0 }, "B".to_string()),
            StationNode::new(Coordinates { lat: 42.0, lon: -74.0 }, "C".to_string()),
            StationNode::new(Coordinates { lat: 43.0, lon: -74.0 }, "D".to_string()),
            StationNode::new(Coordinates { lat: 44.0, lon: -74.0 }, "E".to_string()),
            StationNode::new(Coordinates { lat: 45.0, lon: -74.0 }, "F".to_string()),
        ];
        StationIndex::build(nodes)
    }

    #[test]
    fn nearest_orders_by_distance() {
        let results = index().nearest(Coordinates { lat: 40.1, lon: -74.0 }, 3);
        assert_eq!(results, vec!["A", "B", "C"]);
    }

    #[test]
    fn count_is_clamped_low() {
        let results = index().nearest(Coordinates { lat: 40.0, lon: -74.0 }, 0);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0], "A");
    }

    #[test]
    fn count_is_clamped_high() {
        let results = index().nearest(Coordinates { lat: 40.0, lon: -74.0 }, 50);
        assert_eq!(results.len(), MAX_RESULTS);
    }

    #[test]
    fn distances_are_non_decreasing() {
        let query = [40.6, -74.2];
        let results = index().nearest(Coordinates { lat: query[0], lon: query[1] }, 5);

        let tree_index = index();
        let distances: Vec<f64> = results
            .iter()
            .map(|id| {
                tree_index
                    .tree
                    .iter()
                    .find(|n| &n.station_id == id)
                    .map(|n| n.distance_2(&query))
                    .unwrap()
            })
            .collect();
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));
    }
}
