// Live feed poller for the MTA realtime API.
//
// Feed endpoint: http://datamine.mta.info/mta_esi.php?key=<key>&feed_id=<id>
// Feed list:     http://datamine.mta.info/list-of-feeds
//
// Every refresh cycle fans out one task per feed ID, decodes the
// GTFS-realtime payload, and merges the trip updates into the shared
// station table. A failing or slow feed delays the cycle's join but
// never touches its siblings, and a feed that fails outright leaves
// the previous state intact until the next cycle.

use crate::sst_client::Client;
use crate::sst_models::{
    Arrival, Direction, Result, SSTError, StationId, Stations, StopId,
};
use chrono::{DateTime, TimeZone, Utc};
use futures::future::join_all;
use gtfs_rt::FeedMessage;
use lazy_static::lazy_static;
use prost::Message;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;

const FEED_BASE_URL: &str = "http://datamine.mta.info/mta_esi.php";
const FEED_IDS: [u32; 6] = [1, 2, 16, 21, 26, 31];

pub const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

lazy_static! {
    /// Realtime stop IDs carry a trailing direction letter ("127N").
    static ref STOP_SUFFIX: Regex = Regex::new(r"^(?P<id>.*)(?P<dir>[NS])$").unwrap();
}

// ============================================================================
// Poller
// ============================================================================

pub struct Poller {
    inner: Arc<PollerInner>,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

struct PollerInner {
    api_key: String,
    http: reqwest::Client,
    stations: Arc<RwLock<Stations>>,
    stop_to_station: Arc<HashMap<StopId, StationId>>,
}

impl Poller {
    pub fn new(client: &Client, api_key: String) -> Result<Self> {
        // A hung feed must not starve the cycle, so cap each request at
        // the refresh interval.
        let http = reqwest::Client::builder()
            .timeout(REFRESH_INTERVAL)
            .build()
            .map_err(|e| SSTError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        let (shutdown, _) = watch::channel(false);
        Ok(Poller {
            inner: Arc::new(PollerInner {
                api_key,
                http,
                stations: client.stations_handle(),
                stop_to_station: client.stop_index_handle(),
            }),
            shutdown,
            handle: None,
        })
    }

    /// Starts the background refresh loop. The first cycle runs
    /// immediately; subsequent cycles run every REFRESH_INTERVAL.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let inner = self.inner.clone();
        let mut shutdown = self.shutdown.subscribe();
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => refresh_feeds(&inner).await,
                    _ = shutdown.changed() => break,
                }
            }
            log::info!("feed poller stopped");
        }));
    }

    /// Signals the loop to stop and waits for it. An in-flight cycle
    /// finishes; no new cycle is scheduled. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                log::error!("poller task failed: {}", e);
            }
        }
    }
}

// ============================================================================
// Refresh cycle
// ============================================================================

async fn refresh_feeds(inner: &Arc<PollerInner>) {
    let mut tasks = Vec::with_capacity(FEED_IDS.len());
    for feed_id in FEED_IDS {
        let inner = inner.clone();
        // One task per feed so a panic in one cannot take down the
        // rest of the cycle.
        tasks.push(tokio::spawn(async move {
            refresh_feed(&inner, feed_id).await;
        }));
    }
    for (feed_id, outcome) in FEED_IDS.iter().zip(join_all(tasks).await) {
        if let Err(e) = outcome {
            log::error!("feed {}: refresh task panicked: {}", feed_id, e);
        }
    }
}

async fn refresh_feed(inner: &PollerInner, feed_id: u32) {
    let url = format!(
        "{}?key={}&feed_id={}",
        FEED_BASE_URL, inner.api_key, feed_id
    );

    let response = match inner.http.get(&url).send().await {
        Ok(response) => response,
        Err(e) => {
            log::warn!("feed {}: request failed: {}", feed_id, e);
            return;
        }
    };
    if !response.status().is_success() {
        log::warn!("feed {}: API returned {}", feed_id, response.status());
        return;
    }
    let body = match response.bytes().await {
        Ok(body) => body,
        Err(e) => {
            log::warn!("feed {}: failed to read response: {}", feed_id, e);
            return;
        }
    };

    let feed = match FeedMessage::decode(&*body) {
        Ok(feed) => feed,
        Err(e) => {
            // Nothing is merged from an undecodable payload; the
            // previous state stands until the next cycle.
            log::warn!("feed {}: failed to decode payload: {}", feed_id, e);
            return;
        }
    };

    let now = Utc::now();
    let mut stations = inner.stations.write().await;
    apply_trip_updates(&mut stations, &inner.stop_to_station, &feed, now);
}

/// Merges every per-stop arrival prediction in the feed into the
/// station table. Caller holds the write lock.
pub fn apply_trip_updates(
    stations: &mut Stations,
    stop_to_station: &HashMap<StopId, StationId>,
    feed: &FeedMessage,
    now: DateTime<Utc>,
) {
    for entity in &feed.entity {
        let Some(trip_update) = &entity.trip_update else {
            continue;
        };
        let Some(trip_id) = trip_update.trip.trip_id.clone() else {
            continue;
        };
        let route_id = trip_update.trip.route_id.clone().unwrap_or_default();

        for update in &trip_update.stop_time_update {
            let Some(raw_stop_id) = update.stop_id.as_deref() else {
                continue;
            };
            let Some((base, direction)) = split_stop_id(raw_stop_id) else {
                continue;
            };
            let Some(station_id) = stop_to_station.get(base) else {
                continue;
            };
            let Some(station) = stations.get_mut(station_id) else {
                continue;
            };
            let Some(seconds) = update.arrival.as_ref().and_then(|a| a.time) else {
                continue;
            };
            let Some(time) = Utc.timestamp_opt(seconds, 0).single() else {
                continue;
            };

            station.record_arrival(
                direction,
                Arrival {
                    trip_id: trip_id.clone(),
                    route_id: route_id.clone(),
                    time,
                },
            );
            station.prune_and_sort(now);
            station.updated = Some(now);
        }
    }
}

/// Splits a realtime stop ID into its base stop ID and direction.
/// Returns None for IDs with an empty base or no recognized suffix.
fn split_stop_id(raw: &str) -> Option<(&str, Direction)> {
    let caps = STOP_SUFFIX.captures(raw)?;
    let base = caps.name("id")?.as_str();
    if base.is_empty() {
        return None;
    }
    let direction = Direction::from_suffix(caps.name("dir")?.as_str())?;
    Some((base, direction))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sst_models::{Coordinates, Station};
    use chrono::Duration;
    use gtfs_rt::{
        trip_update::{StopTimeEvent, StopTimeUpdate},
        FeedEntity, FeedHeader, TripDescriptor, TripUpdate,
    };

    fn fixture() -> (Stations, HashMap<StopId, StationId>) {
        let mut stations = HashMap::new();
        stations.insert(
            "127".to_string(),
            Station::new(
                "127".to_string(),
                Coordinates {
                    lat: 40.75529,
                    lon: -73.987495,
                },
            ),
        );
        let mut stop_to_station = HashMap::new();
        stop_to_station.insert("127".to_string(), "127".to_string());
        stop_to_station.insert("725".to_string(), "127".to_string());
        (stations, stop_to_station)
    }

    fn feed(updates: Vec<(&str, &str, i64)>) -> FeedMessage {
        let entity = updates
            .into_iter()
            .map(|(trip_id, stop_id, time)| FeedEntity {
                id: trip_id.to_string(),
                trip_update: Some(TripUpdate {
                    trip: TripDescriptor {
                        trip_id: Some(trip_id.to_string()),
                        route_id: Some("1".to_string()),
                        ..Default::default()
                    },
                    stop_time_update: vec![StopTimeUpdate {
                        stop_id: Some(stop_id.to_string()),
                        arrival: Some(StopTimeEvent {
                            time: Some(time),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect();

        FeedMessage {
            header: FeedHeader {
                gtfs_realtime_version: "1.0".to_string(),
                ..Default::default()
            },
            entity,
        }
    }

    #[test]
    fn duplicate_trip_update_yields_single_arrival() {
        let (mut stations, index) = fixture();
        let now = Utc::now();
        let time = (now + Duration::minutes(5)).timestamp();

        apply_trip_updates(&mut stations, &index, &feed(vec![("t1", "127N", time)]), now);
        apply_trip_updates(&mut stations, &index, &feed(vec![("t1", "127N", time)]), now);

        let bucket = &stations["127"].arrivals[&Direction::North];
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket[0].trip_id, "t1");
        assert_eq!(stations["127"].updated, Some(now));
    }

    #[test]
    fn merge_keeps_buckets_sorted_and_unique() {
        let (mut stations, index) = fixture();
        let now = Utc::now();
        let near = (now + Duration::minutes(2)).timestamp();
        let far = (now + Duration::minutes(8)).timestamp();
        let past = (now - Duration::minutes(1)).timestamp();

        apply_trip_updates(
            &mut stations,
            &index,
            &feed(vec![
                ("t2", "127S", far),
                ("t1", "127S", near),
                ("t3", "127S", past),
            ]),
            now,
        );

        let bucket = &stations["127"].arrivals[&Direction::South];
        let trip_ids: Vec<&str> = bucket.iter().map(|a| a.trip_id.as_str()).collect();
        assert_eq!(trip_ids, vec!["t1", "t2"]);
        assert!(bucket.windows(2).all(|w| w[0].time <= w[1].time));
    }

    #[test]
    fn update_for_same_trip_replaces_earlier_prediction() {
        let (mut stations, index) = fixture();
        let now = Utc::now();
        let first = (now + Duration::minutes(5)).timestamp();
        let revised = (now + Duration::minutes(7)).timestamp();

        apply_trip_updates(&mut stations, &index, &feed(vec![("t1", "127N", first)]), now);
        apply_trip_updates(
            &mut stations,
            &index,
            &feed(vec![("t1", "127N", revised)]),
            now,
        );

        let bucket = &stations["127"].arrivals[&Direction::North];
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket[0].time.timestamp(), revised);
    }

    #[test]
    fn sibling_platform_resolves_to_same_station() {
        let (mut stations, index) = fixture();
        let now = Utc::now();
        let time = (now + Duration::minutes(3)).timestamp();

        apply_trip_updates(&mut stations, &index, &feed(vec![("t7", "725S", time)]), now);

        assert_eq!(stations["127"].arrivals[&Direction::South].len(), 1);
    }

    #[test]
    fn unresolvable_predictions_are_dropped_silently() {
        let (mut stations, index) = fixture();
        let now = Utc::now();
        let time = (now + Duration::minutes(3)).timestamp();

        apply_trip_updates(
            &mut stations,
            &index,
            &feed(vec![
                ("t1", "N", time),    // empty base ID
                ("t2", "127", time),  // no direction suffix
                ("t3", "999N", time), // unknown stop
            ]),
            now,
        );

        assert!(stations["127"].arrivals.is_empty());
        assert_eq!(stations["127"].updated, None);
    }

    #[test]
    fn malformed_payload_fails_decode() {
        // Field 1, length-delimited, declared longer than the buffer.
        let truncated: &[u8] = &[0x0a, 0xff];
        assert!(FeedMessage::decode(truncated).is_err());
    }

    #[test]
    fn split_stop_id_cases() {
        assert_eq!(split_stop_id("127N"), Some(("127", Direction::North)));
        assert_eq!(split_stop_id("R20S"), Some(("R20", Direction::South)));
        assert_eq!(split_stop_id("127"), None);
        assert_eq!(split_stop_id("N"), None);
        assert_eq!(split_stop_id(""), None);
    }
}
