//! Zone de-duplication
//!
//! Every georeferenced sighting either merges into the first existing zone it
//! matches or starts a new one. Zones live for the whole session. The scan is
//! linear; the expected zone count is small.

use chrono::Utc;
use geoloc_core::{GeoPoint, GeoPosition, Zone, normalize_longitude};
use tracing::{debug, info};

use crate::state::ZoneSnapshot;
use crate::{MatchPolicy, PositionPolicy, TrackerError, TrackerResult, ZoneConfig};

/// Authoritative list of distinct ground targets
#[derive(Debug)]
pub struct ZoneTracker {
    config: ZoneConfig,
    zones: Vec<Zone>,
}

impl ZoneTracker {
    pub fn new(config: ZoneConfig) -> TrackerResult<Self> {
        if !(config.merge_distance_m.is_finite() && config.merge_distance_m > 0.0) {
            return Err(TrackerError::invalid_config(
                "merge_distance_m must be a positive number",
            ));
        }
        Ok(Self {
            config,
            zones: Vec::new(),
        })
    }

    pub fn config(&self) -> &ZoneConfig {
        &self.config
    }

    /// Merge or insert a sighting. Returns the resulting zone and whether it
    /// was newly created.
    pub fn ingest(&mut self, point: &GeoPoint) -> TrackerResult<(Zone, bool)> {
        if !point.is_valid() {
            return Err(TrackerError::InvalidGeoPoint {
                lat: point.latitude,
                lng: point.longitude,
            });
        }

        let (lat_threshold, lng_threshold) =
            point.position().angular_offsets(self.config.merge_distance_m);

        let config = &self.config;
        let matched = self.zones.iter_mut().find(|zone| {
            if config.match_color && zone.color_class != point.color_class {
                return false;
            }
            match config.match_policy {
                MatchPolicy::PerAxis => {
                    (zone.latitude - point.latitude).abs() < lat_threshold
                        && normalize_longitude(zone.longitude - point.longitude).abs()
                            < lng_threshold
                }
                MatchPolicy::Geodesic => {
                    zone.position().distance_to(&point.position()) < config.merge_distance_m
                }
            }
        });

        if let Some(zone) = matched {
            zone.sighting_count += 1;
            zone.last_seen = Utc::now();
            if config.position_policy == PositionPolicy::Centroid {
                move_toward(zone, point);
            }
            debug!("Sighting merged into {}", zone);
            return Ok((zone.clone(), false));
        }

        let zone = Zone::new(self.zones.len() as u64 + 1, point);
        info!("🎯 New zone: {}", zone);
        self.zones.push(zone.clone());
        Ok((zone, true))
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn total_sightings(&self) -> u64 {
        self.zones.iter().map(|z| z.sighting_count).sum()
    }

    /// Value copy for readers outside the fusion loop
    pub fn snapshot(&self, frame_sequence: u64) -> ZoneSnapshot {
        ZoneSnapshot::new(self.zones.clone(), frame_sequence)
    }
}

/// Fold one more sighting into the zone's running mean. Expects the count
/// to already include the new sighting.
fn move_toward(zone: &mut Zone, point: &GeoPoint) {
    let current = zone.position();
    let target = GeoPosition::from_degrees(
        point.latitude,
        current.longitude + normalize_longitude(point.longitude - current.longitude),
    );
    let mean = current.interpolate(&target, 1.0 / zone.sighting_count as f64);

    zone.latitude = mean.latitude;
    zone.longitude = normalize_longitude(mean.longitude);
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tracker() -> ZoneTracker {
        ZoneTracker::new(ZoneConfig::default()).unwrap()
    }

    /// Point `meters` east of (45, 7)
    fn east_of_origin(meters: f64) -> GeoPoint {
        let p = GeoPosition::from_degrees(45.0, 7.0).destination(meters, 90.0);
        GeoPoint::new(p.latitude, p.longitude)
    }

    #[test]
    fn test_first_sighting_creates_zone() {
        let mut zones = tracker();
        let (zone, is_new) = zones.ingest(&GeoPoint::new(45.0, 7.0)).unwrap();

        assert!(is_new);
        assert_eq!(zone.id, 1);
        assert_eq!(zone.sighting_count, 1);
        assert_eq!(zones.len(), 1);
    }

    #[test]
    fn test_close_sightings_merge() {
        let mut zones = tracker();
        let (_, first) = zones.ingest(&east_of_origin(0.0)).unwrap();
        let (zone, second) = zones.ingest(&east_of_origin(2.0)).unwrap();

        assert_eq!((first, second), (true, false));
        assert_eq!(zone.sighting_count, 2);
        assert_eq!(zones.len(), 1);
        // First-sighting policy keeps the original coordinate
        assert_eq!(zone.longitude, 7.0);
    }

    #[test]
    fn test_distant_sightings_split() {
        let mut zones = tracker();
        zones.ingest(&east_of_origin(0.0)).unwrap();
        let (zone, is_new) = zones.ingest(&east_of_origin(50.0)).unwrap();

        assert!(is_new);
        assert_eq!(zone.id, 2);
        assert_eq!(zones.len(), 2);
        assert_eq!(zones.total_sightings(), 2);
    }

    #[test]
    fn test_first_match_wins() {
        let mut zones = ZoneTracker::new(ZoneConfig {
            merge_distance_m: 6.0,
            ..Default::default()
        })
        .unwrap();
        zones.ingest(&east_of_origin(0.0)).unwrap();
        zones.ingest(&east_of_origin(10.0)).unwrap();

        // 5 m east is within range of both zones
        let (zone, is_new) = zones.ingest(&east_of_origin(5.0)).unwrap();
        assert!(!is_new);
        assert_eq!(zone.id, 1);
        assert_eq!(zones.zones()[1].sighting_count, 1);
    }

    #[test]
    fn test_per_axis_accepts_diagonal_that_geodesic_rejects() {
        // 4.5 m north and 4.5 m east: ~6.4 m away but inside both axis spans
        let origin = GeoPosition::from_degrees(45.0, 7.0);
        let diagonal = origin.destination(4.5, 0.0).destination(4.5, 90.0);
        let point = GeoPoint::new(diagonal.latitude, diagonal.longitude);

        let mut per_axis = tracker();
        per_axis.ingest(&GeoPoint::new(45.0, 7.0)).unwrap();
        assert!(!per_axis.ingest(&point).unwrap().1);

        let mut geodesic = ZoneTracker::new(ZoneConfig {
            match_policy: MatchPolicy::Geodesic,
            ..Default::default()
        })
        .unwrap();
        geodesic.ingest(&GeoPoint::new(45.0, 7.0)).unwrap();
        assert!(geodesic.ingest(&point).unwrap().1);
    }

    #[test]
    fn test_centroid_policy_averages() {
        let mut zones = ZoneTracker::new(ZoneConfig {
            position_policy: PositionPolicy::Centroid,
            ..Default::default()
        })
        .unwrap();
        let a = east_of_origin(0.0);
        let b = east_of_origin(2.0);
        zones.ingest(&a).unwrap();
        let (zone, _) = zones.ingest(&b).unwrap();

        assert_relative_eq!(zone.longitude, (a.longitude + b.longitude) / 2.0, epsilon = 1e-12);
        assert_relative_eq!(zone.latitude, 45.0, epsilon = 1e-9);
    }

    #[test]
    fn test_color_aware_matching() {
        let mut zones = ZoneTracker::new(ZoneConfig {
            match_color: true,
            ..Default::default()
        })
        .unwrap();
        zones.ingest(&GeoPoint::new(45.0, 7.0).with_color("red")).unwrap();
        let (_, is_new) = zones
            .ingest(&GeoPoint::new(45.0, 7.0).with_color("blue"))
            .unwrap();

        assert!(is_new);
        assert_eq!(zones.len(), 2);
    }

    #[test]
    fn test_invalid_point_rejected() {
        let mut zones = tracker();
        let result = zones.ingest(&GeoPoint::new(120.0, 7.0));

        assert!(matches!(result, Err(TrackerError::InvalidGeoPoint { .. })));
        assert!(zones.is_empty());
    }

    #[test]
    fn test_invalid_merge_distance_rejected() {
        let result = ZoneTracker::new(ZoneConfig {
            merge_distance_m: 0.0,
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_sighting_counts_never_decrease() {
        let mut zones = tracker();
        let mut last = 0;
        for _ in 0..10 {
            let (zone, _) = zones.ingest(&east_of_origin(1.0)).unwrap();
            assert!(zone.sighting_count > last);
            last = zone.sighting_count;
        }
        assert_eq!(last, 10);
    }
}
