//! Snapshots handed to readers outside the fusion loop

use chrono::{DateTime, Utc};
use geoloc_core::Zone;
use serde::{Deserialize, Serialize};

/// Value copy of the zone list at one point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneSnapshot {
    pub zones: Vec<Zone>,
    pub zone_count: usize,
    pub total_sightings: u64,
    /// Sequence of the last frame folded into this snapshot
    pub frame_sequence: u64,
    pub timestamp: DateTime<Utc>,
}

impl ZoneSnapshot {
    pub fn new(zones: Vec<Zone>, frame_sequence: u64) -> Self {
        Self {
            zone_count: zones.len(),
            total_sightings: zones.iter().map(|z| z.sighting_count).sum(),
            zones,
            frame_sequence,
            timestamp: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), 0)
    }

    /// Zones ordered by sighting count, most-seen first
    pub fn ranked(&self) -> Vec<Zone> {
        let mut zones = self.zones.clone();
        zones.sort_by(|a, b| b.sighting_count.cmp(&a.sighting_count).then(a.id.cmp(&b.id)));
        zones
    }
}

impl Default for ZoneSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoloc_core::GeoPoint;

    #[test]
    fn test_snapshot_totals() {
        let mut busy = Zone::new(1, &GeoPoint::new(1.0, 1.0));
        busy.sighting_count = 4;
        let quiet = Zone::new(2, &GeoPoint::new(2.0, 2.0));

        let snapshot = ZoneSnapshot::new(vec![quiet, busy], 17);
        assert_eq!(snapshot.zone_count, 2);
        assert_eq!(snapshot.total_sightings, 5);
        assert_eq!(snapshot.ranked()[0].id, 1);
    }

    #[test]
    fn test_empty_snapshot_serializes() {
        let json = serde_json::to_string(&ZoneSnapshot::empty()).unwrap();
        assert!(json.contains("\"zone_count\":0"));
    }
}
