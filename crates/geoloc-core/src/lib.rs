//! # Geoloc Core
//!
//! Core domain models shared by the airborne target-geolocation pipeline:
//! telemetry samples, fused poses, marker observations, geodetic points and
//! zones, plus the WGS-84 geodesy and latest-value register every stage uses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod error;
pub mod events;
pub mod geo;
pub mod latest;

pub use error::{CoreError, CoreResult};
pub use events::*;
pub use geo::*;
pub use latest::Latest;

// ============================================================================
// TELEMETRY SAMPLES
// ============================================================================

/// The two independently retained classes of telemetry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoseKind {
    Position,
    Attitude,
}

impl fmt::Display for PoseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoseKind::Position => write!(f, "position"),
            PoseKind::Attitude => write!(f, "attitude"),
        }
    }
}

/// Global position report from the flight controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    /// Time the sample was received or replayed
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Milliseconds since vehicle boot
    #[serde(default)]
    pub time_boot_ms: u64,
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lon: f64,
    /// Altitude above mean sea level in meters
    pub alt: f64,
    /// Altitude above home in meters
    pub relative_alt: f64,
    /// Ground velocity north in m/s
    #[serde(default)]
    pub vx: f64,
    /// Ground velocity east in m/s
    #[serde(default)]
    pub vy: f64,
    /// Ground velocity down in m/s
    #[serde(default)]
    pub vz: f64,
    /// Vehicle heading in degrees (0-360)
    #[serde(default)]
    pub heading: f64,
}

impl PositionSample {
    pub fn new(lat: f64, lon: f64, relative_alt: f64, heading: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            time_boot_ms: 0,
            lat,
            lon,
            alt: relative_alt,
            relative_alt,
            vx: 0.0,
            vy: 0.0,
            vz: 0.0,
            heading,
        }
    }

    pub fn position(&self) -> GeoPosition {
        GeoPosition::new(self.lat, self.lon, self.relative_alt)
    }

    /// Reject non-finite values and out-of-range coordinates
    pub fn validate(&self) -> CoreResult<()> {
        let fields = [
            self.lat,
            self.lon,
            self.alt,
            self.relative_alt,
            self.vx,
            self.vy,
            self.vz,
            self.heading,
        ];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(CoreError::invalid_telemetry(
                "position sample contains non-finite values",
            ));
        }
        if !self.position().is_valid() {
            return Err(CoreError::invalid_position(self.lat, self.lon));
        }
        Ok(())
    }
}

/// Attitude report from the flight controller. Angles in degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttitudeSample {
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub time_boot_ms: u64,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    #[serde(default)]
    pub rollspeed: f64,
    #[serde(default)]
    pub pitchspeed: f64,
    #[serde(default)]
    pub yawspeed: f64,
}

impl AttitudeSample {
    pub fn new(roll: f64, pitch: f64, yaw: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            time_boot_ms: 0,
            roll,
            pitch,
            yaw,
            rollspeed: 0.0,
            pitchspeed: 0.0,
            yawspeed: 0.0,
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        let fields = [
            self.roll,
            self.pitch,
            self.yaw,
            self.rollspeed,
            self.pitchspeed,
            self.yawspeed,
        ];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(CoreError::invalid_telemetry(
                "attitude sample contains non-finite values",
            ));
        }
        Ok(())
    }
}

/// A decoded telemetry message of either kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum TelemetrySample {
    Position(PositionSample),
    Attitude(AttitudeSample),
}

impl TelemetrySample {
    pub fn kind(&self) -> PoseKind {
        match self {
            TelemetrySample::Position(_) => PoseKind::Position,
            TelemetrySample::Attitude(_) => PoseKind::Attitude,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TelemetrySample::Position(p) => p.timestamp,
            TelemetrySample::Attitude(a) => a.timestamp,
        }
    }

    /// Overwrite the receive timestamp
    pub fn stamp(&mut self, at: DateTime<Utc>) {
        match self {
            TelemetrySample::Position(p) => p.timestamp = at,
            TelemetrySample::Attitude(a) => a.timestamp = at,
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        match self {
            TelemetrySample::Position(p) => p.validate(),
            TelemetrySample::Attitude(a) => a.validate(),
        }
    }

    pub fn as_position(&self) -> Option<&PositionSample> {
        match self {
            TelemetrySample::Position(p) => Some(p),
            TelemetrySample::Attitude(_) => None,
        }
    }

    pub fn as_attitude(&self) -> Option<&AttitudeSample> {
        match self {
            TelemetrySample::Attitude(a) => Some(a),
            TelemetrySample::Position(_) => None,
        }
    }
}

// ============================================================================
// FUSED POSE
// ============================================================================

/// Vehicle pose used for georeferencing. Angles in degrees, altitude in
/// meters above the ground reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseSample {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

impl PoseSample {
    pub fn new(latitude: f64, longitude: f64, altitude: f64, yaw: f64, pitch: f64, roll: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            latitude,
            longitude,
            altitude,
            yaw,
            pitch,
            roll,
        }
    }

    /// Combine the latest position and attitude reports.
    ///
    /// Altitude is taken relative to home. Without an attitude report the
    /// heading stands in for yaw and the vehicle is assumed level. The fused
    /// timestamp is that of the older input.
    pub fn fuse(position: &PositionSample, attitude: Option<&AttitudeSample>) -> Self {
        match attitude {
            Some(att) => Self {
                timestamp: position.timestamp.min(att.timestamp),
                latitude: position.lat,
                longitude: position.lon,
                altitude: position.relative_alt,
                yaw: att.yaw,
                pitch: att.pitch,
                roll: att.roll,
            },
            None => Self {
                timestamp: position.timestamp,
                latitude: position.lat,
                longitude: position.lon,
                altitude: position.relative_alt,
                yaw: position.heading,
                pitch: 0.0,
                roll: 0.0,
            },
        }
    }

    pub fn position(&self) -> GeoPosition {
        GeoPosition::new(self.latitude, self.longitude, self.altitude)
    }

    /// Age relative to `now`, clamped at zero
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_milliseconds().max(0)
    }
}

// ============================================================================
// DETECTION & GEOLOCATION RESULTS
// ============================================================================

/// A candidate marker found in one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Bounding box center, in pixels from the left edge
    pub pixel_x: f64,
    /// Bounding box center, in pixels from the top edge
    pub pixel_y: f64,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub color_class: String,
}

impl Observation {
    pub fn area(&self) -> u64 {
        self.pixel_width as u64 * self.pixel_height as u64
    }
}

/// Ground coordinate of one observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_class: Option<String>,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            color_class: None,
        }
    }

    pub fn with_color(mut self, color_class: impl Into<String>) -> Self {
        self.color_class = Some(color_class.into());
        self
    }

    pub fn position(&self) -> GeoPosition {
        GeoPosition::from_degrees(self.latitude, self.longitude)
    }

    pub fn is_valid(&self) -> bool {
        self.position().is_valid()
    }
}

/// A distinct physical target aggregated from one or more sightings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    /// 1-based creation order
    pub id: u64,
    pub latitude: f64,
    pub longitude: f64,
    pub sighting_count: u64,
    pub color_class: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Zone {
    pub fn new(id: u64, point: &GeoPoint) -> Self {
        let now = Utc::now();
        Self {
            id,
            latitude: point.latitude,
            longitude: point.longitude,
            sighting_count: 1,
            color_class: point.color_class.clone(),
            first_seen: now,
            last_seen: now,
        }
    }

    pub fn position(&self) -> GeoPosition {
        GeoPosition::from_degrees(self.latitude, self.longitude)
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "zone #{} ({:.7}, {:.7}) x{}",
            self.id, self.latitude, self.longitude, self.sighting_count
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_telemetry_sample_kind() {
        let pos = TelemetrySample::Position(PositionSample::new(10.0, 20.0, 50.0, 90.0));
        let att = TelemetrySample::Attitude(AttitudeSample::new(0.0, 0.0, 45.0));

        assert_eq!(pos.kind(), PoseKind::Position);
        assert_eq!(att.kind(), PoseKind::Attitude);
        assert!(pos.as_position().is_some());
        assert!(att.as_attitude().is_some());
    }

    #[test]
    fn test_telemetry_json_form() {
        let json = r#"{"kind":"attitude","data":{"roll":1.5,"pitch":-2.0,"yaw":180.0}}"#;
        let sample: TelemetrySample = serde_json::from_str(json).unwrap();

        let att = sample.as_attitude().unwrap();
        assert_eq!(att.yaw, 180.0);
        assert_eq!(att.rollspeed, 0.0);
    }

    #[test]
    fn test_position_validation() {
        assert!(PositionSample::new(45.0, 7.0, 30.0, 0.0).validate().is_ok());
        assert!(matches!(
            PositionSample::new(95.0, 7.0, 30.0, 0.0).validate(),
            Err(CoreError::InvalidPosition { .. })
        ));
        assert!(matches!(
            PositionSample::new(45.0, f64::NAN, 30.0, 0.0).validate(),
            Err(CoreError::InvalidTelemetry(_))
        ));
        assert!(AttitudeSample::new(0.0, f64::INFINITY, 0.0).validate().is_err());
    }

    #[test]
    fn test_pose_fusion_with_attitude() {
        let mut position = PositionSample::new(45.0, 7.0, 30.0, 90.0);
        let mut attitude = AttitudeSample::new(1.0, 2.0, 95.0);
        position.timestamp = Utc::now();
        attitude.timestamp = position.timestamp - Duration::milliseconds(200);

        let pose = PoseSample::fuse(&position, Some(&attitude));
        assert_eq!(pose.yaw, 95.0);
        assert_eq!(pose.pitch, 2.0);
        assert_eq!(pose.roll, 1.0);
        assert_eq!(pose.altitude, 30.0);
        assert_eq!(pose.timestamp, attitude.timestamp);
    }

    #[test]
    fn test_pose_fusion_heading_fallback() {
        let position = PositionSample::new(45.0, 7.0, 30.0, 270.0);
        let pose = PoseSample::fuse(&position, None);

        assert_eq!(pose.yaw, 270.0);
        assert_eq!(pose.pitch, 0.0);
        assert_eq!(pose.roll, 0.0);
    }

    #[test]
    fn test_zone_starts_with_single_sighting() {
        let point = GeoPoint::new(1.0, 2.0).with_color("red");
        let zone = Zone::new(1, &point);

        assert_eq!(zone.sighting_count, 1);
        assert_eq!(zone.color_class.as_deref(), Some("red"));
        assert_eq!(zone.first_seen, zone.last_seen);
    }

    #[test]
    fn test_geo_point_validity() {
        assert!(GeoPoint::new(0.0, 0.0).is_valid());
        assert!(!GeoPoint::new(-91.0, 0.0).is_valid());
    }
}
