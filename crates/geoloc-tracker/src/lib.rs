//! # Geoloc Tracker - Pipeline Orchestration
//!
//! Ties the video and telemetry producers to detection, georeferencing and
//! zone de-duplication.
//!
//! ## Components
//! - [`PoseSource`]: latest position/attitude from a [`TelemetryLink`]
//! - [`ZoneTracker`]: merges repeated sightings of the same ground target
//! - [`FusionLoop`]: polls the latest frame and pose, drives the pipeline and
//!   publishes zone events on the [`EventBus`]

pub mod engine;
pub mod error;
pub mod events;
pub mod link;
pub mod pose;
pub mod state;
pub mod zones;

pub use engine::{EngineStats, FrameReport, FusionLoop, ZoneUpdate};
pub use error::{TrackerError, TrackerResult};
pub use events::EventBus;
pub use link::{LinkError, ReplayLink, TelemetryLink, UdpJsonLink};
pub use pose::PoseSource;
pub use state::ZoneSnapshot;
pub use zones::ZoneTracker;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tracking system configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub zones: ZoneConfig,
    pub pose: PoseSourceConfig,
    pub fusion: FusionConfig,
}

/// How a new geo point is compared against existing zones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Latitude and longitude each within the angular span of the merge distance
    #[default]
    PerAxis,
    /// Great-circle distance within the merge distance
    Geodesic,
}

/// Where a zone sits once it has several sightings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionPolicy {
    /// Fixed at the first sighting
    #[default]
    FirstSighting,
    /// Running mean of all merged sightings
    Centroid,
}

/// Zone de-duplication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneConfig {
    /// Ground distance under which two sightings are the same target
    pub merge_distance_m: f64,
    pub match_policy: MatchPolicy,
    pub position_policy: PositionPolicy,
    /// Only merge sightings of the same color class
    pub match_color: bool,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            merge_distance_m: 5.0,
            match_policy: MatchPolicy::PerAxis,
            position_policy: PositionPolicy::FirstSighting,
            match_color: false,
        }
    }
}

/// Telemetry intake settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseSourceConfig {
    /// How long to wait for the first valid sample
    pub startup_timeout_ms: u64,
    /// Poses older than this are not used; unset accepts any age
    pub max_staleness_ms: Option<u64>,
    /// Without attitude, use heading as yaw and assume level flight
    pub attitude_fallback: bool,
}

impl Default for PoseSourceConfig {
    fn default() -> Self {
        Self {
            startup_timeout_ms: 5_000,
            max_staleness_ms: None,
            attitude_fallback: true,
        }
    }
}

impl PoseSourceConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

/// Fusion loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Polling period for new frames
    pub poll_interval_ms: u64,
    /// Emit an event for every merged sighting, not only new zones
    pub emit_updates: bool,
    /// Broadcast channel capacity
    pub event_capacity: usize,
    /// Events kept for late readers
    pub event_history: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 20,
            emit_updates: true,
            event_capacity: 1024,
            event_history: 1000,
        }
    }
}

impl FusionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
