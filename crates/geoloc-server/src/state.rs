//! Application state shared with the HTTP handlers

use crate::config::AppConfig;
use geoloc_core::Latest;
use geoloc_metrics::MetricsCollector;
use geoloc_tracker::{EngineStats, EventBus, PoseSource, ZoneSnapshot};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

/// Read-side handles into the running pipeline
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub metrics: Arc<MetricsCollector>,
    pub events: EventBus,
    pub snapshots: Arc<Latest<ZoneSnapshot>>,
    pub stats: Arc<RwLock<EngineStats>>,
    pub poses: Arc<PoseSource>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Latest zone snapshot, or an empty one before the first sighting
    pub fn zone_snapshot(&self) -> ZoneSnapshot {
        self.snapshots
            .get()
            .map(|s| (*s).clone())
            .unwrap_or_default()
    }

    pub fn engine_stats(&self) -> EngineStats {
        self.stats.read().clone()
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
