//! API request handlers

use crate::error::ApiError;
use crate::state::AppState;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
};
use chrono::Utc;
use geoloc_core::{Event, PoseSample, Zone};
use geoloc_tracker::{EngineStats, ZoneSnapshot};
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_EVENT_LIMIT: usize = 100;
const MAX_EVENT_LIMIT: usize = 1000;

// ============================================================================
// RESPONSE TYPES
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
    pub uptime_seconds: i64,
    pub telemetry_link_open: bool,
    pub frames_processed: u64,
    pub zones: usize,
}

#[derive(Serialize)]
pub struct PoseResponse {
    pub pose: PoseSample,
    pub age_ms: i64,
    pub source: String,
}

#[derive(Serialize)]
pub struct EventListResponse {
    pub events: Vec<Event>,
    pub total_published: u64,
}

#[derive(Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

// ============================================================================
// HEALTH & STATUS HANDLERS
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.engine_stats();

    Json(HealthResponse {
        status: "healthy".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        timestamp: Utc::now().to_rfc3339(),
        uptime_seconds: state.uptime_seconds(),
        telemetry_link_open: state.poses.link_open(),
        frames_processed: stats.frames_processed,
        zones: stats.zones,
    })
}

/// Fusion loop counters
pub async fn get_stats(State(state): State<AppState>) -> Json<EngineStats> {
    Json(state.engine_stats())
}

/// Prometheus metrics endpoint
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.export(),
    )
}

// ============================================================================
// PIPELINE OUTPUT HANDLERS
// ============================================================================

/// Latest zone snapshot
pub async fn list_zones(State(state): State<AppState>) -> Json<ZoneSnapshot> {
    Json(state.zone_snapshot())
}

pub async fn get_zone(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Zone>, ApiError> {
    state
        .zone_snapshot()
        .zones
        .into_iter()
        .find(|z| z.id == id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("zone {} not found", id)))
}

/// Latest fused pose
pub async fn get_pose(State(state): State<AppState>) -> Result<Json<PoseResponse>, ApiError> {
    let pose = state
        .poses
        .pose()
        .ok_or_else(|| ApiError::unavailable("no usable pose"))?;

    Ok(Json(PoseResponse {
        age_ms: pose.age_ms(Utc::now()),
        pose,
        source: state.poses.description().to_string(),
    }))
}

/// Recent events, oldest first
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventListResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    if limit == 0 || limit > MAX_EVENT_LIMIT {
        return Err(ApiError::bad_request(format!(
            "limit must be between 1 and {}",
            MAX_EVENT_LIMIT
        )));
    }
    debug!("Listing up to {} events", limit);

    Ok(Json(EventListResponse {
        events: state.events.get_recent(limit),
        total_published: state.events.get_event_count(),
    }))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use geoloc_core::{GeoPoint, Latest, PositionSample, TelemetrySample};
    use geoloc_metrics::MetricsCollector;
    use geoloc_tracker::{EventBus, PoseSource, PoseSourceConfig, ReplayLink};
    use parking_lot::RwLock;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    async fn test_state(cancel: &CancellationToken) -> AppState {
        let link = ReplayLink::from_samples(vec![(
            0.0,
            TelemetrySample::Position(PositionSample::new(45.0, 7.0, 90.0, 180.0)),
        )]);
        let poses = PoseSource::connect(Box::new(link), PoseSourceConfig::default(), cancel, None)
            .await
            .unwrap();

        let snapshots = Arc::new(Latest::new());
        let zone = Zone::new(1, &GeoPoint::new(45.0001, 7.0002).with_color("red"));
        snapshots.publish(ZoneSnapshot::new(vec![zone], 12));

        let events = EventBus::default();
        for i in 0..5 {
            events.publish(Event::zone_created(Zone::new(i + 1, &GeoPoint::new(45.0, 7.0)), i));
        }

        AppState {
            config: AppConfig::default(),
            metrics: Arc::new(MetricsCollector::new().unwrap()),
            events,
            snapshots,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            poses: Arc::new(poses),
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_zones_served_from_snapshot() {
        let cancel = CancellationToken::new();
        let state = test_state(&cancel).await;

        let Json(snapshot) = list_zones(State(state.clone())).await;
        assert_eq!(snapshot.zone_count, 1);
        assert_eq!(snapshot.frame_sequence, 12);

        let Json(zone) = get_zone(State(state.clone()), Path(1)).await.unwrap();
        assert_eq!(zone.color_class.as_deref(), Some("red"));

        assert!(matches!(
            get_zone(State(state), Path(9)).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_pose_endpoint_reports_fused_pose() {
        let cancel = CancellationToken::new();
        let state = test_state(&cancel).await;

        let Json(response) = get_pose(State(state)).await.unwrap();
        assert_eq!(response.pose.altitude, 90.0);
        assert_eq!(response.pose.yaw, 180.0);
        assert!(response.source.starts_with("replay"));
    }

    #[tokio::test]
    async fn test_event_limit_validated() {
        let cancel = CancellationToken::new();
        let state = test_state(&cancel).await;

        let Json(recent) = list_events(State(state.clone()), Query(EventsQuery { limit: Some(2) }))
            .await
            .unwrap();
        assert_eq!(recent.events.len(), 2);
        assert_eq!(recent.total_published, 5);
        assert_eq!(recent.events[1].zone().map(|z| z.id), Some(5));

        assert!(matches!(
            list_events(State(state), Query(EventsQuery { limit: Some(0) })).await,
            Err(ApiError::BadRequest(_))
        ));
    }
}
