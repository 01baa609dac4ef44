//! # Geoloc Metrics - Observability
//!
//! Prometheus metrics for the geolocation pipeline:
//! - Frame throughput and processing latency
//! - Detections per color class
//! - Georeference rejections per reason
//! - Zone count and sightings
//! - Telemetry freshness

use geoloc_core::PoseKind;
use prometheus::{
    Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use tracing::{info, warn};

/// Metrics collector for the geolocation pipeline
pub struct MetricsCollector {
    registry: Registry,

    // Frame metrics
    frames_processed: IntCounter,
    frame_processing_time: Histogram,

    // Detection metrics
    observations_total: IntCounterVec,
    georef_rejections: IntCounterVec,

    // Zone metrics
    zones_total: IntGauge,
    zone_sightings: IntCounter,

    // Telemetry metrics
    pose_samples: IntCounterVec,
    pose_samples_dropped: IntCounter,
    pose_age: Gauge,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let frames_processed = IntCounter::new(
            "geoloc_frames_processed_total",
            "Frames run through detection",
        )?;
        registry.register(Box::new(frames_processed.clone()))?;

        let frame_processing_time = Histogram::with_opts(
            HistogramOpts::new(
                "geoloc_frame_processing_seconds",
                "Detection, georeferencing and zone update time per frame",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        )?;
        registry.register(Box::new(frame_processing_time.clone()))?;

        let observations_total = IntCounterVec::new(
            Opts::new("geoloc_observations_total", "Marker observations by color class"),
            &["color_class"],
        )?;
        registry.register(Box::new(observations_total.clone()))?;

        let georef_rejections = IntCounterVec::new(
            Opts::new(
                "geoloc_georef_rejections_total",
                "Observations that could not be georeferenced",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(georef_rejections.clone()))?;

        let zones_total = IntGauge::new("geoloc_zones", "Distinct zones tracked")?;
        registry.register(Box::new(zones_total.clone()))?;

        let zone_sightings = IntCounter::new(
            "geoloc_zone_sightings_total",
            "Geo points ingested into the zone tracker",
        )?;
        registry.register(Box::new(zone_sightings.clone()))?;

        let pose_samples = IntCounterVec::new(
            Opts::new("geoloc_pose_samples_total", "Telemetry samples accepted by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(pose_samples.clone()))?;

        let pose_samples_dropped = IntCounter::new(
            "geoloc_pose_samples_dropped_total",
            "Malformed or invalid telemetry samples dropped",
        )?;
        registry.register(Box::new(pose_samples_dropped.clone()))?;

        let pose_age = Gauge::new(
            "geoloc_pose_age_seconds",
            "Age of the pose used for the last processed frame",
        )?;
        registry.register(Box::new(pose_age.clone()))?;

        info!("📊 Metrics collector initialized");

        Ok(Self {
            registry,
            frames_processed,
            frame_processing_time,
            observations_total,
            georef_rejections,
            zones_total,
            zone_sightings,
            pose_samples,
            pose_samples_dropped,
            pose_age,
        })
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    // ========================================================================
    // FRAME METRICS
    // ========================================================================

    /// Record one processed frame
    pub fn record_frame(&self, processing_time_secs: f64) {
        self.frames_processed.inc();
        self.frame_processing_time.observe(processing_time_secs);
    }

    // ========================================================================
    // DETECTION METRICS
    // ========================================================================

    pub fn record_observation(&self, color_class: &str) {
        self.observations_total.with_label_values(&[color_class]).inc();
    }

    pub fn record_rejection(&self, reason: &str) {
        self.georef_rejections.with_label_values(&[reason]).inc();
    }

    // ========================================================================
    // ZONE METRICS
    // ========================================================================

    pub fn record_sighting(&self, zone_count: usize) {
        self.zone_sightings.inc();
        self.zones_total.set(zone_count as i64);
    }

    // ========================================================================
    // TELEMETRY METRICS
    // ========================================================================

    pub fn record_pose_sample(&self, kind: PoseKind) {
        self.pose_samples.with_label_values(&[&kind.to_string()]).inc();
    }

    pub fn record_pose_dropped(&self) {
        self.pose_samples_dropped.inc();
    }

    pub fn set_pose_age(&self, age_secs: f64) {
        self.pose_age.set(age_secs);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = MetricsCollector::new();
        assert!(metrics.is_ok());
    }

    #[test]
    fn test_metrics_export() {
        let metrics = MetricsCollector::new().unwrap();

        metrics.record_frame(0.012);
        metrics.record_sighting(3);
        metrics.set_pose_age(0.25);

        let export = metrics.export();
        assert!(export.contains("geoloc_frames_processed_total 1"));
        assert!(export.contains("geoloc_zones 3"));
        assert!(export.contains("geoloc_pose_age_seconds 0.25"));
    }

    #[test]
    fn test_labelled_metrics() {
        let metrics = MetricsCollector::new().unwrap();

        metrics.record_observation("red");
        metrics.record_rejection("degenerate_geometry");
        metrics.record_pose_sample(PoseKind::Attitude);

        let export = metrics.export();
        assert!(export.contains("color_class=\"red\""));
        assert!(export.contains("reason=\"degenerate_geometry\""));
        assert!(export.contains("kind=\"attitude\""));
    }
}
