//! Fusion loop
//!
//! Pairs the freshest frame with the freshest pose, runs detection and
//! georeferencing, and folds the results into the zone tracker. Frames that
//! arrive faster than they can be processed are skipped, never queued.

use geoloc_core::{Event, EventType, GeoPoint, Latest, Observation, PoseSample, Zone};
use geoloc_cv::{CvEngine, Frame, FrameAnalysis, FrameSource, Rejection};
use geoloc_metrics::MetricsCollector;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::EventBus;
use crate::pose::PoseSource;
use crate::state::ZoneSnapshot;
use crate::zones::ZoneTracker;
use crate::{FusionConfig, TrackerError, TrackerResult};

/// Fusion statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct EngineStats {
    pub frames_processed: u64,
    pub frames_without_pose: u64,
    pub observations: u64,
    pub located: u64,
    pub rejected: u64,
    pub events_emitted: u64,
    pub zones: usize,
}

/// A zone touched by one sighting
#[derive(Debug, Clone, Serialize)]
pub struct ZoneUpdate {
    pub zone: Zone,
    pub is_new: bool,
}

/// Outcome of one fused frame
#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    pub sequence: u64,
    pub observations: Vec<Observation>,
    pub located: Vec<GeoPoint>,
    pub rejections: Vec<Rejection>,
    pub updates: Vec<ZoneUpdate>,
}

impl FrameReport {
    pub fn new_zones(&self) -> impl Iterator<Item = &Zone> {
        self.updates.iter().filter(|u| u.is_new).map(|u| &u.zone)
    }
}

/// Drives detection, georeferencing and zone tracking
pub struct FusionLoop {
    config: FusionConfig,
    engine: Arc<CvEngine>,
    zones: ZoneTracker,
    events: EventBus,
    metrics: Option<Arc<MetricsCollector>>,
    snapshots: Arc<Latest<ZoneSnapshot>>,
    stats: Arc<RwLock<EngineStats>>,
    last_sequence: Option<u64>,
}

impl FusionLoop {
    pub fn new(
        config: FusionConfig,
        engine: Arc<CvEngine>,
        zones: ZoneTracker,
        events: EventBus,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let snapshots = Arc::new(Latest::new());
        snapshots.publish(zones.snapshot(0));

        Self {
            config,
            engine,
            zones,
            events,
            metrics,
            snapshots,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            last_sequence: None,
        }
    }

    /// Register holding the latest zone snapshot, for readers outside the loop
    pub fn snapshots(&self) -> Arc<Latest<ZoneSnapshot>> {
        Arc::clone(&self.snapshots)
    }

    /// Shared statistics handle
    pub fn stats_handle(&self) -> Arc<RwLock<EngineStats>> {
        Arc::clone(&self.stats)
    }

    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }

    pub fn zones(&self) -> &ZoneTracker {
        &self.zones
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Process one frame with the given pose on the calling thread
    pub fn process(&mut self, frame: &Frame, pose: Option<&PoseSample>) -> FrameReport {
        let started = Instant::now();
        let analysis = self.engine.process_frame(frame, pose);
        self.apply(analysis, started)
    }

    fn apply(&mut self, analysis: FrameAnalysis, started: Instant) -> FrameReport {
        let sequence = analysis.sequence;
        self.last_sequence = Some(sequence);

        let mut updates = Vec::with_capacity(analysis.located.len());
        let mut located = Vec::with_capacity(analysis.located.len());
        let mut invalid = 0u64;

        for point in analysis.located {
            match self.zones.ingest(&point) {
                Ok((zone, is_new)) => {
                    if let Some(m) = &self.metrics {
                        m.record_sighting(self.zones.len());
                    }
                    if is_new {
                        self.emit(Event::zone_created(zone.clone(), sequence));
                    } else if self.config.emit_updates {
                        self.emit(Event::zone_updated(zone.clone(), sequence));
                    }
                    updates.push(ZoneUpdate { zone, is_new });
                    located.push(point);
                }
                Err(e) => {
                    warn!("Discarding geo point from frame {}: {}", sequence, e);
                    invalid += 1;
                }
            }
        }

        if let Some(m) = &self.metrics {
            for observation in &analysis.observations {
                m.record_observation(&observation.color_class);
            }
            for rejection in &analysis.rejections {
                m.record_rejection(rejection.reason);
            }
            m.record_frame(started.elapsed().as_secs_f64());
        }

        {
            let mut stats = self.stats.write();
            stats.frames_processed += 1;
            if !analysis.pose_available {
                stats.frames_without_pose += 1;
            }
            stats.observations += analysis.observations.len() as u64;
            stats.located += located.len() as u64;
            stats.rejected += analysis.rejections.len() as u64 + invalid;
            stats.zones = self.zones.len();
        }

        if !updates.is_empty() {
            self.snapshots.publish(self.zones.snapshot(sequence));
        }

        debug!(
            "Frame {}: {} observations, {} located, {} rejected",
            sequence,
            analysis.observations.len(),
            located.len(),
            analysis.rejections.len()
        );

        FrameReport {
            sequence,
            observations: analysis.observations,
            located,
            rejections: analysis.rejections,
            updates,
        }
    }

    fn emit(&self, event: Event) {
        self.events.publish(event);
        self.stats.write().events_emitted += 1;
    }

    /// Poll `frames` and `poses` until the video stream ends or `cancel` fires.
    ///
    /// Each new frame is processed at most once, paired with whatever pose is
    /// current at that moment. Detection runs on the blocking pool so the
    /// runtime stays responsive.
    pub async fn run(
        &mut self,
        frames: &FrameSource,
        poses: &PoseSource,
        cancel: &CancellationToken,
    ) -> TrackerResult<EngineStats> {
        info!("🚀 Fusion loop started ({} ms poll)", self.config.poll_interval_ms);

        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Fusion loop cancelled");
                    break;
                }
                _ = ticker.tick() => {}
            }

            if frames.is_ended() {
                info!("📹 Video stream ended: {}", frames.description());
                self.emit(Event::system(
                    EventType::StreamEnded,
                    "frame_source",
                    "ended",
                    Some(frames.description().to_string()),
                ));
                break;
            }

            let Some(frame) = frames.latest_frame() else {
                continue;
            };
            if self.last_sequence.is_some_and(|last| frame.sequence() <= last) {
                continue;
            }

            let pose = poses.pose();
            if let (Some(m), Some(p)) = (&self.metrics, &pose) {
                m.set_pose_age(p.age_ms(Utc::now()) as f64 / 1000.0);
            }

            let started = Instant::now();
            let engine = Arc::clone(&self.engine);
            let analysis = tokio::task::spawn_blocking(move || engine.process_frame(&frame, pose.as_ref()))
                .await
                .map_err(|e| TrackerError::Task(e.to_string()))?;

            let report = self.apply(analysis, started);
            for zone in report.new_zones() {
                info!("🎯 Frame {} found {}", report.sequence, zone);
            }
        }

        self.emit(Event::system(EventType::PipelineStopped, "fusion_loop", "stopped", None));

        let stats = self.stats();
        info!(
            "Fusion loop stopped: {} frames, {} located, {} zones",
            stats.frames_processed, stats.located, stats.zones
        );
        Ok(stats)
    }
}

// ============================================================================
// TESTS
// ============================================================================
