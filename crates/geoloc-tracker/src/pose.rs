//! Latest-pose intake
//!
//! A background task drains a [`TelemetryLink`] and keeps only the newest
//! position and the newest attitude sample. Readers never wait on the link.

use chrono::{DateTime, Utc};
use geoloc_core::{AttitudeSample, Latest, PoseKind, PoseSample, PositionSample, TelemetrySample};
use geoloc_metrics::MetricsCollector;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::link::{LinkError, TelemetryLink};
use crate::{PoseSourceConfig, TrackerError, TrackerResult};

const IO_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Default)]
struct PoseSlots {
    position: Latest<PositionSample>,
    attitude: Latest<AttitudeSample>,
    accepted: AtomicU64,
    dropped: AtomicU64,
    link_open: AtomicBool,
}

impl PoseSlots {
    /// Validate and store one sample. Invalid samples are dropped.
    fn accept(&self, sample: TelemetrySample, metrics: Option<&MetricsCollector>) -> bool {
        if let Err(e) = sample.validate() {
            debug!("Dropping {} sample: {}", sample.kind(), e);
            self.record_drop(metrics);
            return false;
        }

        let kind = sample.kind();
        match sample {
            TelemetrySample::Position(p) => self.position.publish(p),
            TelemetrySample::Attitude(a) => self.attitude.publish(a),
        }
        self.accepted.fetch_add(1, Ordering::Relaxed);
        if let Some(m) = metrics {
            m.record_pose_sample(kind);
        }
        true
    }

    fn record_drop(&self, metrics: Option<&MetricsCollector>) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        if let Some(m) = metrics {
            m.record_pose_dropped();
        }
    }
}

/// Continuously updated vehicle pose
pub struct PoseSource {
    config: PoseSourceConfig,
    description: String,
    slots: Arc<PoseSlots>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PoseSource {
    /// Wait for the first valid sample, then keep receiving in the background.
    ///
    /// Fails with [`TrackerError::Connectivity`] when the link stays silent
    /// for the configured startup timeout, closes before delivering, or
    /// `parent` is cancelled while waiting.
    pub async fn connect(
        link: Box<dyn TelemetryLink>,
        config: PoseSourceConfig,
        parent: &CancellationToken,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> TrackerResult<Self> {
        let mut link = link;
        let description = link.describe();
        let slots = Arc::new(PoseSlots::default());
        let timeout = config.startup_timeout();

        info!("📡 Waiting for telemetry from {}", description);

        let startup = tokio::time::timeout(timeout, async {
            loop {
                match link.recv().await {
                    Ok(Some(sample)) => {
                        if slots.accept(sample, metrics.as_deref()) {
                            return Ok(());
                        }
                    }
                    Ok(None) => continue,
                    Err(LinkError::Malformed(msg)) => {
                        debug!("Malformed telemetry during startup: {}", msg);
                        slots.record_drop(metrics.as_deref());
                    }
                    Err(LinkError::Closed) => {
                        return Err(TrackerError::connectivity(format!(
                            "{} closed before delivering a valid sample",
                            description
                        )));
                    }
                    Err(LinkError::Io(e)) => {
                        warn!("Telemetry read error during startup: {}", e);
                        tokio::time::sleep(IO_RETRY_DELAY).await;
                    }
                }
            }
        });

        let first = tokio::select! {
            biased;
            _ = parent.cancelled() => {
                return Err(TrackerError::connectivity(format!(
                    "cancelled while waiting for telemetry from {}",
                    description
                )));
            }
            first = startup => first,
        };

        match first {
            Ok(result) => result?,
            Err(_) => {
                return Err(TrackerError::connectivity(format!(
                    "no valid telemetry from {} within {} ms",
                    description, config.startup_timeout_ms
                )));
            }
        }

        info!("✅ Telemetry connected: {}", description);
        slots.link_open.store(true, Ordering::Release);

        let cancel = parent.child_token();
        let task = tokio::spawn(receive_loop(link, slots.clone(), cancel.clone(), metrics));

        Ok(Self {
            config,
            description,
            slots,
            cancel,
            task: Some(task),
        })
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Latest stored sample of the given kind
    pub fn latest(&self, kind: PoseKind) -> Option<TelemetrySample> {
        match kind {
            PoseKind::Position => self
                .latest_position()
                .map(|p| TelemetrySample::Position((*p).clone())),
            PoseKind::Attitude => self
                .latest_attitude()
                .map(|a| TelemetrySample::Attitude((*a).clone())),
        }
    }

    pub fn latest_position(&self) -> Option<Arc<PositionSample>> {
        self.slots.position.get()
    }

    pub fn latest_attitude(&self) -> Option<Arc<AttitudeSample>> {
        self.slots.attitude.get()
    }

    /// Fused pose for georeferencing, if one is usable right now
    pub fn pose(&self) -> Option<PoseSample> {
        self.pose_at(Utc::now())
    }

    /// Fused pose as of `now`.
    ///
    /// Needs a position. Attitude comes from the latest attitude sample or,
    /// when there is none and the fallback is enabled, from the heading.
    /// With a staleness limit configured, a pose whose older input exceeds
    /// it is not returned.
    pub fn pose_at(&self, now: DateTime<Utc>) -> Option<PoseSample> {
        let position = self.latest_position()?;
        let attitude = self.latest_attitude();

        if attitude.is_none() && !self.config.attitude_fallback {
            return None;
        }

        let pose = PoseSample::fuse(&position, attitude.as_deref());
        if let Some(limit) = self.config.max_staleness_ms {
            if pose.age_ms(now) > limit as i64 {
                return None;
            }
        }
        Some(pose)
    }

    pub fn samples_accepted(&self) -> u64 {
        self.slots.accepted.load(Ordering::Relaxed)
    }

    pub fn samples_dropped(&self) -> u64 {
        self.slots.dropped.load(Ordering::Relaxed)
    }

    /// False once the link has closed or the source was shut down
    pub fn link_open(&self) -> bool {
        self.slots.link_open.load(Ordering::Acquire)
    }

    /// Stop receiving and wait for the background task
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Telemetry task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for PoseSource {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn receive_loop(
    mut link: Box<dyn TelemetryLink>,
    slots: Arc<PoseSlots>,
    cancel: CancellationToken,
    metrics: Option<Arc<MetricsCollector>>,
) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = link.recv() => received,
        };

        match received {
            Ok(Some(sample)) => {
                slots.accept(sample, metrics.as_deref());
            }
            Ok(None) => {}
            Err(LinkError::Malformed(msg)) => {
                debug!("Dropping malformed telemetry: {}", msg);
                slots.record_drop(metrics.as_deref());
            }
            Err(LinkError::Closed) => {
                info!("Telemetry link closed");
                break;
            }
            Err(LinkError::Io(e)) => {
                warn!("Telemetry read error: {}", e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(IO_RETRY_DELAY) => {}
                }
            }
        }
    }

    slots.link_open.store(false, Ordering::Release);
    debug!("Telemetry receive loop stopped");
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Link that plays back a fixed script, then idles or closes
    struct ScriptedLink {
        script: VecDeque<Result<Option<TelemetrySample>, LinkError>>,
        close_when_done: bool,
    }

    impl ScriptedLink {
        fn new(
            script: Vec<Result<Option<TelemetrySample>, LinkError>>,
            close_when_done: bool,
        ) -> Box<Self> {
            Box::new(Self {
                script: script.into(),
                close_when_done,
            })
        }
    }

    #[async_trait]
    impl TelemetryLink for ScriptedLink {
        fn describe(&self) -> String {
            "scripted".to_string()
        }

        async fn recv(&mut self) -> Result<Option<TelemetrySample>, LinkError> {
            match self.script.pop_front() {
                Some(next) => next,
                None if self.close_when_done => Err(LinkError::Closed),
                None => {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(None)
                }
            }
        }
    }

    fn position(lat: f64, heading: f64) -> TelemetrySample {
        TelemetrySample::Position(PositionSample::new(lat, 7.0, 80.0, heading))
    }

    fn attitude(yaw: f64) -> TelemetrySample {
        TelemetrySample::Attitude(AttitudeSample::new(1.0, -2.0, yaw))
    }

    fn config() -> PoseSourceConfig {
        PoseSourceConfig {
            startup_timeout_ms: 200,
            ..Default::default()
        }
    }

    async fn wait_for(pred: impl Fn() -> bool) {
        for _ in 0..200 {
            if pred() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_connect_times_out_without_samples() {
        let cancel = CancellationToken::new();
        let link = ScriptedLink::new(vec![], false);

        let result = PoseSource::connect(link, config(), &cancel, None).await;
        assert!(matches!(result, Err(TrackerError::Connectivity(_))));
    }

    #[tokio::test]
    async fn test_connect_returns_promptly_on_cancellation() {
        let slow_startup = PoseSourceConfig {
            startup_timeout_ms: 60_000,
            ..Default::default()
        };

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            PoseSource::connect(ScriptedLink::new(vec![], false), slow_startup.clone(), &cancel, None),
        )
        .await
        .expect("connect ignored a cancelled token");
        assert!(matches!(result, Err(TrackerError::Connectivity(_))));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            PoseSource::connect(ScriptedLink::new(vec![], false), slow_startup, &cancel, None),
        )
        .await
        .expect("connect kept waiting after shutdown");
        assert!(matches!(result, Err(TrackerError::Connectivity(_))));
    }

    #[tokio::test]
    async fn test_connect_fails_when_link_closes_early() {
        let cancel = CancellationToken::new();
        let link = ScriptedLink::new(vec![Err(LinkError::Malformed("junk".into()))], true);

        let result = PoseSource::connect(link, config(), &cancel, None).await;
        assert!(matches!(result, Err(TrackerError::Connectivity(_))));
    }

    #[tokio::test]
    async fn test_latest_sample_wins() {
        let cancel = CancellationToken::new();
        let link = ScriptedLink::new(
            vec![Ok(Some(position(45.0, 0.0))), Ok(Some(position(45.5, 0.0))), Ok(Some(attitude(30.0)))],
            false,
        );

        let source = PoseSource::connect(link, config(), &cancel, None).await.unwrap();
        wait_for(|| source.samples_accepted() == 3).await;

        assert_eq!(source.latest_position().unwrap().lat, 45.5);
        let pose = source.pose().unwrap();
        assert_eq!(pose.latitude, 45.5);
        assert_eq!(pose.yaw, 30.0);
        assert_eq!(pose.roll, 1.0);
        assert_eq!(source.latest(PoseKind::Attitude).unwrap().kind(), PoseKind::Attitude);
    }

    #[tokio::test]
    async fn test_invalid_and_malformed_samples_dropped() {
        let cancel = CancellationToken::new();
        let link = ScriptedLink::new(
            vec![
                Ok(Some(position(45.0, 10.0))),
                Err(LinkError::Malformed("truncated".into())),
                Ok(Some(position(f64::NAN, 0.0))),
                Ok(Some(position(200.0, 0.0))),
            ],
            true,
        );

        let source = PoseSource::connect(link, config(), &cancel, None).await.unwrap();
        wait_for(|| !source.link_open()).await;

        assert_eq!(source.samples_accepted(), 1);
        assert_eq!(source.samples_dropped(), 3);
        assert_eq!(source.latest_position().unwrap().lat, 45.0);
    }

    #[tokio::test]
    async fn test_heading_fallback_and_its_absence() {
        let cancel = CancellationToken::new();
        let with_fallback = PoseSource::connect(
            ScriptedLink::new(vec![Ok(Some(position(45.0, 135.0)))], false),
            config(),
            &cancel,
            None,
        )
        .await
        .unwrap();
        let pose = with_fallback.pose().unwrap();
        assert_eq!(pose.yaw, 135.0);
        assert_eq!(pose.pitch, 0.0);

        let without = PoseSource::connect(
            ScriptedLink::new(vec![Ok(Some(position(45.0, 135.0)))], false),
            PoseSourceConfig {
                attitude_fallback: false,
                ..config()
            },
            &cancel,
            None,
        )
        .await
        .unwrap();
        assert!(without.pose().is_none());
    }

    #[tokio::test]
    async fn test_stale_pose_withheld() {
        let cancel = CancellationToken::new();
        let source = PoseSource::connect(
            ScriptedLink::new(vec![Ok(Some(position(45.0, 0.0)))], false),
            PoseSourceConfig {
                max_staleness_ms: Some(500),
                ..config()
            },
            &cancel,
            None,
        )
        .await
        .unwrap();

        let now = Utc::now();
        assert!(source.pose_at(now).is_some());
        assert!(source.pose_at(now + chrono::Duration::seconds(2)).is_none());
    }

    #[tokio::test]
    async fn test_shutdown_stops_receiving() {
        let cancel = CancellationToken::new();
        let mut source = PoseSource::connect(
            ScriptedLink::new(vec![Ok(Some(position(45.0, 0.0)))], false),
            config(),
            &cancel,
            None,
        )
        .await
        .unwrap();

        assert!(source.link_open());
        source.shutdown().await;
        assert!(!source.link_open());
        // Last sample stays readable
        assert!(source.pose().is_some());
    }
}
