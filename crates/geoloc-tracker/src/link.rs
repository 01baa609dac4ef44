//! Telemetry links
//!
//! A link delivers decoded telemetry samples. Wire-level flight controller
//! protocols stay outside this crate; what arrives here is already typed.

use async_trait::async_trait;
use chrono::Utc;
use geoloc_core::{AttitudeSample, PoseKind, PositionSample, TelemetrySample};
use serde::Deserialize;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{TrackerError, TrackerResult};

#[derive(Error, Debug)]
pub enum LinkError {
    /// The message could not be decoded; the caller drops it
    #[error("Malformed telemetry: {0}")]
    Malformed(String),

    /// The link will never deliver again
    #[error("Telemetry link closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of decoded telemetry samples
#[async_trait]
pub trait TelemetryLink: Send + 'static {
    fn describe(&self) -> String;

    /// Next sample. `Ok(None)` means nothing arrived within the link's read
    /// timeout; the caller simply asks again.
    async fn recv(&mut self) -> Result<Option<TelemetrySample>, LinkError>;
}

// ============================================================================
// UDP JSON LINK
// ============================================================================

const MAX_DATAGRAM: usize = 64 * 1024;

/// Telemetry as JSON datagrams, one sample per datagram:
/// `{"kind":"position","data":{...}}` or `{"kind":"attitude","data":{...}}`
pub struct UdpJsonLink {
    socket: UdpSocket,
    buffer: Vec<u8>,
    read_timeout: Duration,
}

impl UdpJsonLink {
    pub async fn bind(addr: &str, read_timeout: Duration) -> TrackerResult<Self> {
        let socket = UdpSocket::bind(addr).await.map_err(|e| {
            TrackerError::connectivity(format!("cannot bind telemetry socket {}: {}", addr, e))
        })?;
        info!("📡 Listening for telemetry on {}", socket.local_addr()?);

        Ok(Self {
            socket,
            buffer: vec![0; MAX_DATAGRAM],
            read_timeout,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl TelemetryLink for UdpJsonLink {
    fn describe(&self) -> String {
        match self.socket.local_addr() {
            Ok(addr) => format!("udp json ({})", addr),
            Err(_) => "udp json".to_string(),
        }
    }

    async fn recv(&mut self) -> Result<Option<TelemetrySample>, LinkError> {
        let received = tokio::time::timeout(self.read_timeout, self.socket.recv_from(&mut self.buffer)).await;

        let (len, peer) = match received {
            Err(_) => return Ok(None),
            Ok(result) => result?,
        };

        let mut sample: TelemetrySample = serde_json::from_slice(&self.buffer[..len])
            .map_err(|e| LinkError::Malformed(format!("from {}: {}", peer, e)))?;
        sample.stamp(Utc::now());
        Ok(Some(sample))
    }
}

// ============================================================================
// REPLAY LINK
// ============================================================================

/// One entry of a recorded telemetry log
#[derive(Debug, Deserialize)]
struct ReplayRecord {
    /// Seconds since the start of the recording
    timestamp: f64,
    kind: PoseKind,
    data: serde_json::Value,
}

impl ReplayRecord {
    fn into_sample(self) -> Result<(f64, TelemetrySample), String> {
        if !(self.timestamp.is_finite() && self.timestamp >= 0.0) {
            return Err(format!("bad timestamp {}", self.timestamp));
        }
        let sample = match self.kind {
            PoseKind::Position => serde_json::from_value::<PositionSample>(self.data)
                .map(TelemetrySample::Position),
            PoseKind::Attitude => serde_json::from_value::<AttitudeSample>(self.data)
                .map(TelemetrySample::Attitude),
        }
        .map_err(|e| e.to_string())?;
        Ok((self.timestamp, sample))
    }
}

/// Replays a recorded telemetry log with its original relative timing,
/// e.g. to run the pipeline against recorded flight video.
///
/// The log is a JSON array of `{"timestamp": <s>, "kind": ..., "data": {...}}`.
/// Records that cannot be decoded are skipped when loading.
pub struct ReplayLink {
    origin: String,
    records: VecDeque<(f64, TelemetrySample)>,
    started: Option<Instant>,
    speed: f64,
}

impl ReplayLink {
    pub async fn load(path: impl AsRef<Path>) -> TrackerResult<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            TrackerError::connectivity(format!("cannot read replay log {}: {}", path.display(), e))
        })?;
        let raw: Vec<serde_json::Value> = serde_json::from_str(&text)
            .map_err(|e| TrackerError::connectivity(format!("{} is not a JSON array: {}", path.display(), e)))?;

        let mut records = Vec::with_capacity(raw.len());
        let mut skipped = 0usize;
        for value in raw {
            match serde_json::from_value::<ReplayRecord>(value)
                .map_err(|e| e.to_string())
                .and_then(ReplayRecord::into_sample)
            {
                Ok(record) => records.push(record),
                Err(e) => {
                    skipped += 1;
                    debug!("Skipping replay record: {}", e);
                }
            }
        }
        if skipped > 0 {
            warn!("Skipped {} malformed replay records in {}", skipped, path.display());
        }
        info!("Loaded {} telemetry records from {}", records.len(), path.display());

        Ok(Self::from_records(path.display().to_string(), records))
    }

    /// Replay in-memory samples at the given offsets in seconds
    pub fn from_samples(samples: Vec<(f64, TelemetrySample)>) -> Self {
        Self::from_records("in-memory".to_string(), samples)
    }

    fn from_records(origin: String, mut records: Vec<(f64, TelemetrySample)>) -> Self {
        records.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self {
            origin,
            records: records.into(),
            started: None,
            speed: 1.0,
        }
    }

    /// Replay faster (> 1) or slower (< 1) than recorded
    pub fn with_speed(mut self, speed: f64) -> Self {
        if speed.is_finite() && speed > 0.0 {
            self.speed = speed;
        }
        self
    }

    pub fn remaining(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl TelemetryLink for ReplayLink {
    fn describe(&self) -> String {
        format!("replay ({})", self.origin)
    }

    async fn recv(&mut self) -> Result<Option<TelemetrySample>, LinkError> {
        let Some((offset, _)) = self.records.front() else {
            return Err(LinkError::Closed);
        };
        let started = *self.started.get_or_insert_with(Instant::now);
        let due = started + Duration::from_secs_f64(offset / self.speed);
        tokio::time::sleep_until(due).await;

        match self.records.pop_front() {
            Some((_, mut sample)) => {
                sample.stamp(Utc::now());
                Ok(Some(sample))
            }
            None => Err(LinkError::Closed),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_udp_link_decodes_samples() {
        let mut link = UdpJsonLink::bind("127.0.0.1:0", Duration::from_millis(500))
            .await
            .unwrap();
        let addr = link.local_addr().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let json = r#"{"kind":"position","data":{"lat":45.0,"lon":7.0,"alt":320.0,"relative_alt":60.0,"heading":12.0}}"#;
        sender.send_to(json.as_bytes(), addr).await.unwrap();

        let sample = link.recv().await.unwrap().unwrap();
        let position = sample.as_position().unwrap();
        assert_eq!(position.relative_alt, 60.0);
        assert_eq!(position.heading, 12.0);
    }

    #[tokio::test]
    async fn test_udp_link_reports_malformed() {
        let mut link = UdpJsonLink::bind("127.0.0.1:0", Duration::from_millis(500))
            .await
            .unwrap();
        let addr = link.local_addr().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(b"{\"kind\":\"gps\"}", addr).await.unwrap();

        assert!(matches!(link.recv().await, Err(LinkError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_udp_link_times_out_quietly() {
        let mut link = UdpJsonLink::bind("127.0.0.1:0", Duration::from_millis(20))
            .await
            .unwrap();
        assert!(link.recv().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_respects_recorded_timing() {
        let mut link = ReplayLink::from_samples(vec![
            (1.0, TelemetrySample::Attitude(AttitudeSample::new(0.0, 0.0, 90.0))),
            (0.0, TelemetrySample::Position(PositionSample::new(45.0, 7.0, 50.0, 0.0))),
        ]);

        let start = Instant::now();
        let first = link.recv().await.unwrap().unwrap();
        assert_eq!(first.kind(), PoseKind::Position);

        let second = link.recv().await.unwrap().unwrap();
        assert_eq!(second.kind(), PoseKind::Attitude);
        assert!(start.elapsed() >= Duration::from_secs(1));

        assert!(matches!(link.recv().await, Err(LinkError::Closed)));
    }

    #[tokio::test]
    async fn test_replay_log_skips_bad_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flight.json");
        let log = r#"[
            {"timestamp": 0.0, "kind": "position", "data": {"lat": 45.0, "lon": 7.0, "alt": 300.0, "relative_alt": 40.0}},
            {"timestamp": 0.01, "kind": "attitude", "data": {"roll": 0.0, "pitch": 0.0}},
            {"timestamp": 0.02, "kind": "attitude", "data": {"roll": 0.0, "pitch": 0.0, "yaw": 45.0}}
        ]"#;
        std::fs::write(&path, log).unwrap();

        let link = ReplayLink::load(&path).await.unwrap().with_speed(10.0);
        assert_eq!(link.remaining(), 2);
    }

    #[tokio::test]
    async fn test_missing_replay_log_is_connectivity_error() {
        let result = ReplayLink::load("/nonexistent/flight.json").await;
        assert!(matches!(result, Err(TrackerError::Connectivity(_))));
    }
}
