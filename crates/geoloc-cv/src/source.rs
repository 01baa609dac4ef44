//! Frame acquisition
//!
//! A [`FrameSource`] owns a [`VideoBackend`] on a dedicated thread and keeps
//! only the most recent frame. Readers never wait on the capture device.

use image::RgbImage;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{CvError, CvResult, Frame};
use geoloc_core::Latest;

/// A capture device or stream
pub trait VideoBackend: Send + 'static {
    /// Human-readable origin, for logs
    fn describe(&self) -> String;

    /// Read the next frame.
    ///
    /// `Ok(None)` means the stream has ended for good. A
    /// [`CvError::TransientRead`] means this read failed but the next may not.
    fn grab(&mut self) -> CvResult<Option<RgbImage>>;

    /// Session resolution as `(width, height)`, if the device reports it
    /// before the first read
    fn resolution(&self) -> Option<(u32, u32)>;
}

/// Acquisition lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceStatus {
    /// Thread started, no frame yet
    Starting,
    Streaming,
    /// End of stream, fatal read error or cancellation
    Ended,
}

/// Frame source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameSourceConfig {
    /// Consecutive transient failures tolerated before the stream is declared ended
    pub max_consecutive_failures: u32,
    /// Pause after a transient failure
    pub retry_delay_ms: u64,
    /// Minimum spacing between reads; 0 reads as fast as the backend allows
    pub frame_interval_ms: u64,
    /// How long `wait_first_frame` waits during startup
    pub startup_timeout_ms: u64,
}

impl Default for FrameSourceConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 30,
            retry_delay_ms: 10,
            frame_interval_ms: 0,
            startup_timeout_ms: 5_000,
        }
    }
}

impl FrameSourceConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

struct Shared {
    latest: Latest<Frame>,
    status: RwLock<SourceStatus>,
    frames_captured: AtomicU64,
    read_failures: AtomicU64,
    resolution: RwLock<Option<(u32, u32)>>,
}

impl Shared {
    fn finish(&self) {
        *self.status.write() = SourceStatus::Ended;
        self.latest.clear();
    }
}

/// Marks the source ended when the acquisition thread leaves, unwinding included
struct FinishOnExit(Arc<Shared>);

impl Drop for FinishOnExit {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Latest-frame producer running on its own thread
pub struct FrameSource {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    description: String,
}

impl FrameSource {
    /// Start acquiring from `backend`. Cancelling `cancel` (or dropping the
    /// source) stops the thread and releases the backend.
    pub fn spawn(
        backend: Box<dyn VideoBackend>,
        config: FrameSourceConfig,
        cancel: &CancellationToken,
    ) -> CvResult<Self> {
        let description = backend.describe();
        let shared = Arc::new(Shared {
            latest: Latest::new(),
            status: RwLock::new(SourceStatus::Starting),
            frames_captured: AtomicU64::new(0),
            read_failures: AtomicU64::new(0),
            resolution: RwLock::new(backend.resolution()),
        });
        let cancel = cancel.child_token();

        let handle = {
            let shared = Arc::clone(&shared);
            let cancel = cancel.clone();
            thread::Builder::new()
                .name("frame-source".to_string())
                .spawn(move || acquisition_loop(backend, config, shared, cancel))?
        };

        info!("📹 Frame source started: {}", description);

        Ok(Self {
            shared,
            cancel,
            handle: Some(handle),
            description,
        })
    }

    /// Most recent frame, or `None` before the first frame and after the
    /// stream has ended. Never blocks on the capture thread.
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        if self.status() == SourceStatus::Ended {
            return None;
        }
        self.shared.latest.get()
    }

    pub fn status(&self) -> SourceStatus {
        *self.shared.status.read()
    }

    pub fn is_ended(&self) -> bool {
        self.status() == SourceStatus::Ended
    }

    pub fn frames_captured(&self) -> u64 {
        self.shared.frames_captured.load(Ordering::Relaxed)
    }

    pub fn read_failures(&self) -> u64 {
        self.shared.read_failures.load(Ordering::Relaxed)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Session resolution. Known from the start when the backend reports it,
    /// otherwise from the first frame; kept after the stream ends.
    pub fn resolution(&self) -> Option<(u32, u32)> {
        *self.shared.resolution.read()
    }

    /// Startup liveness check: block until the first frame arrives.
    pub fn wait_first_frame(&self, timeout: Duration) -> CvResult<Arc<Frame>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.latest_frame() {
                return Ok(frame);
            }
            if self.is_ended() {
                return Err(CvError::connectivity(format!(
                    "{} ended before producing a frame",
                    self.description
                )));
            }
            if Instant::now() >= deadline {
                return Err(CvError::connectivity(format!(
                    "no frame from {} within {:?}",
                    self.description, timeout
                )));
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Stop the acquisition thread and wait for it to release the backend
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Frame source thread panicked");
            }
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn acquisition_loop(
    mut backend: Box<dyn VideoBackend>,
    config: FrameSourceConfig,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    let _finish = FinishOnExit(Arc::clone(&shared));
    let interval = Duration::from_millis(config.frame_interval_ms);
    let retry_delay = Duration::from_millis(config.retry_delay_ms);
    let mut sequence = 0u64;
    let mut consecutive_failures = 0u32;

    while !cancel.is_cancelled() {
        let started = Instant::now();

        match backend.grab() {
            Ok(Some(image)) => {
                consecutive_failures = 0;
                sequence += 1;
                if sequence == 1 {
                    shared.resolution.write().get_or_insert(image.dimensions());
                }
                shared.latest.publish(Frame::new(image, sequence));
                shared.frames_captured.fetch_add(1, Ordering::Relaxed);

                if sequence == 1 {
                    *shared.status.write() = SourceStatus::Streaming;
                    debug!("First frame received from {}", backend.describe());
                }

                pause(&cancel, interval.saturating_sub(started.elapsed()));
            }
            Ok(None) => {
                info!("Video stream ended after {} frames", sequence);
                break;
            }
            Err(CvError::TransientRead(reason)) => {
                consecutive_failures += 1;
                shared.read_failures.fetch_add(1, Ordering::Relaxed);
                if consecutive_failures >= config.max_consecutive_failures {
                    warn!(
                        "Giving up on {} after {} consecutive read failures: {}",
                        backend.describe(),
                        consecutive_failures,
                        reason
                    );
                    break;
                }
                debug!("Transient read failure ({}), retrying", reason);
                pause(&cancel, retry_delay);
            }
            Err(e) => {
                error!("Video capture failed: {}", e);
                break;
            }
        }
    }

    drop(backend);
    debug!("Frame source thread exiting");
}

/// Sleep that wakes early on cancellation
fn pause(cancel: &CancellationToken, duration: Duration) {
    let deadline = Instant::now() + duration;
    while !cancel.is_cancelled() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(10)));
    }
}

// ============================================================================
// IMAGE SEQUENCE BACKEND
// ============================================================================

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// Plays back still images, either from a directory in lexical order or
/// from memory
pub struct ImageSequence {
    origin: String,
    frames: SequenceFrames,
    resolution: Option<(u32, u32)>,
}

enum SequenceFrames {
    Files(VecDeque<PathBuf>),
    Memory(VecDeque<RgbImage>),
}

impl ImageSequence {
    /// Open a directory of images. An unreadable or empty directory is a
    /// connectivity error.
    pub fn open(dir: impl AsRef<Path>) -> CvResult<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|e| {
            CvError::connectivity(format!("cannot read {}: {}", dir.display(), e))
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(CvError::connectivity(format!(
                "no images found in {}",
                dir.display()
            )));
        }

        // Header-only read; an undecodable first file surfaces on grab instead
        let resolution = image::image_dimensions(&paths[0]).ok();

        Ok(Self {
            origin: dir.display().to_string(),
            frames: SequenceFrames::Files(paths.into()),
            resolution,
        })
    }

    pub fn from_images(images: Vec<RgbImage>) -> Self {
        Self {
            origin: format!("{} in-memory frames", images.len()),
            resolution: images.first().map(|img| img.dimensions()),
            frames: SequenceFrames::Memory(images.into()),
        }
    }

    pub fn remaining(&self) -> usize {
        match &self.frames {
            SequenceFrames::Files(f) => f.len(),
            SequenceFrames::Memory(f) => f.len(),
        }
    }
}

impl VideoBackend for ImageSequence {
    fn describe(&self) -> String {
        format!("image sequence ({})", self.origin)
    }

    fn grab(&mut self) -> CvResult<Option<RgbImage>> {
        match &mut self.frames {
            SequenceFrames::Memory(frames) => Ok(frames.pop_front()),
            SequenceFrames::Files(paths) => {
                let Some(path) = paths.pop_front() else {
                    return Ok(None);
                };
                match image::open(&path) {
                    Ok(img) => Ok(Some(img.to_rgb8())),
                    Err(e) => Err(CvError::transient_read(format!(
                        "{}: {}",
                        path.display(),
                        e
                    ))),
                }
            }
        }
    }

    fn resolution(&self) -> Option<(u32, u32)> {
        self.resolution
    }
}

// ============================================================================
// TESTS
// ============================================================================
