//! # Geoloc CV - Computer Vision Module
//!
//! Everything between the camera and a ground coordinate:
//! - [`FrameSource`]: latest-frame acquisition on a dedicated thread
//! - [`MarkerDetector`]: HSV color segmentation and contour extraction
//! - [`Georeferencer`]: pixel ray through camera, body and world frames to WGS-84
//! - [`CvEngine`]: detection and georeferencing of one frame against one pose
//!
//! Capture goes through the [`VideoBackend`] trait. [`ImageSequence`] plays
//! back still images; with the `opencv` feature, `OpenCvCapture` reads live
//! streams, files and devices.

pub mod color;
pub mod config;
pub mod detector;
pub mod error;
pub mod frame;
pub mod projection;
pub mod source;

#[cfg(feature = "opencv")]
pub mod capture;

pub use config::{CameraConfig, ColorClass, CvConfig, DetectorConfig, HsvRange};
pub use detector::MarkerDetector;
pub use error::{CvError, CvResult};
pub use frame::Frame;
pub use projection::{Georeferencer, Projection};
pub use source::{FrameSource, FrameSourceConfig, ImageSequence, SourceStatus, VideoBackend};

#[cfg(feature = "opencv")]
pub use capture::OpenCvCapture;

use geoloc_core::{GeoPoint, Observation, PoseSample};
use serde::Serialize;
use tracing::{debug, info};

/// Detection plus georeferencing for one frame
pub struct CvEngine {
    detector: MarkerDetector,
    georeferencer: Georeferencer,
}

/// An observation that could not be placed on the ground
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub observation: Observation,
    /// Stable label, also used as the metrics reason
    pub reason: &'static str,
    pub message: String,
}

/// Everything learned from one frame
#[derive(Debug, Clone, Default, Serialize)]
pub struct FrameAnalysis {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub observations: Vec<Observation>,
    /// Ground points, in observation order, for the observations that projected
    pub located: Vec<GeoPoint>,
    pub rejections: Vec<Rejection>,
    pub pose_available: bool,
}

impl CvEngine {
    /// Create an engine with the default red and blue classes and a nadir camera
    pub fn new() -> CvResult<Self> {
        Self::with_config(&CvConfig::default())
    }

    pub fn with_config(config: &CvConfig) -> CvResult<Self> {
        config.validate()?;
        info!(
            "🎯 Initializing CV engine: {} color classes, focal length {} px, mount pitch {} deg",
            config.detector.classes.len(),
            config.camera.focal_length_px,
            config.camera.mount_pitch_deg
        );

        Ok(Self {
            detector: MarkerDetector::new(&config.detector)?,
            georeferencer: Georeferencer::new(config.camera.clone())?,
        })
    }

    pub fn detector(&self) -> &MarkerDetector {
        &self.detector
    }

    pub fn georeferencer(&self) -> &Georeferencer {
        &self.georeferencer
    }

    /// Detect markers and project them with `pose`. Without a pose only
    /// detection runs and nothing is located or rejected.
    pub fn process_frame(&self, frame: &Frame, pose: Option<&PoseSample>) -> FrameAnalysis {
        let (width, height) = frame.dimensions();
        let observations = self.detector.detect(frame);

        let mut analysis = FrameAnalysis {
            sequence: frame.sequence(),
            width,
            height,
            pose_available: pose.is_some(),
            ..Default::default()
        };

        if let Some(pose) = pose {
            for observation in &observations {
                match self.georeferencer.project(observation, width, height, Some(pose)) {
                    Ok(point) => analysis.located.push(point),
                    Err(e) => {
                        debug!("Observation at ({:.0}, {:.0}) not located: {}", observation.pixel_x, observation.pixel_y, e);
                        analysis.rejections.push(Rejection {
                            observation: observation.clone(),
                            reason: e.rejection_reason(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        analysis.observations = observations;
        analysis
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn frame_with_square(x: u32, y: u32, size: u32) -> Frame {
        let mut image = RgbImage::new(640, 480);
        for dy in 0..size {
            for dx in 0..size {
                image.put_pixel(x + dx, y + dy, Rgb([255, 0, 0]));
            }
        }
        Frame::new(image, 7)
    }

    #[test]
    fn test_engine_locates_centered_marker() {
        let engine = CvEngine::new().unwrap();
        let pose = PoseSample::new(45.0, 7.0, 100.0, 0.0, 0.0, 0.0);

        let analysis = engine.process_frame(&frame_with_square(305, 225, 30), Some(&pose));
        assert_eq!(analysis.sequence, 7);
        assert_eq!(analysis.observations.len(), 1);
        assert_eq!(analysis.located.len(), 1);
        assert!((analysis.located[0].latitude - 45.0).abs() < 1e-9);
        assert!((analysis.located[0].longitude - 7.0).abs() < 1e-9);
        assert_eq!(analysis.located[0].color_class.as_deref(), Some("red"));
    }

    #[test]
    fn test_engine_without_pose_only_detects() {
        let engine = CvEngine::new().unwrap();
        let analysis = engine.process_frame(&frame_with_square(305, 225, 30), None);

        assert!(!analysis.pose_available);
        assert_eq!(analysis.observations.len(), 1);
        assert!(analysis.located.is_empty());
        assert!(analysis.rejections.is_empty());
    }

    #[test]
    fn test_engine_reports_rejections() {
        let engine = CvEngine::new().unwrap();
        let grounded = PoseSample::new(45.0, 7.0, 0.0, 0.0, 0.0, 0.0);

        let analysis = engine.process_frame(&frame_with_square(305, 225, 30), Some(&grounded));
        assert!(analysis.located.is_empty());
        assert_eq!(analysis.rejections.len(), 1);
        assert_eq!(analysis.rejections[0].reason, "insufficient_pose");
    }
}
