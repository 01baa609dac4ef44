//! Configuration for the CV module

use serde::{Deserialize, Serialize};

use crate::{CvError, CvResult};

/// Configuration for detection and georeferencing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CvConfig {
    /// Marker detection settings
    pub detector: DetectorConfig,
    /// Camera intrinsics and mounting
    pub camera: CameraConfig,
}

impl CvConfig {
    pub fn validate(&self) -> CvResult<()> {
        self.detector.validate()?;
        self.camera.validate()
    }

    /// Red markers only, as flown in the field
    pub fn red_markers() -> Self {
        Self {
            detector: DetectorConfig {
                classes: vec![ColorClass::red()],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Forward-looking camera tilted down by `depression_deg`
    pub fn oblique(depression_deg: f64) -> Self {
        Self {
            camera: CameraConfig {
                mount_pitch_deg: -depression_deg,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Marker detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Gaussian blur sigma applied before color conversion; 0 disables it
    pub blur_sigma: f32,
    /// Minimum bounding box area in pixels
    pub min_area: u32,
    /// Color classes evaluated independently on every frame
    pub classes: Vec<ColorClass>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            blur_sigma: 0.8,
            min_area: 400,
            classes: vec![ColorClass::red(), ColorClass::blue()],
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> CvResult<()> {
        if !self.blur_sigma.is_finite() || self.blur_sigma < 0.0 {
            return Err(CvError::invalid_config("blur_sigma must be a non-negative number"));
        }
        if self.classes.is_empty() {
            return Err(CvError::invalid_config("at least one color class is required"));
        }
        for class in &self.classes {
            class.validate()?;
        }
        Ok(())
    }
}

/// A named marker color made of one or more HSV ranges OR-ed together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorClass {
    pub name: String,
    pub ranges: Vec<HsvRange>,
}

impl ColorClass {
    pub fn new(name: impl Into<String>, ranges: Vec<HsvRange>) -> Self {
        Self {
            name: name.into(),
            ranges,
        }
    }

    /// Red wraps around 0/360 so it needs two ranges
    pub fn red() -> Self {
        Self::new(
            "red",
            vec![
                HsvRange::new(0.0, 20.0, 50.0, 255.0, 50.0, 255.0),
                HsvRange::new(320.0, 360.0, 50.0, 255.0, 50.0, 255.0),
            ],
        )
    }

    pub fn blue() -> Self {
        Self::new(
            "blue",
            vec![HsvRange::new(180.0, 300.0, 70.0, 255.0, 50.0, 255.0)],
        )
    }

    pub fn matches(&self, h: f32, s: f32, v: f32) -> bool {
        self.ranges.iter().any(|r| r.contains(h, s, v))
    }

    pub fn validate(&self) -> CvResult<()> {
        if self.name.trim().is_empty() {
            return Err(CvError::invalid_config("color class name must not be empty"));
        }
        if self.ranges.is_empty() {
            return Err(CvError::invalid_config(format!(
                "color class '{}' has no HSV ranges",
                self.name
            )));
        }
        for range in &self.ranges {
            range.validate().map_err(|e| {
                CvError::invalid_config(format!("color class '{}': {}", self.name, e))
            })?;
        }
        Ok(())
    }
}

/// Inclusive HSV box. Hue in degrees (0-360), saturation and value 0-255.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HsvRange {
    pub h_min: f32,
    pub h_max: f32,
    pub s_min: f32,
    pub s_max: f32,
    pub v_min: f32,
    pub v_max: f32,
}

impl HsvRange {
    pub fn new(h_min: f32, h_max: f32, s_min: f32, s_max: f32, v_min: f32, v_max: f32) -> Self {
        Self {
            h_min,
            h_max,
            s_min,
            s_max,
            v_min,
            v_max,
        }
    }

    pub fn contains(&self, h: f32, s: f32, v: f32) -> bool {
        h >= self.h_min
            && h <= self.h_max
            && s >= self.s_min
            && s <= self.s_max
            && v >= self.v_min
            && v <= self.v_max
    }

    fn validate(&self) -> Result<(), String> {
        let bounds = [
            ("hue", self.h_min, self.h_max, 360.0),
            ("saturation", self.s_min, self.s_max, 255.0),
            ("value", self.v_min, self.v_max, 255.0),
        ];
        for (channel, lo, hi, max) in bounds {
            if !(lo.is_finite() && hi.is_finite()) {
                return Err(format!("{channel} bounds must be finite"));
            }
            if lo > hi {
                return Err(format!("{channel} lower bound {lo} exceeds upper bound {hi}"));
            }
            if lo < 0.0 || hi > max {
                return Err(format!("{channel} bounds must lie within 0..={max}"));
            }
        }
        Ok(())
    }
}

/// Pinhole camera and its mounting on the airframe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Focal length in pixels
    pub focal_length_px: f64,
    /// Mount pitch in degrees; -90 looks straight down, 0 looks forward
    pub mount_pitch_deg: f64,
    /// Mount yaw in degrees relative to the nose, clockwise
    pub mount_yaw_deg: f64,
    /// Apply vehicle pitch and roll; when false only yaw rotates the ray
    pub use_pitch_roll: bool,
    /// Reject rays further than this from nadir
    pub max_off_nadir_deg: Option<f64>,
    /// Rays within this many degrees of the horizon are degenerate
    pub horizon_margin_deg: f64,
    /// Rays that meet the ground further out than this are degenerate
    pub max_ground_range_m: Option<f64>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            focal_length_px: 1000.0,
            mount_pitch_deg: -90.0,
            mount_yaw_deg: 0.0,
            use_pitch_roll: true,
            max_off_nadir_deg: None,
            horizon_margin_deg: 1.0,
            max_ground_range_m: None,
        }
    }
}

impl CameraConfig {
    pub fn validate(&self) -> CvResult<()> {
        if !(self.focal_length_px.is_finite() && self.focal_length_px > 0.0) {
            return Err(CvError::invalid_config("focal_length_px must be positive"));
        }
        if !(self.mount_pitch_deg.is_finite() && self.mount_yaw_deg.is_finite()) {
            return Err(CvError::invalid_config("mount angles must be finite"));
        }
        if let Some(limit) = self.max_off_nadir_deg {
            if !(limit > 0.0 && limit < 90.0) {
                return Err(CvError::invalid_config(
                    "max_off_nadir_deg must lie strictly between 0 and 90",
                ));
            }
        }
        if !(self.horizon_margin_deg >= 0.0 && self.horizon_margin_deg < 90.0) {
            return Err(CvError::invalid_config(
                "horizon_margin_deg must lie in [0, 90)",
            ));
        }
        if let Some(range) = self.max_ground_range_m {
            if !(range.is_finite() && range > 0.0) {
                return Err(CvError::invalid_config("max_ground_range_m must be positive"));
            }
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
