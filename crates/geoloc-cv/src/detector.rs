//! Colored marker detection
//!
//! Segments each configured color class in HSV space and reports one
//! observation per external contour whose bounding box is large enough.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::contours::{BorderType, Contour, find_contours};
use imageproc::filter::gaussian_blur_f32;
use tracing::{debug, trace};

use crate::color::rgb_to_hsv;
use crate::config::{ColorClass, DetectorConfig};
use crate::{CvResult, Frame};
use geoloc_core::Observation;

/// Marker detector over RGB frames
pub struct MarkerDetector {
    config: DetectorConfig,
}

impl MarkerDetector {
    /// Create a new detector, validating the color classes
    pub fn new(config: &DetectorConfig) -> CvResult<Self> {
        config.validate()?;
        Ok(Self {
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Detect markers in a frame
    ///
    /// Process:
    /// 1. Gaussian blur to suppress pixel noise
    /// 2. Per color class, threshold the blurred frame in HSV space
    /// 3. Mask the original frame and reduce it to intensity
    /// 4. Trace external contours and keep boxes above the minimum area
    pub fn detect(&self, frame: &Frame) -> Vec<Observation> {
        self.detect_image(frame.image())
    }

    pub fn detect_image(&self, image: &RgbImage) -> Vec<Observation> {
        let start = std::time::Instant::now();
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Vec::new();
        }

        let blurred = if self.config.blur_sigma > 0.0 {
            gaussian_blur_f32(image, self.config.blur_sigma)
        } else {
            image.clone()
        };

        let hsv: Vec<(f32, f32, f32)> = blurred
            .pixels()
            .map(|Rgb([r, g, b])| rgb_to_hsv(*r, *g, *b))
            .collect();

        let mut observations = Vec::new();
        for class in &self.config.classes {
            let intensity = masked_intensity(image, &hsv, class);
            let found = self.extract(&intensity, &class.name);
            trace!("{} candidate(s) for class '{}'", found.len(), class.name);
            observations.extend(found);
        }

        debug!(
            "Detected {} markers in {:.2}ms",
            observations.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        observations
    }

    fn extract(&self, intensity: &GrayImage, class_name: &str) -> Vec<Observation> {
        let contours: Vec<Contour<i32>> = find_contours(intensity);

        contours
            .iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
            .filter_map(bounding_box)
            .filter(|&(_, _, w, h)| w as u64 * h as u64 >= self.config.min_area as u64)
            .map(|(x, y, w, h)| Observation {
                pixel_x: x as f64 + w as f64 / 2.0,
                pixel_y: y as f64 + h as f64 / 2.0,
                pixel_width: w,
                pixel_height: h,
                color_class: class_name.to_string(),
            })
            .collect()
    }
}

/// Intensity of the original frame where the blurred frame falls inside the
/// class ranges, zero elsewhere.
fn masked_intensity(original: &RgbImage, hsv: &[(f32, f32, f32)], class: &ColorClass) -> GrayImage {
    let (width, height) = original.dimensions();
    let mut out = GrayImage::new(width, height);

    for ((pixel, &(h, s, v)), dst) in original.pixels().zip(hsv).zip(out.pixels_mut()) {
        if class.matches(h, s, v) {
            let Rgb([r, g, b]) = *pixel;
            let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
            *dst = Luma([luma.round().clamp(0.0, 255.0) as u8]);
        }
    }
    out
}

/// Axis-aligned box `(x, y, width, height)` enclosing a contour, inclusive
fn bounding_box(contour: &Contour<i32>) -> Option<(i32, i32, u32, u32)> {
    let first = contour.points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in &contour.points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Some((
        min_x,
        min_y,
        (max_x - min_x + 1) as u32,
        (max_y - min_y + 1) as u32,
    ))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HsvRange;

    fn canvas(width: u32, height: u32) -> RgbImage {
        RgbImage::new(width, height)
    }

    fn fill(img: &mut RgbImage, x0: u32, y0: u32, size: u32, color: [u8; 3]) {
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                img.put_pixel(x, y, Rgb(color));
            }
        }
    }

    fn red_detector() -> MarkerDetector {
        let config = DetectorConfig {
            classes: vec![ColorClass::red()],
            ..Default::default()
        };
        MarkerDetector::new(&config).unwrap()
    }

    #[test]
    fn test_detector_creation() {
        assert!(MarkerDetector::new(&DetectorConfig::default()).is_ok());

        let bad = DetectorConfig {
            classes: Vec::new(),
            ..Default::default()
        };
        assert!(MarkerDetector::new(&bad).is_err());
    }

    #[test]
    fn test_black_frame_has_no_markers() {
        let detector = MarkerDetector::new(&DetectorConfig::default()).unwrap();
        let frame = Frame::new(canvas(320, 240), 1);
        assert!(detector.detect(&frame).is_empty());
    }

    #[test]
    fn test_single_red_square_detected_at_center() {
        let mut img = canvas(640, 480);
        fill(&mut img, 305, 225, 30, [255, 0, 0]);

        let observations = red_detector().detect(&Frame::new(img, 1));
        assert_eq!(observations.len(), 1);

        let obs = &observations[0];
        assert!((obs.pixel_x - 320.0).abs() <= 1.0);
        assert!((obs.pixel_y - 240.0).abs() <= 1.0);
        assert_eq!(obs.pixel_width, 30);
        assert_eq!(obs.pixel_height, 30);
        assert_eq!(obs.color_class, "red");
    }

    #[test]
    fn test_small_square_below_min_area_ignored() {
        let mut img = canvas(200, 200);
        fill(&mut img, 90, 90, 10, [255, 0, 0]);

        assert!(red_detector().detect_image(&img).is_empty());
    }

    #[test]
    fn test_min_area_is_inclusive() {
        let mut img = canvas(200, 200);
        fill(&mut img, 50, 50, 20, [255, 0, 0]);

        let config = DetectorConfig {
            blur_sigma: 0.0,
            min_area: 400,
            classes: vec![ColorClass::red()],
        };
        let detector = MarkerDetector::new(&config).unwrap();
        assert_eq!(detector.detect_image(&img).len(), 1);
    }

    #[test]
    fn test_hue_wraparound_class() {
        let class = ColorClass::new(
            "wrap",
            vec![
                HsvRange::new(0.0, 10.0, 50.0, 255.0, 50.0, 255.0),
                HsvRange::new(350.0, 360.0, 50.0, 255.0, 50.0, 255.0),
            ],
        );
        let detector = MarkerDetector::new(&DetectorConfig {
            classes: vec![class],
            ..Default::default()
        })
        .unwrap();

        // hue 5, hue 355 and hue 180 patches
        for (color, expected) in [([255, 21, 0], 1), ([255, 0, 21], 1), ([0, 255, 255], 0)] {
            let mut img = canvas(100, 100);
            fill(&mut img, 30, 30, 40, color);
            assert_eq!(
                detector.detect_image(&img).len(),
                expected,
                "color {:?}",
                color
            );
        }
    }

    #[test]
    fn test_classes_evaluated_independently() {
        let mut img = canvas(300, 200);
        fill(&mut img, 20, 20, 40, [255, 0, 0]);
        fill(&mut img, 200, 100, 40, [0, 0, 255]);

        let detector = MarkerDetector::new(&DetectorConfig::default()).unwrap();
        let observations = detector.detect_image(&img);

        assert_eq!(observations.len(), 2);
        let red = observations.iter().find(|o| o.color_class == "red").unwrap();
        let blue = observations.iter().find(|o| o.color_class == "blue").unwrap();
        assert!((red.pixel_x - 40.0).abs() <= 1.0);
        assert!((blue.pixel_y - 120.0).abs() <= 1.0);
    }

    #[test]
    fn test_separate_blobs_reported_separately() {
        let mut img = canvas(400, 200);
        fill(&mut img, 20, 20, 30, [255, 0, 0]);
        fill(&mut img, 300, 120, 30, [255, 0, 0]);

        assert_eq!(red_detector().detect_image(&img).len(), 2);
    }

    #[test]
    fn test_ring_reports_only_outer_contour() {
        let mut img = canvas(200, 200);
        fill(&mut img, 50, 50, 60, [255, 0, 0]);
        fill(&mut img, 70, 70, 20, [0, 0, 0]);

        let observations = red_detector().detect_image(&img);
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].pixel_width, 60);
    }
}
