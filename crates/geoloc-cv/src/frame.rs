//! Video frame handed from acquisition to detection

use chrono::{DateTime, Utc};
use image::RgbImage;

/// Immutable RGB frame stamped by its source
#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbImage,
    sequence: u64,
    captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at: Utc::now(),
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Monotonically increasing per source, starting at 1
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}
