//! Error types for the CV module

use thiserror::Error;

/// Errors that can occur in CV operations
#[derive(Error, Debug)]
pub enum CvError {
    #[error("OpenCV error: {0}")]
    OpenCV(String),

    #[error("Frame processing error: {0}")]
    FrameProcessing(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The video source could not be opened or produced nothing in time
    #[error("Video connectivity error: {0}")]
    Connectivity(String),

    /// A single read failed; the acquisition loop retries
    #[error("Transient read failure: {0}")]
    TransientRead(String),

    #[error("Insufficient pose: {0}")]
    InsufficientPose(String),

    #[error("Degenerate geometry: ray is {off_nadir_deg:.2} deg off nadir and never meets the ground")]
    DegenerateGeometry { off_nadir_deg: f64 },

    #[error("Off-nadir angle {off_nadir_deg:.2} deg exceeds limit of {limit_deg:.2} deg")]
    OffNadirExceeded { off_nadir_deg: f64, limit_deg: f64 },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CvError {
    pub fn frame_processing(msg: impl Into<String>) -> Self {
        Self::FrameProcessing(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn connectivity(msg: impl Into<String>) -> Self {
        Self::Connectivity(msg.into())
    }

    pub fn transient_read(msg: impl Into<String>) -> Self {
        Self::TransientRead(msg.into())
    }

    pub fn insufficient_pose(msg: impl Into<String>) -> Self {
        Self::InsufficientPose(msg.into())
    }

    /// Short machine-readable reason for georeference rejections
    pub fn rejection_reason(&self) -> &'static str {
        match self {
            Self::InsufficientPose(_) => "insufficient_pose",
            Self::DegenerateGeometry { .. } => "degenerate_geometry",
            Self::OffNadirExceeded { .. } => "off_nadir_exceeded",
            Self::InvalidConfig(_) => "invalid_config",
            _ => "other",
        }
    }
}

#[cfg(feature = "opencv")]
impl From<opencv::Error> for CvError {
    fn from(err: opencv::Error) -> Self {
        Self::OpenCV(err.to_string())
    }
}

pub type CvResult<T> = Result<T, CvError>;
