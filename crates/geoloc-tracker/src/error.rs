//! Error types for the tracker

use geoloc_core::CoreError;
use geoloc_cv::CvError;
use thiserror::Error;

use crate::link::LinkError;

#[derive(Error, Debug)]
pub enum TrackerError {
    /// The telemetry source is unreachable or silent at startup
    #[error("Telemetry connectivity error: {0}")]
    Connectivity(String),

    #[error("Invalid geo point: latitude={lat}, longitude={lng}")]
    InvalidGeoPoint { lat: f64, lng: f64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Telemetry link error: {0}")]
    Link(#[from] LinkError),

    #[error(transparent)]
    Cv(#[from] CvError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl TrackerError {
    pub fn connectivity(msg: impl Into<String>) -> Self {
        Self::Connectivity(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;
