//! Error types shared by the geolocation pipeline

use thiserror::Error;

/// Core error type for domain validation
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid position: latitude={lat}, longitude={lng}")]
    InvalidPosition { lat: f64, lng: f64 },

    #[error("Invalid telemetry sample: {0}")]
    InvalidTelemetry(String),
}

impl CoreError {
    pub fn invalid_position(lat: f64, lng: f64) -> Self {
        Self::InvalidPosition { lat, lng }
    }

    pub fn invalid_telemetry(msg: impl Into<String>) -> Self {
        Self::InvalidTelemetry(msg.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
