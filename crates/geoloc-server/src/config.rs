//! Service configuration
//!
//! Layers, lowest first: built-in defaults, an optional TOML file
//! (`geoloc.toml`, or the path in `GEOLOC_CONFIG`), then `GEOLOC__*`
//! environment variables such as `GEOLOC__TRACKER__ZONES__MERGE_DISTANCE_M=3`.

use geoloc_cv::{CvConfig, FrameSourceConfig};
use geoloc_tracker::TrackerConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "geoloc.toml";

/// Service configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub video: VideoConfig,
    pub telemetry: TelemetryConfig,
    pub cv: CvConfig,
    pub tracker: TrackerConfig,
}

/// HTTP API settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub api_port: u16,
    /// Enable CORS for all origins
    pub cors_permissive: bool,
    /// Keep the API up with the final zones after the video ends
    pub keep_serving: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            api_port: 3000,
            cors_permissive: true,
            keep_serving: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoBackendKind {
    /// Directory of still images played back in name order
    #[default]
    ImageSequence,
    /// Device index, file or stream URL through OpenCV
    Opencv,
}

/// Video input settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub backend: VideoBackendKind,
    /// Directory for image sequences; device index, file or URL for OpenCV
    pub uri: String,
    pub source: FrameSourceConfig,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            backend: VideoBackendKind::ImageSequence,
            uri: "frames".to_string(),
            source: FrameSourceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// Live JSON datagrams
    #[default]
    Udp,
    /// Recorded telemetry log
    Replay,
}

/// Telemetry input settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub link: LinkKind,
    /// Listen address for the UDP link
    pub bind: String,
    pub read_timeout_ms: u64,
    /// Log file for the replay link
    pub replay_path: Option<PathBuf>,
    pub replay_speed: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            link: LinkKind::Udp,
            bind: "0.0.0.0:14550".to_string(),
            read_timeout_ms: 500,
            replay_path: None,
            replay_speed: 1.0,
        }
    }
}

impl TelemetryConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }
}

impl AppConfig {
    /// Load `.env`, then layer the config file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        let path = std::env::var("GEOLOC_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::from_file(Path::new(&path))
    }

    /// Layer an optional config file and `GEOLOC__*` variables over the defaults
    pub fn from_file(path: &Path) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("GEOLOC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

// ============================================================================
// TESTS
// ============================================================================
