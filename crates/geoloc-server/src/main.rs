//! # Geoloc Server
//!
//! Runs the airborne target-geolocation pipeline: video and telemetry
//! intake, marker detection, georeferencing and zone de-duplication, with
//! a read-only HTTP API over the results.

mod config;
mod error;
mod handlers;
mod routes;
mod state;

use crate::config::{AppConfig, LinkKind, TelemetryConfig, VideoBackendKind, VideoConfig};
use crate::routes::create_router;
use crate::state::AppState;

use geoloc_core::{Event, EventType};
use geoloc_cv::{CvEngine, FrameSource, ImageSequence, VideoBackend};
use geoloc_metrics::MetricsCollector;
use geoloc_tracker::{
    EventBus, FusionLoop, PoseSource, ReplayLink, TelemetryLink, UdpJsonLink, ZoneTracker,
};

use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    info!("🛰️  Starting Geoloc Server v{}", env!("CARGO_PKG_VERSION"));
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = AppConfig::load()?;
    config.cv.validate()?;
    info!("Configuration loaded");
    info!("   API Port: {}", config.server.api_port);
    info!("   Video: {:?} {}", config.video.backend, config.video.uri);
    info!("   Telemetry: {:?}", config.telemetry.link);
    info!("   Merge distance: {} m", config.tracker.zones.merge_distance_m);

    let cancel = CancellationToken::new();
    let metrics = Arc::new(MetricsCollector::new()?);
    let events = EventBus::new(
        config.tracker.fusion.event_capacity,
        config.tracker.fusion.event_history,
    );

    // Video first: a dead camera aborts the session before anything else starts
    let backend = open_video(&config.video)?;
    let mut frames = FrameSource::spawn(backend, config.video.source.clone(), &cancel)?;
    let timeout = config.video.source.startup_timeout();
    let first = tokio::task::block_in_place(|| frames.wait_first_frame(timeout))?;
    info!(
        "📹 First frame {}x{} from {}",
        first.width(),
        first.height(),
        frames.description()
    );
    events.publish(Event::system(
        EventType::SourceConnected,
        "frame_source",
        "streaming",
        Some(frames.description().to_string()),
    ));

    let link = open_link(&config.telemetry).await?;
    let poses = Arc::new(
        PoseSource::connect(link, config.tracker.pose.clone(), &cancel, Some(metrics.clone())).await?,
    );
    events.publish(Event::system(
        EventType::SourceConnected,
        "pose_source",
        "receiving",
        Some(poses.description().to_string()),
    ));

    let engine = Arc::new(CvEngine::with_config(&config.cv)?);
    let zones = ZoneTracker::new(config.tracker.zones.clone())?;
    let mut fusion = FusionLoop::new(
        config.tracker.fusion.clone(),
        engine,
        zones,
        events.clone(),
        Some(metrics.clone()),
    );

    let state = AppState {
        config: config.clone(),
        metrics,
        events,
        snapshots: fusion.snapshots(),
        stats: fusion.stats_handle(),
        poses: poses.clone(),
        started_at: Utc::now(),
    };
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.api_port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("🚀 API server listening on http://{}", addr);
    info!("Metrics available at http://{}/metrics", addr);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
    });

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    let outcome = fusion.run(&frames, &poses, &cancel).await;
    if let Err(e) = &outcome {
        error!("Fusion loop failed: {}", e);
    }

    if outcome.is_ok() && config.server.keep_serving && !cancel.is_cancelled() {
        info!("Video ended; serving final zones until shutdown");
        cancel.cancelled().await;
    }
    cancel.cancel();
    tokio::task::block_in_place(|| frames.stop());

    if let Err(e) = server.await? {
        warn!("API server error: {}", e);
    }

    for zone in fusion.zones().zones() {
        info!("   {}", zone);
    }
    let stats = outcome?;
    info!(
        "🛑 Shutdown complete: {} frames, {} located, {} zones",
        stats.frames_processed, stats.located, stats.zones
    );
    Ok(())
}

/// Initialize logging with tracing
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,geoloc_tracker=debug,geoloc_cv=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(filter)
        .init();
}

fn open_video(config: &VideoConfig) -> anyhow::Result<Box<dyn VideoBackend>> {
    match config.backend {
        VideoBackendKind::ImageSequence => Ok(Box::new(ImageSequence::open(&config.uri)?)),
        VideoBackendKind::Opencv => open_capture(&config.uri),
    }
}

#[cfg(feature = "opencv")]
fn open_capture(uri: &str) -> anyhow::Result<Box<dyn VideoBackend>> {
    Ok(Box::new(geoloc_cv::OpenCvCapture::open(uri)?))
}

#[cfg(not(feature = "opencv"))]
fn open_capture(uri: &str) -> anyhow::Result<Box<dyn VideoBackend>> {
    anyhow::bail!("cannot open {}: built without the opencv feature", uri)
}

async fn open_link(config: &TelemetryConfig) -> anyhow::Result<Box<dyn TelemetryLink>> {
    match config.link {
        LinkKind::Udp => Ok(Box::new(
            UdpJsonLink::bind(&config.bind, config.read_timeout()).await?,
        )),
        LinkKind::Replay => {
            let path = config
                .replay_path
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("telemetry.replay_path is required for the replay link"))?;
            Ok(Box::new(ReplayLink::load(path).await?.with_speed(config.replay_speed)))
        }
    }
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        }
    }
}
