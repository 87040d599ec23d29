//! Service orchestration: listener, broadcast loop and capture loop.

use crate::{
    capture::{CaptureLoop, CaptureStats, FrameSource, LandmarkDetector},
    config::{CaptureConfig, Config, DetectorConfig, Transport},
    detection::ReplayDetector,
    frame_state::SharedFrameState,
    server::{self, BroadcastLoop, ClientRegistry, ClientSlot, Subscribers},
    sources::ImageDirSource,
    Result,
};
use log::{info, warn};
use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{net::TcpListener, sync::watch, task::JoinHandle};

/// How long to wait for the listener to wind down after shutdown
const LISTENER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Open the frame source named by the capture configuration
///
/// # Errors
///
/// Returns an error if the source cannot be opened, or if a camera/video
/// source is requested without the `camera` feature.
pub fn open_source(config: &CaptureConfig) -> Result<Box<dyn FrameSource>> {
    if let Some(dir) = &config.image_dir {
        let source = ImageDirSource::new(dir)?.with_interval(config.frame_interval());
        return Ok(Box::new(source));
    }

    #[cfg(feature = "camera")]
    {
        use crate::sources::{CameraSource, VideoSource};

        let video = match &config.video_file {
            Some(path) => VideoSource::File(path.clone()),
            None => VideoSource::Camera(config.camera_index),
        };
        Ok(Box::new(CameraSource::open(video)?))
    }

    #[cfg(not(feature = "camera"))]
    {
        Err(crate::Error::ConfigError(
            "Camera and video input need the `camera` feature; use an image directory instead".to_string(),
        ))
    }
}

/// Open the landmark detector named by the detector configuration
///
/// # Errors
///
/// Returns an error if the detector cannot be created, or if model
/// inference is requested without the `onnx` feature.
pub fn open_detector(config: &DetectorConfig) -> Result<Box<dyn LandmarkDetector>> {
    if let Some(path) = &config.landmarks_file {
        return Ok(Box::new(ReplayDetector::open(path)?));
    }

    #[cfg(feature = "onnx")]
    {
        use crate::detection::{FaceMeshDetector, FaceMeshOptions};

        let options = FaceMeshOptions {
            min_detection_confidence: config.min_detection_confidence,
            min_tracking_confidence: config.min_tracking_confidence,
            max_faces: config.max_faces,
        };
        Ok(Box::new(FaceMeshDetector::new(&config.model, options)?))
    }

    #[cfg(not(feature = "onnx"))]
    {
        Err(crate::Error::ConfigError(format!(
            "Running {} needs the `onnx` feature; use a landmarks file instead",
            config.model.display()
        )))
    }
}

/// Validated configuration, ready to bind
pub struct TelemetryService {
    config: Config,
}

impl TelemetryService {
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bind the listen address. Nothing else starts before this succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Bind`] if the address is unavailable.
    pub async fn bind(self) -> Result<BoundService> {
        let addr = self.config.server.listen_addr().await?;
        let listener = server::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Bound {} telemetry on {}", self.config.server.transport, local_addr);

        Ok(BoundService {
            config: self.config,
            listener,
            local_addr,
        })
    }
}

/// Service with its listener bound
pub struct BoundService {
    config: Config,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl BoundService {
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run until `shutdown` resolves or the frame source closes
    ///
    /// # Errors
    ///
    /// Returns an error if a background task panics.
    pub async fn run<S, D, F>(self, source: S, detector: D, shutdown: F) -> Result<CaptureStats>
    where
        S: FrameSource + 'static,
        D: LandmarkDetector + 'static,
        F: Future<Output = ()> + Send,
    {
        let Self { config, listener, .. } = self;
        let state = Arc::new(SharedFrameState::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        match config.server.transport {
            Transport::WebSocket => {
                let registry = Arc::new(ClientRegistry::new());
                let listener_task = tokio::spawn(server::serve_websocket(
                    listener,
                    Arc::clone(&registry),
                    shutdown_rx.clone(),
                ));
                run_loops(&config, state, registry, listener_task, (shutdown_tx, shutdown_rx), source, detector, shutdown)
                    .await
            }
            Transport::Tcp => {
                let slot = Arc::new(ClientSlot::new(config.server.write_timeout()));
                let listener_task = tokio::spawn(server::serve_point_to_point(
                    listener,
                    Arc::clone(&slot),
                    shutdown_rx.clone(),
                ));
                run_loops(&config, state, slot, listener_task, (shutdown_tx, shutdown_rx), source, detector, shutdown)
                    .await
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_loops<T, S, D, F>(
    config: &Config,
    state: Arc<SharedFrameState>,
    subscribers: Arc<T>,
    listener_task: JoinHandle<Result<()>>,
    (shutdown_tx, shutdown_rx): (watch::Sender<bool>, watch::Receiver<bool>),
    source: S,
    detector: D,
    shutdown: F,
) -> Result<CaptureStats>
where
    T: Subscribers + 'static,
    S: FrameSource + 'static,
    D: LandmarkDetector + 'static,
    F: Future<Output = ()> + Send,
{
    let server_config = &config.server;

    let broadcast = BroadcastLoop::new(Arc::clone(&state), Arc::clone(&subscribers), server_config.broadcast_period())
        .include_frame(server_config.include_frame)
        .jpeg_quality(server_config.jpeg_quality);
    let broadcast_task = tokio::spawn(broadcast.run(shutdown_rx));

    let running = Arc::new(AtomicBool::new(true));
    let mut capture = CaptureLoop::new(source, detector, state)
        .include_frame(server_config.include_frame)
        .retry_delay(config.capture.retry_delay());
    let capture_running = Arc::clone(&running);
    let mut capture_task = tokio::task::spawn_blocking(move || capture.run(&capture_running));

    let finished = tokio::select! {
        result = &mut capture_task => Some(result),
        () = shutdown => {
            info!("Shutdown requested");
            None
        }
    };

    running.store(false, Ordering::Relaxed);
    let _ = shutdown_tx.send(true);

    if let Err(e) = broadcast_task.await {
        warn!("Broadcast task failed: {}", e);
    }
    subscribers.close_all().await;

    match tokio::time::timeout(LISTENER_SHUTDOWN_TIMEOUT, listener_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!("Listener stopped with error: {}", e),
        Ok(Err(e)) => warn!("Listener task failed: {}", e),
        Err(_) => warn!("Listener did not stop within {:?}", LISTENER_SHUTDOWN_TIMEOUT),
    }

    let stats = match finished {
        Some(result) => result?,
        None => capture_task.await?,
    };
    info!("Service stopped");
    Ok(stats)
}

/// Resolves on Ctrl-C
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
