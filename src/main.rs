//! Head pose telemetry server: estimates head pose from a camera and streams it to clients.

use anyhow::{Context, Result};
use clap::Parser;
use head_pose_telemetry::{
    app::{self, TelemetryService},
    config::{Config, Transport},
};
use log::info;
use std::{fs::File, path::PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML format)
    #[arg(short = 'C', long)]
    config: Option<PathBuf>,

    /// Telemetry transport (websocket, tcp)
    #[arg(short, long)]
    transport: Option<Transport>,

    /// Listen host
    #[arg(long)]
    host: Option<String>,

    /// Listen port (default 8765 for websocket, 5555 for tcp)
    #[arg(short, long)]
    port: Option<u16>,

    /// Broadcast rate in Hz
    #[arg(short, long)]
    rate: Option<f64>,

    /// Send pose only, without video frames
    #[arg(long)]
    no_frame: bool,

    /// JPEG quality of streamed frames (0-100)
    #[arg(long)]
    jpeg_quality: Option<u8>,

    /// Camera index to use
    #[arg(long)]
    cam: Option<i32>,

    /// Video file to process
    #[arg(short, long)]
    video: Option<PathBuf>,

    /// Directory of images to replay instead of a camera
    #[arg(long)]
    images: Option<PathBuf>,

    /// Recorded landmarks (JSON lines) to replay instead of running a model
    #[arg(long)]
    landmarks: Option<PathBuf>,

    /// Face mesh ONNX model
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    /// Also write the log to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Print the effective configuration as YAML and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    /// Command line flags take precedence over the config file
    fn apply(self, config: &mut Config) {
        let server = &mut config.server;
        if let Some(transport) = self.transport {
            server.transport = transport;
        }
        if let Some(host) = self.host {
            server.host = host;
        }
        server.port = self.port.or(server.port);
        server.broadcast_rate_hz = self.rate.or(server.broadcast_rate_hz);
        if self.no_frame {
            server.include_frame = false;
        }
        if let Some(quality) = self.jpeg_quality {
            server.jpeg_quality = quality;
        }

        let capture = &mut config.capture;
        if let Some(cam) = self.cam {
            capture.camera_index = cam;
        }
        if self.video.is_some() {
            capture.video_file = self.video;
            capture.image_dir = None;
        }
        if self.images.is_some() {
            capture.image_dir = self.images;
            capture.video_file = None;
        }

        let detector = &mut config.detector;
        if self.landmarks.is_some() {
            detector.landmarks_file = self.landmarks;
        }
        if let Some(model) = self.model {
            detector.model = model;
        }
    }
}

fn init_logging(debug: bool, log_file: Option<&PathBuf>) -> Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::new().default_filter_or(default_level));

    if let Some(path) = log_file {
        let file = File::create(path).with_context(|| format!("Failed to create log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();
    init_logging(args.debug, args.log_file.as_ref())?;

    info!("Head Pose Telemetry v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration if provided
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Config::from_file(path).with_context(|| format!("Failed to load {}", path.display()))?
        }
        None => Config::default(),
    };
    let print_config = args.print_config;
    args.apply(&mut config);

    if print_config {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    let service = TelemetryService::new(config)?;
    let source = app::open_source(&service.config().capture)?;
    let detector = app::open_detector(&service.config().detector)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let stats = runtime.block_on(async move {
        let bound = service.bind().await?;
        info!("Press Ctrl-C to stop");
        bound.run(source, detector, app::ctrl_c()).await
    })?;

    info!(
        "Processed {} frames ({} poses, {} held, {} without face)",
        stats.frames, stats.updated, stats.held, stats.no_face
    );
    Ok(())
}
