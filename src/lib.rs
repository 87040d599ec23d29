//! Real-time head pose telemetry.
//!
//! The pipeline:
//! 1. A [`capture::FrameSource`] yields RGB frames (camera, video file or image directory)
//! 2. A [`capture::LandmarkDetector`] finds the 478-point face mesh
//! 3. Six canonical landmarks feed a `PnP` solve that yields pitch, yaw and roll
//! 4. The latest pose (and optionally the frame, as base64 JPEG) is broadcast
//!    over WebSocket fan-out or a single point-to-point TCP connection
//!
//! # Examples
//!
//! ## Estimating a pose
//!
//! ```no_run
//! use head_pose_telemetry::{
//!     landmarks::{CanonicalLandmarks, FaceLandmarks},
//!     pose_estimation::PoseSolver,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let face: FaceLandmarks = unimplemented!();
//! let solver = PoseSolver::default();
//! let canonical = CanonicalLandmarks::extract(&face)?;
//! let outcome = solver.estimate(&canonical, 640, 480);
//! if let Ok(orientation) = &outcome.orientation {
//!     println!("Pitch: {:.1}, Yaw: {:.1}, Roll: {:.1}", orientation.pitch, orientation.yaw, outcome.roll);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Running the service
//!
//! ```no_run
//! use head_pose_telemetry::{app::{self, TelemetryService}, config::Config};
//!
//! # async fn run() -> head_pose_telemetry::Result<()> {
//! let service = TelemetryService::new(Config::default())?;
//! let source = app::open_source(&service.config().capture)?;
//! let detector = app::open_detector(&service.config().detector)?;
//!
//! let bound = service.bind().await?;
//! println!("Listening on {}", bound.local_addr());
//! bound.run(source, detector, app::ctrl_c()).await?;
//! # Ok(())
//! # }
//! ```

/// Service orchestration
pub mod app;

/// Camera intrinsics approximated from frame size
pub mod camera;

/// Capture loop and the frame source / detector seams
pub mod capture;

/// Configuration management
pub mod config;

/// Constants used throughout the application
pub mod constants;

/// Landmark detectors
pub mod detection;

/// Error types and result handling
pub mod error;

/// Latest pose and frame shared between capture and broadcast
pub mod frame_state;

/// Face mesh landmarks and canonical point selection
pub mod landmarks;

/// Head pose estimation module using `PnP` algorithm
pub mod pose_estimation;

/// Telemetry wire format
pub mod protocol;

/// WebSocket and TCP telemetry servers
pub mod server;

/// Frame sources
pub mod sources;

/// Utility functions for image processing and coordinate transformations
pub mod utils;

pub use error::{Error, Result};
