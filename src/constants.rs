//! Constants used throughout the application

use std::time::Duration;

/// Landmark indices of the six canonical points, in anthropometric model order:
/// nose tip, chin, left eye outer corner, right eye outer corner,
/// left mouth corner, right mouth corner.
pub const CANONICAL_LANDMARK_INDICES: [usize; 6] = [1, 152, 33, 263, 61, 291];

/// Number of canonical correspondences used by the pose solver
pub const NUM_CANONICAL_LANDMARKS: usize = 6;

/// Landmark count of a face mesh without iris refinement
pub const FACE_MESH_LANDMARKS: usize = 468;

/// Landmark count of a face mesh with iris refinement
pub const FACE_MESH_REFINED_LANDMARKS: usize = 478;

/// Generic head model, same order as [`CANONICAL_LANDMARK_INDICES`].
/// Camera-style axes: x right, y down, z away from the camera.
pub const ANTHROPOMETRIC_MODEL_POINTS: [[f64; 3]; 6] = [
    [0.0, 0.0, 0.0],
    [0.0, 330.0, 65.0],
    [-225.0, -170.0, 135.0],
    [225.0, -170.0, 135.0],
    [-150.0, 150.0, 125.0],
    [150.0, 150.0, 125.0],
];

/// Scale applied to the decomposition angles for pitch and yaw output
pub const ANGLE_SCALE: f64 = 360.0;

/// Camera matrix center factor
pub const CAMERA_CENTER_FACTOR: f64 = 2.0;

/// Number of lens distortion coefficients (all zero)
pub const DISTORTION_COEFFICIENTS: usize = 4;

/// Default listen host for both transports
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default WebSocket fan-out port
pub const DEFAULT_WEBSOCKET_PORT: u16 = 8765;

/// Default point-to-point TCP port
pub const DEFAULT_TCP_PORT: u16 = 5555;

/// Default broadcast cadence when frames are included
pub const DEFAULT_FRAME_BROADCAST_HZ: f64 = 30.0;

/// Default broadcast cadence for pose-only telemetry
pub const DEFAULT_POSE_BROADCAST_HZ: f64 = 100.0;

/// Highest accepted broadcast cadence
pub const MAX_BROADCAST_RATE_HZ: f64 = 1000.0;

/// Shortest broadcast tick interval (`MAX_BROADCAST_RATE_HZ`)
pub const MIN_BROADCAST_PERIOD: Duration = Duration::from_millis(1);

/// Default JPEG quality of streamed frames
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Default detector confidence thresholds
pub const DEFAULT_MIN_DETECTION_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_MIN_TRACKING_CONFIDENCE: f32 = 0.5;

/// Only the first face is ever tracked
pub const MAX_TRACKED_FACES: usize = 1;

/// Pause before retrying after the frame source returned nothing
pub const DEFAULT_RETRY_DELAY_MS: u64 = 10;

/// Pacing of replayed image sequences (~30 FPS)
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 33;

/// Upper bound on a single point-to-point write
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 250;

/// Outbound messages buffered per fan-out client before ticks are skipped
pub const CLIENT_QUEUE_DEPTH: usize = 4;

/// Levenberg-Marquardt iteration cap for the PnP refinement
pub const PNP_MAX_ITERATIONS: usize = 100;

/// Numeric precision epsilon
pub const EPSILON: f64 = 1e-10;
