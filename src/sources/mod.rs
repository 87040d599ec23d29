//! Frame source adapters.
//!
//! [`ImageDirSource`] replays still images from disk and is always available.
//! [`CameraSource`] reads a webcam or video file through OpenCV and needs the
//! `camera` feature.

#[cfg(feature = "camera")]
pub mod camera;
pub mod images;

#[cfg(feature = "camera")]
pub use camera::{CameraSource, VideoSource};
pub use images::ImageDirSource;
