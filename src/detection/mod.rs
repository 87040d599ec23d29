//! Landmark detector adapters.
//!
//! [`ReplayDetector`] feeds pre-recorded landmarks and is always available;
//! [`FaceMeshDetector`] runs a face-mesh ONNX model and needs the `onnx` feature.

#[cfg(feature = "onnx")]
pub mod face_mesh;
pub mod replay;

#[cfg(feature = "onnx")]
pub use face_mesh::{FaceMeshDetector, FaceMeshOptions};
pub use replay::ReplayDetector;
