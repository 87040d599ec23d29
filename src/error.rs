//! Error types for the head pose telemetry library.

use std::net::SocketAddr;
use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// `OpenCV` operation failed
    #[cfg(feature = "opencv")]
    #[error("OpenCV error: {0}")]
    OpenCV(#[from] opencv::Error),

    /// `ONNX` Runtime inference failed
    #[cfg(feature = "onnx")]
    #[error("ONNX Runtime error: {0}")]
    OnnxRuntime(#[from] ort::OrtError),

    /// File I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or JPEG encoding failed
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON serialization or parsing failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid input parameters provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The frame source failed to deliver a frame this cycle
    #[error("Acquisition error: {0}")]
    Acquisition(String),

    /// The landmark detector failed on a frame
    #[error("Detection error: {0}")]
    Detection(String),

    /// Model loading or output decoding error
    #[error("Model error: {0}")]
    ModelError(String),

    /// Perspective-n-Point solve did not produce a usable rotation
    #[error("Pose solve failed: {0}")]
    PoseSolve(String),

    /// The listen address could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: SocketAddr,
        /// Underlying socket error
        source: std::io::Error,
    },

    /// A background task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Convenience type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
