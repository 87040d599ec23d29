//! Telemetry wire format.
//!
//! Every delivery is one JSON object `{"pitch", "yaw", "roll", "frame"?}`
//! where `frame` is a base64-encoded JPEG, omitted when frames are disabled.

use crate::{frame_state::FrameSnapshot, pose_estimation::PoseEstimate, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{codecs::jpeg::JpegEncoder, ColorType, RgbImage};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseMessage {
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<String>,
}

impl PoseMessage {
    #[must_use]
    pub fn pose_only(pose: &PoseEstimate) -> Self {
        Self {
            pitch: pose.pitch,
            yaw: pose.yaw,
            roll: pose.roll,
            frame: None,
        }
    }

    #[must_use]
    pub fn with_frame(pose: &PoseEstimate, frame: String) -> Self {
        Self {
            frame: Some(frame),
            ..Self::pose_only(pose)
        }
    }

    #[must_use]
    pub fn pose(&self) -> PoseEstimate {
        PoseEstimate::new(self.pitch, self.yaw, self.roll)
    }

    /// Serialize to a single-line JSON string
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (non-finite floats are written as `null`).
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// # Errors
    ///
    /// Returns an error if `text` is not a valid message.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Compress an RGB frame to JPEG at the given quality (clamped to 1..=100)
///
/// # Errors
///
/// Returns an error if the encoder fails.
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
        encoder.encode(frame.as_raw(), frame.width(), frame.height(), ColorType::Rgb8)?;
    }
    Ok(buffer)
}

/// JPEG-compress and base64-encode a frame for the `frame` field
///
/// # Errors
///
/// Returns an error if JPEG encoding fails.
pub fn encode_frame(frame: &RgbImage, quality: u8) -> Result<String> {
    Ok(STANDARD.encode(encode_jpeg(frame, quality)?))
}

/// Build the message for one broadcast tick.
///
/// Returns `None` when frames are requested but the snapshot holds none yet.
///
/// # Errors
///
/// Returns an error if frame encoding fails.
pub fn build_message(snapshot: &FrameSnapshot, include_frame: bool, quality: u8) -> Result<Option<PoseMessage>> {
    if !include_frame {
        return Ok(Some(PoseMessage::pose_only(&snapshot.pose)));
    }
    match &snapshot.frame {
        Some(frame) => Ok(Some(PoseMessage::with_frame(&snapshot.pose, encode_frame(frame, quality)?))),
        None => Ok(None),
    }
}
