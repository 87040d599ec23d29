use crate::{
    capture::{FrameGrab, FrameSource},
    utils::image_conversion::bgr_mat_to_rgb_image,
    Result,
};
use opencv::{
    core::Mat,
    prelude::*,
    videoio::{self, VideoCapture, CAP_PROP_BUFFERSIZE},
};
use std::path::PathBuf;

/// Camera index or video file path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource {
    /// Webcam index
    Camera(i32),
    /// Video file path
    File(PathBuf),
}

/// OpenCV `VideoCapture` frame source
pub struct CameraSource {
    capture: VideoCapture,
    source: VideoSource,
}

impl CameraSource {
    /// Open a webcam or video file
    ///
    /// # Errors
    ///
    /// Returns an error if the device or file cannot be opened.
    pub fn open(source: VideoSource) -> Result<Self> {
        let capture = match &source {
            VideoSource::Camera(index) => {
                log::info!("Opening camera {}", index);
                let mut cap = VideoCapture::new(*index, videoio::CAP_ANY)?;

                // Reduce buffer size for lower latency (webcam only)
                cap.set(CAP_PROP_BUFFERSIZE, 1.0)?;
                cap
            }
            VideoSource::File(path) => {
                log::info!("Opening video file: {}", path.display());
                VideoCapture::from_file(&path.to_string_lossy(), videoio::CAP_ANY)?
            }
        };

        if !capture.is_opened()? {
            return Err(crate::Error::Acquisition(format!("Could not open {source:?}")));
        }
        Ok(Self { capture, source })
    }
}

impl FrameSource for CameraSource {
    fn grab(&mut self) -> Result<FrameGrab> {
        let mut frame = Mat::default();
        if !self.capture.read(&mut frame)? || frame.empty() {
            return Ok(match self.source {
                VideoSource::Camera(_) => FrameGrab::Retry,
                VideoSource::File(_) => FrameGrab::Closed,
            });
        }
        Ok(FrameGrab::Frame(bgr_mat_to_rgb_image(&frame)?))
    }
}
