use crate::{capture::LandmarkDetector, landmarks::FaceDetectionResult, Error, Result};
use image::RgbImage;
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

/// Replays recorded detections, one JSON line per frame.
///
/// Each line is an array of faces, each face an array of `{"x", "y", "z"}`
/// points. Blank lines mean "no face". After the last line every frame
/// reports no face.
pub struct ReplayDetector {
    lines: Box<dyn BufRead + Send>,
    line_number: usize,
    exhausted: bool,
}

impl ReplayDetector {
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        log::info!("Replaying landmarks from {}", path.as_ref().display());
        let file = File::open(path)?;
        Ok(Self::from_reader(BufReader::new(file)))
    }

    pub fn from_reader<R: BufRead + Send + 'static>(reader: R) -> Self {
        Self {
            lines: Box::new(reader),
            line_number: 0,
            exhausted: false,
        }
    }
}

impl LandmarkDetector for ReplayDetector {
    fn detect(&mut self, _frame: &RgbImage, _timestamp_ms: u64) -> Result<FaceDetectionResult> {
        if self.exhausted {
            return Ok(FaceDetectionResult::empty());
        }

        let mut line = String::new();
        if self.lines.read_line(&mut line)? == 0 {
            log::info!("Landmark replay finished after {} frames", self.line_number);
            self.exhausted = true;
            return Ok(FaceDetectionResult::empty());
        }
        self.line_number += 1;

        let line = line.trim();
        if line.is_empty() {
            return Ok(FaceDetectionResult::empty());
        }
        serde_json::from_str(line)
            .map_err(|e| Error::Detection(format!("Invalid landmark record on line {}: {e}", self.line_number)))
    }
}
