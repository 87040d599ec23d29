use crate::{
    capture::LandmarkDetector,
    constants::{
        DEFAULT_MIN_DETECTION_CONFIDENCE, DEFAULT_MIN_TRACKING_CONFIDENCE, FACE_MESH_LANDMARKS, MAX_TRACKED_FACES,
    },
    landmarks::{FaceDetectionResult, FaceLandmarks, LandmarkPoint},
    utils::{refine_roi, safe_cast::dimension_to_usize, SquareRoi},
    Error, Result,
};
use image::{imageops, RgbImage};
use ndarray::{Array4, CowArray};
use ort::{Environment, Session, Value};
use std::path::Path;
use std::sync::Arc;

/// Default face mesh input size
const DEFAULT_MESH_INPUT_SIZE: usize = 192;

/// Fraction of the landmark box added on each side when tracking
const TRACKING_ROI_EXPANSION: f32 = 0.25;

/// Values per landmark in the mesh output (x, y, z)
const MESH_COORDS: usize = 3;

/// Detector thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceMeshOptions {
    /// Presence score needed to acquire a face
    pub min_detection_confidence: f32,
    /// Presence score needed to keep tracking a face
    pub min_tracking_confidence: f32,
    pub max_faces: usize,
}

impl Default for FaceMeshOptions {
    fn default() -> Self {
        Self {
            min_detection_confidence: DEFAULT_MIN_DETECTION_CONFIDENCE,
            min_tracking_confidence: DEFAULT_MIN_TRACKING_CONFIDENCE,
            max_faces: MAX_TRACKED_FACES,
        }
    }
}

/// Face mesh landmark detector using `ONNX` Runtime
///
/// The model sees a square ROI: the centred square while searching, and the
/// expanded box around the previous landmarks while tracking.
pub struct FaceMeshDetector {
    session: Session,
    input_size: usize,
    channels_first: bool,
    options: FaceMeshOptions,
    previous: Option<FaceLandmarks>,
}

impl FaceMeshDetector {
    /// Create a new face mesh detector from an `ONNX` model file
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The ONNX model file cannot be loaded
    /// - The model has no inputs or outputs
    /// - The ONNX runtime environment cannot be created
    pub fn new<P: AsRef<Path>>(model_path: P, options: FaceMeshOptions) -> Result<Self> {
        log::info!(
            "Initializing FaceMeshDetector with model: {}",
            model_path.as_ref().display()
        );
        let environment = Arc::new(
            Environment::builder()
                .with_name("face_mesh")
                .with_log_level(ort::LoggingLevel::Warning)
                .build()?,
        );

        let session = ort::SessionBuilder::new(&environment)?
            .with_optimization_level(ort::GraphOptimizationLevel::Level3)?
            .with_model_from_file(model_path)?;

        let input_meta = session
            .inputs
            .first()
            .ok_or_else(|| Error::ModelError("Model has no inputs".to_string()))?;
        if session.outputs.is_empty() {
            return Err(Error::ModelError("Model has no outputs".to_string()));
        }

        // [batch, 3, h, w] or [batch, h, w, 3]
        let dims = &input_meta.dimensions;
        let channels_first = dims.len() == 4 && dimension_to_usize(dims[1]) == Some(3);
        let size_axis = if channels_first { 2 } else { 1 };
        let input_size = dims
            .get(size_axis)
            .copied()
            .and_then(dimension_to_usize)
            .unwrap_or(DEFAULT_MESH_INPUT_SIZE);

        log::debug!(
            "Face mesh input {}x{} ({})",
            input_size,
            input_size,
            if channels_first { "NCHW" } else { "NHWC" }
        );

        if options.max_faces != MAX_TRACKED_FACES {
            log::warn!("Only {} face is tracked; ignoring max_faces={}", MAX_TRACKED_FACES, options.max_faces);
        }

        Ok(Self {
            session,
            input_size,
            channels_first,
            options,
            previous: None,
        })
    }

    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.previous.is_some()
    }

    fn roi(&self, width: u32, height: u32) -> SquareRoi {
        self.previous
            .as_ref()
            .and_then(|face| refine_roi(face.points(), width, height, TRACKING_ROI_EXPANSION))
            .unwrap_or_else(|| SquareRoi::centered(width, height))
    }

    /// Crop, resize and normalize the ROI to `[0, 1]`
    fn preprocess(&self, frame: &RgbImage, roi: SquareRoi) -> Result<Array4<f32>> {
        let size = self.input_size;
        let side = u32::try_from(size).map_err(|_| Error::ModelError(format!("Input size {size} too large")))?;

        let crop = imageops::crop_imm(frame, roi.x, roi.y, roi.size, roi.size).to_image();
        let resized = imageops::resize(&crop, side, side, imageops::FilterType::Triangle);

        let data: Vec<f32> = resized.as_raw().iter().map(|&v| f32::from(v) / 255.0).collect();
        let nhwc = Array4::from_shape_vec((1, size, size, 3), data)
            .map_err(|e| Error::ModelError(format!("Failed to create array: {e}")))?;

        Ok(if self.channels_first {
            nhwc.permuted_axes([0, 3, 1, 2]).as_standard_layout().into_owned()
        } else {
            nhwc
        })
    }

    /// Run forward pass, returning raw landmarks and the face presence score
    fn forward(&self, input: Array4<f32>) -> Result<(Vec<f32>, Option<f32>)> {
        let cow_array = CowArray::from(input.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;

        let outputs = self.session.run(vec![input_tensor])?;

        let mut landmarks = None;
        let mut presence = None;
        for output in outputs {
            let tensor = output.try_extract::<f32>()?;
            let view = tensor.view();
            let values: Vec<f32> = view.iter().copied().collect();
            if values.len() >= FACE_MESH_LANDMARKS * MESH_COORDS && landmarks.is_none() {
                landmarks = Some(values);
            } else if values.len() == 1 && presence.is_none() {
                presence = Some(sigmoid(values[0]));
            }
        }

        let landmarks =
            landmarks.ok_or_else(|| Error::ModelError("No landmark tensor in model output".to_string()))?;
        Ok((landmarks, presence))
    }

    /// Map ROI-pixel landmarks to image-normalized coordinates
    #[allow(clippy::cast_precision_loss)] // Input size is small
    fn postprocess(&self, raw: &[f32], roi: SquareRoi, width: u32, height: u32) -> FaceLandmarks {
        let scale = self.input_size as f32;
        let points = raw
            .chunks_exact(MESH_COORDS)
            .map(|c| roi.to_image(LandmarkPoint::new(c[0] / scale, c[1] / scale, c[2] / scale), width, height))
            .collect();
        FaceLandmarks::new(points)
    }
}

fn sigmoid(logit: f32) -> f32 {
    1.0 / (1.0 + (-logit).exp())
}

impl LandmarkDetector for FaceMeshDetector {
    fn detect(&mut self, frame: &RgbImage, timestamp_ms: u64) -> Result<FaceDetectionResult> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Ok(FaceDetectionResult::empty());
        }

        let tracking = self.is_tracking();
        let roi = self.roi(width, height);
        let input = self.preprocess(frame, roi)?;
        let (raw, presence) = self.forward(input)?;

        let threshold = if tracking {
            self.options.min_tracking_confidence
        } else {
            self.options.min_detection_confidence
        };
        let score = presence.unwrap_or(1.0);
        if score < threshold {
            if tracking {
                log::debug!("Lost face at t={}ms (score {:.2})", timestamp_ms, score);
            }
            self.previous = None;
            return Ok(FaceDetectionResult::empty());
        }

        let face = self.postprocess(&raw, roi, width, height);
        self.previous = Some(face.clone());
        Ok(FaceDetectionResult::single(face))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = FaceMeshOptions::default();
        assert_eq!(options.max_faces, 1);
        assert!((options.min_detection_confidence - 0.5).abs() < f32::EPSILON);
        assert!((options.min_tracking_confidence - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(10.0) > 0.99);
        assert!(sigmoid(-10.0) < 0.01);
    }

    #[test]
    fn test_output_layout() {
        assert_eq!(FACE_MESH_LANDMARKS * MESH_COORDS, 1404);
        assert_eq!(DEFAULT_MESH_INPUT_SIZE, 192);
    }
}
