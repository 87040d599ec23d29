//! Face landmark types and the six-point correspondence used for pose solving.

use crate::{
    constants::{ANTHROPOMETRIC_MODEL_POINTS, CANONICAL_LANDMARK_INDICES, NUM_CANONICAL_LANDMARKS},
    Error, Result,
};
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

/// A detector-produced landmark: x/y normalized to the image size, z a relative depth
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkPoint {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl LandmarkPoint {
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Pixel coordinates in an image of the given size
    #[must_use]
    pub fn to_pixel(&self, width: u32, height: u32) -> Point2<f64> {
        Point2::new(
            f64::from(self.x) * f64::from(width),
            f64::from(self.y) * f64::from(height),
        )
    }
}

/// Ordered landmarks of one detected face
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceLandmarks(pub Vec<LandmarkPoint>);

impl FaceLandmarks {
    #[must_use]
    pub fn new(points: Vec<LandmarkPoint>) -> Self {
        Self(points)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&LandmarkPoint> {
        self.0.get(index)
    }

    #[must_use]
    pub fn points(&self) -> &[LandmarkPoint] {
        &self.0
    }
}

/// Output of one detector invocation: zero or more faces
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceDetectionResult {
    pub faces: Vec<FaceLandmarks>,
}

impl FaceDetectionResult {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn single(face: FaceLandmarks) -> Self {
        Self { faces: vec![face] }
    }

    /// The only face the pipeline consumes
    #[must_use]
    pub fn first_face(&self) -> Option<&FaceLandmarks> {
        self.faces.first()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }
}

/// The six canonical facial landmarks, in anthropometric model order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalLandmark {
    NoseTip,
    Chin,
    LeftEyeOuter,
    RightEyeOuter,
    LeftMouth,
    RightMouth,
}

impl CanonicalLandmark {
    pub const ALL: [Self; NUM_CANONICAL_LANDMARKS] = [
        Self::NoseTip,
        Self::Chin,
        Self::LeftEyeOuter,
        Self::RightEyeOuter,
        Self::LeftMouth,
        Self::RightMouth,
    ];

    /// Position in the canonical ordering
    #[must_use]
    pub const fn slot(self) -> usize {
        self as usize
    }

    /// Index of this landmark in the detector's mesh
    #[must_use]
    pub const fn mesh_index(self) -> usize {
        CANONICAL_LANDMARK_INDICES[self as usize]
    }
}

/// The six landmarks picked out of a full face mesh
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanonicalLandmarks {
    points: [LandmarkPoint; NUM_CANONICAL_LANDMARKS],
}

impl CanonicalLandmarks {
    /// Project a full face mesh onto the canonical six points.
    ///
    /// # Errors
    ///
    /// Returns an error if the face has fewer landmarks than the highest
    /// canonical index requires, or if a canonical point has a non-finite
    /// x or y coordinate.
    pub fn extract(face: &FaceLandmarks) -> Result<Self> {
        let mut points = [LandmarkPoint::default(); NUM_CANONICAL_LANDMARKS];
        for landmark in CanonicalLandmark::ALL {
            let index = landmark.mesh_index();
            let point = *face.get(index).ok_or_else(|| {
                Error::InvalidInput(format!(
                    "Landmark {index} ({landmark:?}) missing from a face with {} points",
                    face.len()
                ))
            })?;
            if !(point.x.is_finite() && point.y.is_finite()) {
                return Err(Error::InvalidInput(format!(
                    "Landmark {index} ({landmark:?}) has non-finite coordinates ({}, {})",
                    point.x, point.y
                )));
            }
            points[landmark.slot()] = point;
        }
        Ok(Self { points })
    }

    #[must_use]
    pub const fn from_points(points: [LandmarkPoint; NUM_CANONICAL_LANDMARKS]) -> Self {
        Self { points }
    }

    #[must_use]
    pub fn get(&self, landmark: CanonicalLandmark) -> LandmarkPoint {
        self.points[landmark.slot()]
    }

    #[must_use]
    pub fn points(&self) -> &[LandmarkPoint; NUM_CANONICAL_LANDMARKS] {
        &self.points
    }

    /// All six points in pixel coordinates
    #[must_use]
    pub fn pixel_points(&self, width: u32, height: u32) -> [Point2<f64>; NUM_CANONICAL_LANDMARKS] {
        self.points.map(|p| p.to_pixel(width, height))
    }
}

/// Subject-independent 3D head model matching [`CanonicalLandmark`] order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnthropometricModel {
    points: [Point3<f64>; NUM_CANONICAL_LANDMARKS],
}

impl Default for AnthropometricModel {
    fn default() -> Self {
        Self {
            points: ANTHROPOMETRIC_MODEL_POINTS.map(|[x, y, z]| Point3::new(x, y, z)),
        }
    }
}

impl AnthropometricModel {
    #[must_use]
    pub const fn new(points: [Point3<f64>; NUM_CANONICAL_LANDMARKS]) -> Self {
        Self { points }
    }

    #[must_use]
    pub fn points(&self) -> &[Point3<f64>; NUM_CANONICAL_LANDMARKS] {
        &self.points
    }

    #[must_use]
    pub fn get(&self, landmark: CanonicalLandmark) -> Point3<f64> {
        self.points[landmark.slot()]
    }
}
