use crate::{
    camera::CameraIntrinsics,
    constants::{ANGLE_SCALE, NUM_CANONICAL_LANDMARKS, PNP_MAX_ITERATIONS},
    landmarks::{AnthropometricModel, CanonicalLandmark, CanonicalLandmarks},
    Error, Result,
};
use nalgebra::{Matrix2, Matrix3, Point2, Point3, Rotation3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

#[cfg(feature = "opencv")]
mod calib3d;
#[cfg(not(feature = "opencv"))]
mod levenberg;

#[cfg(feature = "opencv")]
use calib3d as backend;
#[cfg(not(feature = "opencv"))]
use levenberg as backend;

/// Minimum pixel variance of the observations (px²)
const MIN_OBSERVATION_SPREAD: f64 = 1e-6;

/// Ratio of minor to major observation variance below which points count as collinear
const COLLINEARITY_TOLERANCE: f64 = 1e-6;

/// Head orientation streamed to clients
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseEstimate {
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
}

impl PoseEstimate {
    #[must_use]
    pub const fn new(pitch: f64, yaw: f64, roll: f64) -> Self {
        Self { pitch, yaw, roll }
    }
}

/// Pitch and yaw recovered from the PnP rotation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orientation {
    pub pitch: f64,
    pub yaw: f64,
}

/// Result of one solver invocation.
///
/// Roll comes from eye geometry and is always available; pitch and yaw
/// depend on the PnP solve and may fail on their own.
#[derive(Debug)]
pub struct PoseOutcome {
    pub roll: f64,
    pub orientation: Result<Orientation>,
}

impl PoseOutcome {
    #[must_use]
    pub fn is_solved(&self) -> bool {
        self.orientation.is_ok()
    }

    /// Apply the hold-last policy: a failed solve keeps the previous pitch and yaw
    /// while roll still updates.
    #[must_use]
    pub fn resolve(&self, previous: &PoseEstimate) -> PoseEstimate {
        match &self.orientation {
            Ok(orientation) => PoseEstimate::new(orientation.pitch, orientation.yaw, self.roll),
            Err(_) => PoseEstimate::new(previous.pitch, previous.yaw, self.roll),
        }
    }
}

/// Camera-relative rigid transform of the head model
#[derive(Debug, Clone, Copy)]
pub struct PnpSolution {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
    /// RMS reprojection error in pixels
    pub reprojection_error: f64,
    /// Residual evaluations spent by the solver
    pub evaluations: usize,
}

impl PnpSolution {
    /// Rodrigues rotation vector
    #[must_use]
    pub fn rotation_vector(&self) -> Vector3<f64> {
        self.rotation.scaled_axis()
    }

    /// Decomposition angles in degrees about x, y and z
    #[must_use]
    pub fn euler_angles(&self) -> Vector3<f64> {
        rq_decompose(self.rotation.matrix())
    }

    /// Pitch/yaw in the streamed scale (decomposition degrees × 360)
    #[must_use]
    pub fn orientation(&self) -> Orientation {
        let angles = self.euler_angles();
        Orientation {
            pitch: angles.x * ANGLE_SCALE,
            yaw: angles.y * ANGLE_SCALE,
        }
    }
}

/// Head pose estimator using the `PnP` algorithm on six canonical landmarks
#[derive(Debug, Clone)]
pub struct PoseSolver {
    model: AnthropometricModel,
    max_iterations: usize,
}

impl Default for PoseSolver {
    fn default() -> Self {
        Self::new(AnthropometricModel::default())
    }
}

impl PoseSolver {
    #[must_use]
    pub fn new(model: AnthropometricModel) -> Self {
        log::debug!("Initializing PoseSolver with {} model points", model.points().len());
        Self {
            model,
            max_iterations: PNP_MAX_ITERATIONS,
        }
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    #[must_use]
    pub fn model(&self) -> &AnthropometricModel {
        &self.model
    }

    /// Estimate pitch, yaw and roll for a face in a `width`×`height` frame
    #[must_use]
    pub fn estimate(&self, landmarks: &CanonicalLandmarks, width: u32, height: u32) -> PoseOutcome {
        let intrinsics = CameraIntrinsics::from_dimensions(width, height);
        let pixels = landmarks.pixel_points(width, height);

        let roll = roll_from_eyes(
            &pixels[CanonicalLandmark::LeftEyeOuter.slot()],
            &pixels[CanonicalLandmark::RightEyeOuter.slot()],
        );
        let orientation = self.solve(&pixels, &intrinsics).map(|solution| solution.orientation());

        PoseOutcome { roll, orientation }
    }

    /// Solve the model-to-pixel correspondence for rotation and translation
    ///
    /// # Errors
    ///
    /// Returns an error if the observations are degenerate or no pose converged.
    pub fn solve(&self, observations: &[Point2<f64>], intrinsics: &CameraIntrinsics) -> Result<PnpSolution> {
        solve_pnp(self.model.points(), observations, intrinsics, self.max_iterations)
    }
}

/// Roll in degrees from the outer eye corners, in pixel coordinates.
///
/// Image y grows downward, so a right eye above the left one gives a negative angle.
#[must_use]
pub fn roll_from_eyes(left_eye: &Point2<f64>, right_eye: &Point2<f64>) -> f64 {
    let delta_y = right_eye.y - left_eye.y;
    let delta_x = right_eye.x - left_eye.x;
    delta_y.atan2(delta_x).to_degrees()
}

/// Solve Perspective-n-Point with zero lens distortion.
///
/// With the `opencv` feature this is `cv::solvePnP` (`SOLVEPNP_ITERATIVE`).
/// Otherwise a DLT estimate and a frontal weak-perspective estimate both seed
/// a Levenberg-Marquardt refinement of the pixel reprojection error; the
/// lowest-error pose with every point in front of the camera wins.
///
/// # Errors
///
/// Returns an error if:
/// - The point counts differ or fewer than six points are given
/// - Any coordinate is not finite
/// - The observations are coincident or collinear
/// - No seed converges to a valid pose
pub fn solve_pnp(
    object_points: &[Point3<f64>],
    image_points: &[Point2<f64>],
    intrinsics: &CameraIntrinsics,
    max_iterations: usize,
) -> Result<PnpSolution> {
    if object_points.len() != image_points.len() {
        return Err(Error::PoseSolve(format!(
            "{} model points but {} observations",
            object_points.len(),
            image_points.len()
        )));
    }
    if object_points.len() < NUM_CANONICAL_LANDMARKS {
        return Err(Error::PoseSolve(format!(
            "Expected at least {} correspondences, got {}",
            NUM_CANONICAL_LANDMARKS,
            object_points.len()
        )));
    }
    let finite = object_points.iter().all(|p| p.coords.iter().all(|v| v.is_finite()))
        && image_points.iter().all(|p| p.x.is_finite() && p.y.is_finite());
    if !finite {
        return Err(Error::PoseSolve("Non-finite correspondence".to_string()));
    }
    check_observation_spread(image_points)?;

    backend::solve(object_points, image_points, intrinsics, max_iterations)
}

/// Reject observation sets that cannot constrain a rotation
fn check_observation_spread(image_points: &[Point2<f64>]) -> Result<()> {
    #[allow(clippy::cast_precision_loss)]
    let n = image_points.len() as f64;
    let centroid = image_points.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n;

    let mut covariance = Matrix2::zeros();
    for p in image_points {
        let d = p.coords - centroid;
        covariance += d * d.transpose();
    }
    covariance /= n;

    let eigenvalues = covariance.symmetric_eigenvalues();
    let major = eigenvalues[0].max(eigenvalues[1]);
    let minor = eigenvalues[0].min(eigenvalues[1]);

    if major <= MIN_OBSERVATION_SPREAD {
        return Err(Error::PoseSolve("Observations are coincident".to_string()));
    }
    if minor <= COLLINEARITY_TOLERANCE * major {
        return Err(Error::PoseSolve("Observations are collinear".to_string()));
    }
    Ok(())
}

/// Package a pose from either backend.
///
/// `None` if it is not finite or any model point lands behind the camera.
fn assemble(
    object_points: &[Point3<f64>],
    image_points: &[Point2<f64>],
    intrinsics: &CameraIntrinsics,
    rotation: Rotation3<f64>,
    translation: Vector3<f64>,
    evaluations: usize,
) -> Option<PnpSolution> {
    if rotation.matrix().iter().chain(translation.iter()).any(|v| !v.is_finite()) {
        return None;
    }

    let mut cost = 0.0;
    for (point, observed) in object_points.iter().zip(image_points) {
        let projected = intrinsics.project(&(rotation.transform_point(point) + translation))?;
        cost += (projected - *observed).norm_squared();
    }
    #[allow(clippy::cast_precision_loss)]
    let reprojection_error = (cost / object_points.len() as f64).sqrt();

    Some(PnpSolution {
        rotation,
        translation,
        reprojection_error,
        evaluations,
    })
}

/// Rotation angles in degrees about x, y and z, in the `RQDecomp3x3` convention.
///
/// `matrix` must be a rotation. For `R = Rz(ψ)·Ry(φ)·Rx(θ)` with `|φ| < 90°`
/// the result is `(θ, φ, ψ)`.
#[must_use]
pub fn rq_decompose(matrix: &Matrix3<f64>) -> Vector3<f64> {
    #[cfg(feature = "opencv")]
    let angles = calib3d::rq_decompose(matrix).unwrap_or_else(|e| {
        log::warn!("RQDecomp3x3 failed, using Euler extraction: {}", e);
        euler_degrees(matrix)
    });
    #[cfg(not(feature = "opencv"))]
    let angles = euler_degrees(matrix);
    angles
}

fn euler_degrees(matrix: &Matrix3<f64>) -> Vector3<f64> {
    let (x, y, z) = Rotation3::from_matrix_unchecked(*matrix).euler_angles();
    Vector3::new(x.to_degrees(), y.to_degrees(), z.to_degrees())
}
