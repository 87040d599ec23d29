//! Pure-Rust PnP backend: DLT and frontal seeds refined by `levenberg-marquardt`.

use super::{assemble, PnpSolution};
use crate::{camera::CameraIntrinsics, constants::EPSILON, Error, Result};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{
    storage::Owned, DMatrix, DVector, Dyn, Matrix3, Matrix3x4, Matrix4, OMatrix, Point2, Point3, Rotation3,
    SymmetricEigen, Vector3, Vector6, U6,
};

/// Relative step used for the finite-difference Jacobian
const JACOBIAN_STEP: f64 = 1e-6;

/// Residual (px) reported for a model point that falls behind the camera
const BEHIND_CAMERA_PENALTY: f64 = 1e6;

/// Relative cost and step tolerances handed to the solver
const COST_TOLERANCE: f64 = 1e-14;
const STEP_TOLERANCE: f64 = 1e-12;

/// The DLT null space must be one-dimensional
const DLT_RANK_TOLERANCE: f64 = 1e-12;

/// Refine every available seed and keep the lowest reprojection error
pub(super) fn solve(
    object_points: &[Point3<f64>],
    image_points: &[Point2<f64>],
    intrinsics: &CameraIntrinsics,
    max_iterations: usize,
) -> Result<PnpSolution> {
    let seeds = [
        dlt_seed(object_points, image_points, intrinsics),
        frontal_seed(object_points, image_points, intrinsics),
    ];

    seeds
        .into_iter()
        .flatten()
        .filter_map(|seed| refine(object_points, image_points, intrinsics, seed, max_iterations))
        .min_by(|a, b| a.reprojection_error.total_cmp(&b.reprojection_error))
        .ok_or_else(|| Error::PoseSolve("No estimate converged to a pose in front of the camera".to_string()))
}

/// Direct linear transform on Hartley-normalized model points.
///
/// Returns `[rotation vector, translation]`, or `None` when the
/// projection matrix is not uniquely determined.
fn dlt_seed(
    object_points: &[Point3<f64>],
    image_points: &[Point2<f64>],
    intrinsics: &CameraIntrinsics,
) -> Option<Vector6<f64>> {
    let n = object_points.len();
    #[allow(clippy::cast_precision_loss)]
    let count = n as f64;

    let centroid = object_points.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / count;
    let mean_distance = object_points.iter().map(|p| (p.coords - centroid).norm()).sum::<f64>() / count;
    if mean_distance <= EPSILON {
        return None;
    }
    let scale = 3.0_f64.sqrt() / mean_distance;

    let mut design = DMatrix::<f64>::zeros(2 * n, 12);
    for (i, (point, pixel)) in object_points.iter().zip(image_points).enumerate() {
        let x = (point.coords - centroid) * scale;
        let uv = intrinsics.normalize(pixel);
        let (r0, r1) = (2 * i, 2 * i + 1);
        for k in 0..3 {
            design[(r0, k)] = x[k];
            design[(r0, 8 + k)] = -uv.x * x[k];
            design[(r1, 4 + k)] = x[k];
            design[(r1, 8 + k)] = -uv.y * x[k];
        }
        design[(r0, 3)] = 1.0;
        design[(r0, 11)] = -uv.x;
        design[(r1, 7)] = 1.0;
        design[(r1, 11)] = -uv.y;
    }

    let eigen = SymmetricEigen::new(design.transpose() * &design);
    let mut order: Vec<usize> = (0..eigen.eigenvalues.len()).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));

    let largest = eigen.eigenvalues[*order.last()?];
    if largest <= 0.0 || eigen.eigenvalues[order[1]] <= DLT_RANK_TOLERANCE * largest {
        return None;
    }

    let null_vector = eigen.eigenvectors.column(order[0]);
    let normalized = Matrix3x4::from_fn(|r, c| null_vector[r * 4 + c]);
    #[rustfmt::skip]
    let denormalize = Matrix4::new(
        scale, 0.0, 0.0, -scale * centroid.x,
        0.0, scale, 0.0, -scale * centroid.y,
        0.0, 0.0, scale, -scale * centroid.z,
        0.0, 0.0, 0.0, 1.0,
    );
    let mut projection = normalized * denormalize;

    // P is only known up to scale; pick the sign that gives a proper rotation
    let mut left: Matrix3<f64> = projection.fixed_view::<3, 3>(0, 0).into_owned();
    if left.determinant() < 0.0 {
        projection = -projection;
        left = -left;
    }

    let svd = left.svd(true, true);
    let rotation = svd.u? * svd.v_t?;
    if rotation.determinant() <= 0.0 {
        return None;
    }
    let projective_scale = svd.singular_values.sum() / 3.0;
    if projective_scale <= EPSILON {
        return None;
    }
    let translation: Vector3<f64> = projection.column(3).into_owned() / projective_scale;
    let rotation_vector = Rotation3::from_matrix_unchecked(rotation).scaled_axis();

    Some(pack(&rotation_vector, &translation))
}

/// Frontal pose at the depth where the model's spread matches the observed spread
fn frontal_seed(
    object_points: &[Point3<f64>],
    image_points: &[Point2<f64>],
    intrinsics: &CameraIntrinsics,
) -> Option<Vector6<f64>> {
    #[allow(clippy::cast_precision_loss)]
    let count = object_points.len() as f64;

    let object_centroid = object_points.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / count;
    let (image_cx, image_cy) = image_points
        .iter()
        .fold((0.0, 0.0), |(x, y), p| (x + p.x / count, y + p.y / count));

    let object_spread = (object_points
        .iter()
        .map(|p| (p.x - object_centroid.x).powi(2) + (p.y - object_centroid.y).powi(2))
        .sum::<f64>()
        / count)
        .sqrt();
    let image_spread = (image_points
        .iter()
        .map(|p| (p.x - image_cx).powi(2) + (p.y - image_cy).powi(2))
        .sum::<f64>()
        / count)
        .sqrt();
    if image_spread <= EPSILON || object_spread <= EPSILON {
        return None;
    }

    let depth = intrinsics.focal_length * object_spread / image_spread;
    let ray = intrinsics.normalize(&Point2::new(image_cx, image_cy));
    let translation = Vector3::new(ray.x * depth, ray.y * depth, depth) - object_centroid;

    Some(pack(&Vector3::zeros(), &translation))
}

fn pack(rotation_vector: &Vector3<f64>, translation: &Vector3<f64>) -> Vector6<f64> {
    Vector6::new(
        rotation_vector.x,
        rotation_vector.y,
        rotation_vector.z,
        translation.x,
        translation.y,
        translation.z,
    )
}

fn unpack(params: &Vector6<f64>) -> (Rotation3<f64>, Vector3<f64>) {
    let rotation = Rotation3::from_scaled_axis(Vector3::new(params[0], params[1], params[2]));
    let translation = Vector3::new(params[3], params[4], params[5]);
    (rotation, translation)
}

/// Pixel residuals `[du0, dv0, du1, dv1, ...]`
fn residuals(
    object_points: &[Point3<f64>],
    image_points: &[Point2<f64>],
    intrinsics: &CameraIntrinsics,
    params: &Vector6<f64>,
) -> DVector<f64> {
    let (rotation, translation) = unpack(params);
    let mut out = DVector::zeros(2 * object_points.len());
    for (i, (point, observed)) in object_points.iter().zip(image_points).enumerate() {
        let camera_point = rotation.transform_point(point) + translation;
        let (du, dv) = match intrinsics.project(&camera_point) {
            Some(projected) => (projected.x - observed.x, projected.y - observed.y),
            None => (BEHIND_CAMERA_PENALTY, BEHIND_CAMERA_PENALTY),
        };
        out[2 * i] = du;
        out[2 * i + 1] = dv;
    }
    out
}

/// Reprojection least squares over `[rotation vector, translation]`
struct ReprojectionProblem<'a> {
    object_points: &'a [Point3<f64>],
    image_points: &'a [Point2<f64>],
    intrinsics: &'a CameraIntrinsics,
    params: Vector6<f64>,
}

impl LeastSquaresProblem<f64, Dyn, U6> for ReprojectionProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, U6>;
    type ParameterStorage = Owned<f64, U6>;

    fn set_params(&mut self, params: &Vector6<f64>) {
        self.params = *params;
    }

    fn params(&self) -> Vector6<f64> {
        self.params
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(residuals(self.object_points, self.image_points, self.intrinsics, &self.params))
    }

    /// Central differences, one column per parameter
    fn jacobian(&self) -> Option<OMatrix<f64, Dyn, U6>> {
        let mut jacobian = OMatrix::<f64, Dyn, U6>::zeros(2 * self.object_points.len());
        for k in 0..6 {
            let step = JACOBIAN_STEP * self.params[k].abs().max(1.0);
            let mut plus = self.params;
            plus[k] += step;
            let mut minus = self.params;
            minus[k] -= step;

            let forward = residuals(self.object_points, self.image_points, self.intrinsics, &plus);
            let backward = residuals(self.object_points, self.image_points, self.intrinsics, &minus);
            jacobian.set_column(k, &((forward - backward) / (2.0 * step)));
        }
        Some(jacobian)
    }
}

/// Levenberg-Marquardt refinement from one seed
fn refine(
    object_points: &[Point3<f64>],
    image_points: &[Point2<f64>],
    intrinsics: &CameraIntrinsics,
    seed: Vector6<f64>,
    max_iterations: usize,
) -> Option<PnpSolution> {
    let problem = ReprojectionProblem {
        object_points,
        image_points,
        intrinsics,
        params: seed,
    };
    let (problem, report) = LevenbergMarquardt::new()
        .with_ftol(COST_TOLERANCE)
        .with_xtol(STEP_TOLERANCE)
        .with_patience(max_iterations)
        .minimize(problem);
    if !report.termination.was_successful() {
        log::trace!("Refinement stopped: {:?}", report.termination);
    }

    let (rotation, translation) = unpack(&problem.params);
    assemble(object_points, image_points, intrinsics, rotation, translation, report.number_of_evaluations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::AnthropometricModel;

    fn observe(rotation: &Rotation3<f64>, translation: &Vector3<f64>, intrinsics: &CameraIntrinsics) -> Vec<Point2<f64>> {
        AnthropometricModel::default()
            .points()
            .iter()
            .map(|p| intrinsics.project(&(rotation.transform_point(p) + translation)).unwrap())
            .collect()
    }

    #[test]
    fn test_refine_converges_from_frontal_seed() {
        let intrinsics = CameraIntrinsics::from_dimensions(640, 480);
        let rotation = Rotation3::from_euler_angles(0.15, -0.2, 0.05);
        let translation = Vector3::new(20.0, 10.0, 1600.0);
        let model = AnthropometricModel::default();
        let observations = observe(&rotation, &translation, &intrinsics);

        let seed = frontal_seed(model.points(), &observations, &intrinsics).unwrap();
        let solution = refine(model.points(), &observations, &intrinsics, seed, 200).unwrap();
        assert!(solution.reprojection_error < 1e-3, "rms {}", solution.reprojection_error);
        assert!(solution.rotation.angle_to(&rotation) < 1e-5);
        assert!(solution.evaluations > 0);
    }

    #[test]
    fn test_points_behind_camera_are_penalized() {
        let intrinsics = CameraIntrinsics::from_dimensions(640, 480);
        let model = AnthropometricModel::default();
        let observations = observe(&Rotation3::identity(), &Vector3::new(0.0, 0.0, 1500.0), &intrinsics);

        let behind = pack(&Vector3::zeros(), &Vector3::new(0.0, 0.0, -1500.0));
        let r = residuals(model.points(), &observations, &intrinsics, &behind);
        assert!(r.iter().all(|v| (*v - BEHIND_CAMERA_PENALTY).abs() < f64::EPSILON));
    }
}
