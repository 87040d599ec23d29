//! `OpenCV` PnP backend: `solvePnP`, `solvePnPRefineLM` and `RQDecomp3x3` from calib3d.

use super::{assemble, PnpSolution};
use crate::{camera::CameraIntrinsics, Error, Result};
use nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector3};
use opencv::{
    calib3d,
    core::{Mat, TermCriteria, TermCriteria_Type},
    prelude::*,
};

/// Solve with `SOLVEPNP_ITERATIVE`, then polish with at most `max_iterations` LM steps
pub(super) fn solve(
    object_points: &[Point3<f64>],
    image_points: &[Point2<f64>],
    intrinsics: &CameraIntrinsics,
    max_iterations: usize,
) -> Result<PnpSolution> {
    let object = Mat::from_slice_2d(&object_points.iter().map(|p| [p.x, p.y, p.z]).collect::<Vec<_>>())?;
    let image = Mat::from_slice_2d(&image_points.iter().map(|p| [p.x, p.y]).collect::<Vec<_>>())?;
    let camera_matrix = to_mat(&intrinsics.matrix())?;
    let dist_coeffs = Mat::from_slice_2d(&[intrinsics.distortion()])?;

    let mut rvec = Mat::default();
    let mut tvec = Mat::default();
    let converged = calib3d::solve_pnp(
        &object,
        &image,
        &camera_matrix,
        &dist_coeffs,
        &mut rvec,
        &mut tvec,
        false,
        calib3d::SOLVEPNP_ITERATIVE,
    )?;
    if !converged {
        return Err(Error::PoseSolve("solvePnP did not converge".to_string()));
    }

    let criteria = TermCriteria::new(
        TermCriteria_Type::COUNT as i32 + TermCriteria_Type::EPS as i32,
        i32::try_from(max_iterations).unwrap_or(i32::MAX),
        f64::EPSILON,
    )?;
    calib3d::solve_pnp_refine_lm(&object, &image, &camera_matrix, &dist_coeffs, &mut rvec, &mut tvec, criteria)?;

    let mut rotation_matrix = Mat::default();
    calib3d::rodrigues(&rvec, &mut rotation_matrix, &mut Mat::default())?;

    let rotation = Rotation3::from_matrix_unchecked(from_mat(&rotation_matrix)?);
    let translation = Vector3::new(
        *tvec.at_2d::<f64>(0, 0)?,
        *tvec.at_2d::<f64>(1, 0)?,
        *tvec.at_2d::<f64>(2, 0)?,
    );

    assemble(object_points, image_points, intrinsics, rotation, translation, max_iterations)
        .ok_or_else(|| Error::PoseSolve("solvePnP placed the model behind the camera".to_string()))
}

/// Angles in degrees from `cv::RQDecomp3x3`
pub(super) fn rq_decompose(matrix: &Matrix3<f64>) -> Result<Vector3<f64>> {
    let src = to_mat(matrix)?;
    let mut upper = Mat::default();
    let mut orthogonal = Mat::default();
    let angles = calib3d::rq_decomp3x3(
        &src,
        &mut upper,
        &mut orthogonal,
        &mut Mat::default(),
        &mut Mat::default(),
        &mut Mat::default(),
    )?;
    let [x, y, z] = angles.0;
    Ok(Vector3::new(x, y, z))
}

fn to_mat(matrix: &Matrix3<f64>) -> Result<Mat> {
    let rows: Vec<[f64; 3]> = (0..3).map(|r| [matrix[(r, 0)], matrix[(r, 1)], matrix[(r, 2)]]).collect();
    Ok(Mat::from_slice_2d(&rows)?)
}

fn from_mat(mat: &Mat) -> Result<Matrix3<f64>> {
    let mut matrix = Matrix3::zeros();
    for r in 0..3 {
        for c in 0..3 {
            #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
            let value = *mat.at_2d::<f64>(r as i32, c as i32)?;
            matrix[(r, c)] = value;
        }
    }
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rq_matches_euler_extraction() {
        let rotation = Rotation3::from_euler_angles(0.2_f64, -0.35, 0.1);
        let angles = rq_decompose(rotation.matrix()).unwrap();
        let (x, y, z) = rotation.euler_angles();
        assert!((angles - Vector3::new(x, y, z).map(f64::to_degrees)).norm() < 1e-6);
    }

    #[test]
    fn test_mat_round_trip_keeps_layout() {
        let matrix = Matrix3::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0);
        assert_eq!(from_mat(&to_mat(&matrix).unwrap()).unwrap(), matrix);
    }
}
