//! Pinhole camera intrinsics derived from the image size alone.

use crate::constants::{CAMERA_CENTER_FACTOR, DISTORTION_COEFFICIENTS};
use nalgebra::{Matrix3, Point2, Point3};

/// Uncalibrated camera model: focal length equals the image width and the
/// principal point sits at the image center. Lens distortion is assumed zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    /// Focal length in pixels (same for both axes)
    pub focal_length: f64,
    /// Principal point in pixels
    pub principal_point: Point2<f64>,
    /// Image width the intrinsics were derived from
    pub width: u32,
    /// Image height the intrinsics were derived from
    pub height: u32,
}

impl CameraIntrinsics {
    /// Build intrinsics for an image of the given size.
    ///
    /// Called once per frame so that variable-resolution sources stay correct.
    /// Both dimensions must be non-zero.
    #[must_use]
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        debug_assert!(width > 0 && height > 0, "image dimensions must be positive");

        let focal_length = f64::from(width);
        let principal_point = Point2::new(
            f64::from(width) / CAMERA_CENTER_FACTOR,
            f64::from(height) / CAMERA_CENTER_FACTOR,
        );

        Self {
            focal_length,
            principal_point,
            width,
            height,
        }
    }

    /// 3×3 intrinsic matrix `K`
    #[must_use]
    pub fn matrix(&self) -> Matrix3<f64> {
        let f = self.focal_length;
        let c = self.principal_point;
        Matrix3::new(f, 0.0, c.x, 0.0, f, c.y, 0.0, 0.0, 1.0)
    }

    /// Distortion coefficients `(k1, k2, p1, p2)`, always zero
    #[must_use]
    pub fn distortion(&self) -> [f64; DISTORTION_COEFFICIENTS] {
        [0.0; DISTORTION_COEFFICIENTS]
    }

    /// Project a camera-space point to pixel coordinates.
    ///
    /// Returns `None` for points on or behind the image plane.
    #[must_use]
    pub fn project(&self, point: &Point3<f64>) -> Option<Point2<f64>> {
        if point.z <= f64::EPSILON {
            return None;
        }
        Some(Point2::new(
            self.focal_length * point.x / point.z + self.principal_point.x,
            self.focal_length * point.y / point.z + self.principal_point.y,
        ))
    }

    /// Map a pixel to normalized image coordinates (`K⁻¹ · [u v 1]ᵀ`)
    #[must_use]
    pub fn normalize(&self, pixel: &Point2<f64>) -> Point2<f64> {
        Point2::new(
            (pixel.x - self.principal_point.x) / self.focal_length,
            (pixel.y - self.principal_point.y) / self.focal_length,
        )
    }
}
