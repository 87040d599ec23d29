//! Conversion of captured OpenCV `Mat` frames into `image::RgbImage`.

use crate::{
    utils::safe_cast::i32_to_u32,
    Error, Result,
};
use image::RgbImage;
use opencv::core::{Mat, MatTraitConst, Vec3b};
use opencv::imgproc;

/// Convert a BGR `CV_8UC3` Mat into an RGB image
///
/// # Errors
///
/// * Returns error if Mat dimensions are invalid or it is not 3-channel
/// * Returns error if colour conversion fails
pub fn bgr_mat_to_rgb_image(mat: &Mat) -> Result<RgbImage> {
    let rows = mat.rows();
    let cols = mat.cols();
    let channels = mat.channels();

    if rows <= 0 || cols <= 0 || channels != 3 {
        return Err(Error::InvalidInput(format!(
            "Invalid Mat dimensions: {}x{}x{}",
            rows, cols, channels
        )));
    }

    let mut rgb = Mat::default();
    imgproc::cvt_color(mat, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

    let width = i32_to_u32(cols)?;
    let height = i32_to_u32(rows)?;

    // Continuous Mats can be copied in one go
    let data = if rgb.is_continuous() {
        rgb.data_bytes()?.to_vec()
    } else {
        let mut data = Vec::with_capacity(rgb.total() * 3);
        for row in 0..rows {
            for col in 0..cols {
                let pixel = rgb.at_2d::<Vec3b>(row, col)?;
                data.extend_from_slice(&[pixel[0], pixel[1], pixel[2]]);
            }
        }
        data
    };

    RgbImage::from_raw(width, height, data)
        .ok_or_else(|| Error::InvalidInput(format!("Mat buffer does not match {width}x{height} RGB")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC3};

    #[test]
    fn test_bgr_mat_to_rgb_image() {
        let mat = Mat::new_rows_cols_with_default(2, 3, CV_8UC3, Scalar::new(10.0, 20.0, 30.0, 0.0)).unwrap();

        let image = bgr_mat_to_rgb_image(&mat).unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(0, 0).0, [30, 20, 10]);
    }

    #[test]
    fn test_rejects_empty_mat() {
        assert!(bgr_mat_to_rgb_image(&Mat::default()).is_err());
    }
}
