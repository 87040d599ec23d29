//! Utility functions for region-of-interest handling and safe conversions.

#[cfg(feature = "camera")]
pub mod image_conversion;
pub mod safe_cast;

use crate::landmarks::LandmarkPoint;
use safe_cast::f32_to_u32_clamp;

/// Square image region in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SquareRoi {
    pub x: u32,
    pub y: u32,
    pub size: u32,
}

impl SquareRoi {
    /// Largest square centred in a `width`×`height` image
    #[must_use]
    pub fn centered(width: u32, height: u32) -> Self {
        let size = width.min(height);
        Self {
            x: (width - size) / 2,
            y: (height - size) / 2,
            size,
        }
    }

    /// Map a point normalized to this ROI back to image-normalized coordinates
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Pixel dimensions fit in f32
    pub fn to_image(&self, point: LandmarkPoint, width: u32, height: u32) -> LandmarkPoint {
        let size = self.size as f32;
        LandmarkPoint::new(
            (self.x as f32 + point.x * size) / width as f32,
            (self.y as f32 + point.y * size) / height as f32,
            point.z,
        )
    }
}

/// Square ROI around normalized landmarks, expanded by `shift` of its side on
/// every edge and kept inside the image.
///
/// Returns `None` if the landmarks are empty or collapse to a point.
#[must_use]
#[allow(clippy::cast_precision_loss)] // Precision loss acceptable for box dimensions
pub fn refine_roi(points: &[LandmarkPoint], width: u32, height: u32, shift: f32) -> Option<SquareRoi> {
    if points.is_empty() || width == 0 || height == 0 {
        return None;
    }
    let (w, h) = (width as f32, height as f32);

    let (mut min_x, mut min_y, mut max_x, mut max_y) = (f32::MAX, f32::MAX, f32::MIN, f32::MIN);
    for p in points {
        min_x = min_x.min(p.x * w);
        min_y = min_y.min(p.y * h);
        max_x = max_x.max(p.x * w);
        max_y = max_y.max(p.y * h);
    }

    // Make it square, then expand
    let side = (max_x - min_x).max(max_y - min_y);
    if !side.is_finite() || side < 1.0 {
        return None;
    }
    let side = side * (1.0 + 2.0 * shift);
    let center_x = (min_x + max_x) / 2.0;
    let center_y = (min_y + max_y) / 2.0;

    // Ensure it doesn't exceed image boundaries
    let size = f32_to_u32_clamp(side, 1, width.min(height));
    let x = f32_to_u32_clamp(center_x - size as f32 / 2.0, 0, width - size);
    let y = f32_to_u32_clamp(center_y - size as f32 / 2.0, 0, height - size);

    Some(SquareRoi { x, y, size })
}
