//! Safe casting utilities for pixel dimensions and model tensor shapes

use crate::{Error, Result};

/// Convert a signed dimension (OpenCV rows/cols) to u32
///
/// # Errors
///
/// Returns an error if the value is negative
pub fn i32_to_u32(value: i32) -> Result<u32> {
    value
        .try_into()
        .map_err(|_| Error::InvalidInput(format!("Negative dimension {value}")))
}

/// Convert a model tensor dimension to usize, treating unknown or invalid sizes as `None`
#[must_use]
pub fn dimension_to_usize<T: TryInto<usize>>(value: Option<T>) -> Option<usize> {
    value.and_then(|v| v.try_into().ok()).filter(|&v| v > 0)
}

/// Clamp and convert f32 to u32 for pixel coordinates
#[must_use]
#[allow(clippy::cast_precision_loss)] // Acceptable for clamping bounds
#[allow(clippy::cast_possible_truncation)] // Clamping ensures safe truncation
#[allow(clippy::cast_sign_loss)] // Clamped to a non-negative range
pub fn f32_to_u32_clamp(value: f32, min: u32, max: u32) -> u32 {
    let (min, max) = if min <= max { (min, max) } else { (max, min) };

    if !value.is_finite() {
        return min;
    }

    let clamped = value.clamp(min as f32, max as f32);
    (clamped as u32).clamp(min, max)
}
