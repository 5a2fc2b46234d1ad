//! Checked numeric conversions used across raster code.
//!
//! # Assumptions
//!
//! ## Image dimensions (`usize` ↔ `f64`)
//! Dimension to float conversions are unchecked. `f64` represents every
//! integer up to 2^53 exactly and no raster comes close.
//!
//! ## Float → pixel
//! Float results (rounded window lengths, resampled dimensions) go through
//! the checked helpers here since they may be negative, NaN or huge.
//!
//! ## Encoder dimensions (`usize` → `u32`)
//! The TIFF and PNG encoders take `u32` dimensions. Overflow is an
//! `Encoding` error rather than a silent wrap.

use crate::error::{Result, TileGridError};

/// Convert a dimension to the `u32` the encoders expect.
///
/// # Errors
/// Returns `Encoding` if the value exceeds `u32::MAX`.
#[inline]
pub fn usize_to_u32(value: usize) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| TileGridError::Encoding(format!("Dimension {value} exceeds u32 maximum")))
}

/// Convert a decoder dimension back to `usize`.
///
/// # Errors
/// Returns `InvalidData` on platforms where `usize` is narrower than 32 bits.
#[inline]
pub fn u32_to_usize(value: u32) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| TileGridError::invalid_data(format!("Dimension {value} exceeds usize maximum")))
}

/// Round a positive float to a pixel count.
///
/// # Errors
/// Returns `InvalidParameter` for NaN, infinite, or values that round below one.
#[inline]
pub fn round_to_pixels(value: f64) -> Result<usize> {
    let rounded = value.round();
    if !rounded.is_finite() || rounded < 1.0 || rounded > 1e12 {
        return Err(TileGridError::invalid_parameter(format!(
            "{value} does not round to a valid pixel count"
        )));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(rounded as usize)
}

/// Signed pixel offset to an in-range index, `None` if outside `[0, max_value)`.
#[inline]
#[must_use]
pub fn i64_to_pixel_index(value: i64, max_value: usize) -> Option<usize> {
    usize::try_from(value).ok().filter(|&v| v < max_value)
}

/// Clamp a signed index into `[0, max_value - 1]` (edge replication).
#[inline]
#[must_use]
pub fn isize_to_clamped_usize(value: isize, max_value: usize) -> usize {
    if value < 0 {
        0
    } else {
        #[allow(clippy::cast_sign_loss)]
        let u = value as usize;
        u.min(max_value.saturating_sub(1))
    }
}

/// Float to integer index via floor, for interpolation kernels
#[inline]
#[must_use]
pub fn floor_to_isize(value: f64) -> isize {
    #[allow(clippy::cast_possible_truncation)]
    let i = value.floor() as isize;
    i
}

/// Scale a non-negative value in `[0, 1]` to a byte.
#[inline]
#[must_use]
pub fn unit_to_u8(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let byte = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
    byte
}
