//! Per-tile bicubic resampling.
//!
//! Output pixel `(x, y)` samples the source at its pixel centre,
//! `((x + 0.5) / s - 0.5, (y + 0.5) / s - 0.5)`, so the geographic footprint
//! is unchanged and only pixel density moves. Taps past the border are
//! clamped to the edge pixel.

use rayon::prelude::*;

use crate::casting::{floor_to_isize, isize_to_clamped_usize, round_to_pixels};
use crate::error::{Result, TileGridError};
use crate::raster::GeoRaster;

/// Keys cubic convolution parameter
const CUBIC_A: f64 = -0.5;

fn cubic_weight(t: f64) -> f64 {
    let t = t.abs();
    if t <= 1.0 {
        ((CUBIC_A + 2.0) * t - (CUBIC_A + 3.0)) * t * t + 1.0
    } else if t < 2.0 {
        ((CUBIC_A * t - 5.0 * CUBIC_A) * t + 8.0 * CUBIC_A) * t - 4.0 * CUBIC_A
    } else {
        0.0
    }
}

/// Four source taps and weights for one output coordinate along one axis
#[derive(Debug, Clone, Copy)]
struct Taps {
    index: [usize; 4],
    weight: [f64; 4],
    /// Source pixel nearest to the sample position
    nearest: usize,
}

fn axis_taps(out_len: usize, src_len: usize, scale: f64) -> Vec<Taps> {
    (0..out_len)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let pos = (i as f64 + 0.5) / scale - 0.5;
            let base = floor_to_isize(pos);
            #[allow(clippy::cast_precision_loss)]
            let frac = pos - base as f64;
            let mut index = [0; 4];
            let mut weight = [0.0; 4];
            for (k, offset) in (-1_isize..3).enumerate() {
                index[k] = isize_to_clamped_usize(base + offset, src_len);
                #[allow(clippy::cast_precision_loss)]
                let distance = frac - offset as f64;
                weight[k] = cubic_weight(distance);
            }
            let nearest = isize_to_clamped_usize(floor_to_isize(pos + 0.5), src_len);
            Taps { index, weight, nearest }
        })
        .collect()
}

/// Upscale (or downscale) every band of `raster` by `scale`.
///
/// Output dimensions are `round(dim * scale)` and the transform is the input
/// transform composed with a `1 / scale` pixel scale. When any of the 16 taps
/// is nodata the output takes the nearest source pixel instead, so nodata
/// regions keep their sentinel and never bleed into valid pixels.
///
/// # Errors
/// Returns `InvalidParameter` for a non-positive scale or one that collapses
/// an axis to zero pixels, and `InvalidData` for an empty raster.
pub fn resample_bicubic(raster: &GeoRaster, scale: f64) -> Result<GeoRaster> {
    if !(scale.is_finite() && scale > 0.0) {
        return Err(TileGridError::invalid_parameter(format!(
            "Scale factor must be positive, got {scale}"
        )));
    }
    if raster.width == 0 || raster.height == 0 || raster.bands == 0 {
        return Err(TileGridError::invalid_data("Cannot resample an empty raster"));
    }

    #[allow(clippy::cast_precision_loss)]
    let out_width = round_to_pixels(raster.width as f64 * scale)?;
    #[allow(clippy::cast_precision_loss)]
    let out_height = round_to_pixels(raster.height as f64 * scale)?;

    let cols = axis_taps(out_width, raster.width, scale);
    let rows = axis_taps(out_height, raster.height, scale);
    let bands = raster.bands;

    let mut pixels = vec![0.0_f32; out_width * out_height * bands];
    pixels
        .par_chunks_mut(out_width * bands)
        .zip(rows.par_iter())
        .for_each(|(out_row, ry)| {
            for (x, cx) in cols.iter().enumerate() {
                for band in 0..bands {
                    out_row[x * bands + band] = sample(raster, band, cx, ry);
                }
            }
        });

    Ok(GeoRaster {
        pixels,
        bands,
        width: out_width,
        height: out_height,
        transform: raster.transform.scaled(scale),
        crs: raster.crs,
        nodata: raster.nodata,
    })
}

fn sample(raster: &GeoRaster, band: usize, cx: &Taps, ry: &Taps) -> f32 {
    let mut acc = 0.0_f64;
    for (j, &sy) in ry.index.iter().enumerate() {
        let mut row_acc = 0.0_f64;
        for (i, &sx) in cx.index.iter().enumerate() {
            let v = raster.get(sx, sy, band);
            if raster.is_nodata(v) {
                return raster.get(cx.nearest, ry.nearest, band);
            }
            row_acc += f64::from(v) * cx.weight[i];
        }
        acc += row_acc * ry.weight[j];
    }
    #[allow(clippy::cast_possible_truncation)]
    let out = acc as f32;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeoTransform;

    fn raster(width: usize, height: usize, bands: usize, f: impl Fn(usize, usize, usize) -> f32) -> GeoRaster {
        let mut pixels = Vec::with_capacity(width * height * bands);
        for y in 0..height {
            for x in 0..width {
                for b in 0..bands {
                    pixels.push(f(x, y, b));
                }
            }
        }
        GeoRaster {
            pixels,
            bands,
            width,
            height,
            transform: GeoTransform::north_up(500_000.0, 7_400_000.0, 10.0, 10.0),
            crs: 32723,
            nodata: Some(-9999.0),
        }
    }

    #[test]
    fn test_kernel_weights() {
        assert!((cubic_weight(0.0) - 1.0).abs() < 1e-12);
        assert!(cubic_weight(1.0).abs() < 1e-12);
        assert!(cubic_weight(2.0).abs() < 1e-12);
        // Partition of unity at any phase
        for frac in [0.0, 0.25, 0.5, 0.9] {
            let sum: f64 = (-1..3).map(|k| cubic_weight(frac - f64::from(k))).sum();
            assert!((sum - 1.0).abs() < 1e-12, "frac {frac}: {sum}");
        }
    }

    #[test]
    fn test_dimensions_and_footprint() {
        let src = raster(5, 3, 4, |x, y, b| (x + y + b) as f32);
        let up = resample_bicubic(&src, 2.0).unwrap();
        assert_eq!((up.width, up.height, up.bands), (10, 6, 4));
        assert_eq!(up.transform.a, 5.0);
        assert_eq!(up.transform.e, -5.0);
        assert_eq!(
            src.transform.bounds(src.width, src.height),
            up.transform.bounds(up.width, up.height)
        );

        let back = resample_bicubic(&up, 0.5).unwrap();
        assert_eq!((back.width, back.height), (src.width, src.height));
    }

    #[test]
    fn test_constant_band_stays_constant() {
        let src = raster(4, 4, 2, |_, _, b| if b == 0 { 7.5 } else { 100.0 });
        let up = resample_bicubic(&src, 3.0).unwrap();
        for y in 0..up.height {
            for x in 0..up.width {
                assert!((up.get(x, y, 0) - 7.5).abs() < 1e-4);
                assert!((up.get(x, y, 1) - 100.0).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn test_bands_are_independent() {
        let src = raster(6, 6, 2, |x, _, b| if b == 0 { x as f32 } else { 0.0 });
        let up = resample_bicubic(&src, 2.0).unwrap();
        assert!(up.plane(1).iter().all(|v| v.abs() < 1e-6));
        assert!(up.plane(0).iter().any(|v| *v > 1.0));
    }

    #[test]
    fn test_nodata_does_not_bleed() {
        let src = raster(8, 1, 1, |x, _, _| if x >= 4 { -9999.0 } else { 1.0 });
        let up = resample_bicubic(&src, 2.0).unwrap();
        // Far from the boundary the kernel only sees valid pixels
        assert!((up.get(0, 0, 0) - 1.0).abs() < 1e-6);
        // Right half stays nodata
        assert_eq!(up.get(15, 0, 0), -9999.0);
        assert!(up.pixels.iter().all(|&v| v == -9999.0 || (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_invalid_scale() {
        let src = raster(2, 2, 1, |_, _, _| 0.0);
        assert!(resample_bicubic(&src, 0.0).is_err());
        assert!(resample_bicubic(&src, f64::NAN).is_err());
        assert!(resample_bicubic(&src, 0.1).is_err());
    }
}
