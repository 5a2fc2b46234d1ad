//! Inference stage plumbing around an external segmentation model.
//!
//! The model itself is opaque. This module prepares its input (per-band
//! min/max normalization of a 4-band tile) and turns its per-pixel
//! probabilities into a single-band binary prediction tile that keeps the
//! source tile's georeferencing.

use tracing::{debug, warn};

use crate::error::{Result, TileGridError};
use crate::raster::GeoRaster;

/// Encoder stride of the detection network; other sizes still run but may
/// be padded internally by the model
pub const MODEL_STRIDE: usize = 32;

/// A per-pixel binary segmentation model.
pub trait SegmentationModel: Send + Sync {
    /// Probability map for a normalized tile, row-major, `width * height`
    /// values.
    ///
    /// # Errors
    /// Implementations return an error when the model cannot run.
    fn predict(&self, tile: &GeoRaster) -> Result<Vec<f32>>;
}

impl<F> SegmentationModel for F
where
    F: Fn(&GeoRaster) -> Result<Vec<f32>> + Send + Sync,
{
    fn predict(&self, tile: &GeoRaster) -> Result<Vec<f32>> {
        self(tile)
    }
}

/// Scale each band to `[0, 1]` by its own min and max.
///
/// Nodata pixels are excluded from the range and written as `0.0`. A band
/// whose valid pixels are all equal is left unscaled.
#[must_use]
pub fn normalize_bands(tile: &GeoRaster) -> GeoRaster {
    let mut out = tile.clone();
    for band in 0..tile.bands {
        let (min, max) = tile
            .pixels
            .iter()
            .skip(band)
            .step_by(tile.bands)
            .filter(|v| !tile.is_nodata(**v))
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

        for v in out.pixels.iter_mut().skip(band).step_by(tile.bands) {
            if tile.is_nodata(*v) {
                *v = 0.0;
            } else if max > min {
                *v = (*v - min) / (max - min);
            }
        }
    }
    out.nodata = None;
    out
}

/// Runs a model over tiles and thresholds its output
pub struct Predictor<'a, M: SegmentationModel + ?Sized> {
    model: &'a M,
    threshold: f32,
}

impl<'a, M: SegmentationModel + ?Sized> Predictor<'a, M> {
    pub fn new(model: &'a M, threshold: f32) -> Self {
        Self { model, threshold }
    }

    /// Predict one tile.
    ///
    /// Returns a 1-band raster on the tile's grid holding `1.0` where the
    /// probability exceeds the threshold and `0.0` elsewhere.
    ///
    /// # Errors
    /// Propagates model errors, and returns `InvalidData` when the model's
    /// output size does not match the tile.
    pub fn predict(&self, tile: &GeoRaster) -> Result<GeoRaster> {
        if tile.width % MODEL_STRIDE != 0 || tile.height % MODEL_STRIDE != 0 {
            warn!(
                width = tile.width,
                height = tile.height,
                stride = MODEL_STRIDE,
                "Model input shape is not divisible by the encoder stride"
            );
        }

        let input = normalize_bands(tile);
        let probabilities = self.model.predict(&input)?;
        let expected = tile.width * tile.height;
        if probabilities.len() != expected {
            return Err(TileGridError::invalid_data(format!(
                "Model returned {} values for a {}x{} tile",
                probabilities.len(),
                tile.width,
                tile.height
            )));
        }

        let mask: Vec<f32> = probabilities
            .iter()
            .map(|&p| if p > self.threshold { 1.0 } else { 0.0 })
            .collect();
        debug!(
            positives = mask.iter().filter(|v| **v > 0.0).count(),
            "Thresholded prediction"
        );

        GeoRaster::from_planes(&[&mask], tile.width, tile.height, tile.transform, tile.crs, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeoTransform;

    fn tile(width: usize, height: usize) -> GeoRaster {
        let mut pixels = Vec::new();
        for i in 0..width * height {
            #[allow(clippy::cast_precision_loss)]
            let v = i as f32;
            pixels.extend([v, 10.0 * v, 5.0, -9999.0]);
        }
        GeoRaster {
            pixels,
            bands: 4,
            width,
            height,
            transform: GeoTransform::north_up(0.0, 0.0, 5.0, 5.0),
            crs: 32723,
            nodata: Some(-9999.0),
        }
    }

    #[test]
    fn test_normalize_per_band() {
        let t = tile(2, 2);
        let n = normalize_bands(&t);
        assert_eq!(n.plane(0), vec![0.0, 1.0 / 3.0, 2.0 / 3.0, 1.0]);
        assert_eq!(n.plane(1), n.plane(0));
        // Constant band untouched
        assert_eq!(n.plane(2), vec![5.0; 4]);
        // All-nodata band zeroed
        assert_eq!(n.plane(3), vec![0.0; 4]);
    }

    #[test]
    fn test_threshold_is_strict() {
        let model = |t: &GeoRaster| -> Result<Vec<f32>> { Ok(t.plane(0)) };
        let t = tile(2, 2);
        let out = Predictor::new(&model, 1.0 / 3.0).predict(&t).unwrap();
        assert_eq!(out.bands, 1);
        assert_eq!(out.pixels, vec![0.0, 0.0, 1.0, 1.0]);
        assert_eq!(out.transform, t.transform);
        assert_eq!(out.crs, 32723);
    }

    #[test]
    fn test_model_output_size_checked() {
        let model = |_: &GeoRaster| -> Result<Vec<f32>> { Ok(vec![1.0]) };
        assert!(Predictor::new(&model, 0.5).predict(&tile(2, 2)).is_err());
    }
}
