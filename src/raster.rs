//! In-memory raster types.
//!
//! - [`MaskedBand`]: one band of one scene window, with invalid pixels masked
//! - [`BandRaster`]: a composited band filled with the nodata sentinel
//! - [`GeoRaster`]: an interleaved multi-band raster with georeferencing
//! - [`Bands`]: the fixed four-band set (Red, Green, Blue, NIR)

use serde::{Deserialize, Serialize};

use crate::error::{Result, TileGridError};
use crate::geometry::GeoTransform;

/// Spectral bands used by the detection model, in tile order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandName {
    Red,
    Green,
    Blue,
    Nir,
}

impl BandName {
    /// Tile band order
    pub const ALL: [BandName; 4] = [Self::Red, Self::Green, Self::Blue, Self::Nir];

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Red => "Red",
            Self::Green => "Green",
            Self::Blue => "Blue",
            Self::Nir => "NIR",
        }
    }
}

/// One value per spectral band.
///
/// Band order is structural: tiles are always stacked Red, Green, Blue, NIR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bands<T> {
    pub red: T,
    pub green: T,
    pub blue: T,
    pub nir: T,
}

impl<T> Bands<T> {
    #[must_use]
    pub fn get(&self, band: BandName) -> &T {
        match band {
            BandName::Red => &self.red,
            BandName::Green => &self.green,
            BandName::Blue => &self.blue,
            BandName::Nir => &self.nir,
        }
    }

    /// References in tile order
    #[must_use]
    pub fn as_array(&self) -> [&T; 4] {
        [&self.red, &self.green, &self.blue, &self.nir]
    }

    pub fn map<U>(self, mut f: impl FnMut(BandName, T) -> U) -> Bands<U> {
        Bands {
            red: f(BandName::Red, self.red),
            green: f(BandName::Green, self.green),
            blue: f(BandName::Blue, self.blue),
            nir: f(BandName::Nir, self.nir),
        }
    }

    /// Build from a fallible per-band constructor, stopping at the first error
    pub fn try_from_fn<E>(mut f: impl FnMut(BandName) -> std::result::Result<T, E>) -> std::result::Result<Self, E> {
        Ok(Self {
            red: f(BandName::Red)?,
            green: f(BandName::Green)?,
            blue: f(BandName::Blue)?,
            nir: f(BandName::Nir)?,
        })
    }
}

/// A single band window with a per-pixel invalid mask (`true` = masked).
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedBand {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
    pub mask: Vec<bool>,
}

impl MaskedBand {
    /// Fully masked band
    #[must_use]
    pub fn masked(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
            mask: vec![true; width * height],
        }
    }

    /// Mask every pixel equal to `nodata` or NaN
    #[must_use]
    pub fn from_values(width: usize, height: usize, data: Vec<f32>, nodata: Option<f32>) -> Self {
        let mask = data
            .iter()
            .map(|&v| v.is_nan() || nodata.is_some_and(|nd| v == nd))
            .collect();
        Self {
            width,
            height,
            data,
            mask,
        }
    }

    /// Value at `(col, row)`, `None` if masked or out of range
    #[must_use]
    pub fn get(&self, col: usize, row: usize) -> Option<f32> {
        if col >= self.width || row >= self.height {
            return None;
        }
        let idx = row * self.width + col;
        (!self.mask[idx]).then(|| self.data[idx])
    }

    #[must_use]
    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|m| !**m).count()
    }

    /// Copy into a `width` × `height` frame anchored at the upper-left corner,
    /// masking anything the source does not cover.
    #[must_use]
    pub fn conform(&self, width: usize, height: usize) -> Self {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let mut out = Self::masked(width, height);
        for row in 0..height.min(self.height) {
            for col in 0..width.min(self.width) {
                let src = row * self.width + col;
                let dst = row * width + col;
                out.data[dst] = self.data[src];
                out.mask[dst] = self.mask[src];
            }
        }
        out
    }

    /// Replace masked pixels with `nodata`
    #[must_use]
    pub fn filled(&self, nodata: f32) -> Vec<f32> {
        self.data
            .iter()
            .zip(&self.mask)
            .map(|(&v, &m)| if m { nodata } else { v })
            .collect()
    }
}

/// A composited band: unmasked values plus the nodata sentinel, on the
/// reference pixel grid.
#[derive(Debug, Clone, PartialEq)]
pub struct BandRaster {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
    pub transform: GeoTransform,
    pub crs: i32,
    pub nodata: f32,
}

impl BandRaster {
    #[must_use]
    pub fn get(&self, col: usize, row: usize) -> f32 {
        self.data[row * self.width + col]
    }
}

/// Interleaved multi-band raster with georeferencing.
///
/// Pixels are stored band-interleaved by pixel (`R,G,B,N,R,G,B,N,...`).
#[derive(Debug, Clone, PartialEq)]
pub struct GeoRaster {
    pub pixels: Vec<f32>,
    pub bands: usize,
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    /// EPSG code
    pub crs: i32,
    pub nodata: Option<f32>,
}

impl GeoRaster {
    /// Interleave separate band planes into one raster.
    ///
    /// # Errors
    /// Returns `InvalidData` if no planes are given or a plane's length is not
    /// `width * height`.
    pub fn from_planes(
        planes: &[&[f32]],
        width: usize,
        height: usize,
        transform: GeoTransform,
        crs: i32,
        nodata: Option<f32>,
    ) -> Result<Self> {
        if planes.is_empty() {
            return Err(TileGridError::invalid_data("Raster needs at least one band"));
        }
        let count = width * height;
        if let Some(bad) = planes.iter().position(|p| p.len() != count) {
            return Err(TileGridError::invalid_data(format!(
                "Band {bad} has {} pixels, expected {count}",
                planes[bad].len()
            )));
        }

        let bands = planes.len();
        let mut pixels = Vec::with_capacity(count * bands);
        for i in 0..count {
            pixels.extend(planes.iter().map(|p| p[i]));
        }

        Ok(Self {
            pixels,
            bands,
            width,
            height,
            transform,
            crs,
            nodata,
        })
    }

    /// Copy one band out as a plane
    #[must_use]
    pub fn plane(&self, band: usize) -> Vec<f32> {
        self.pixels
            .iter()
            .skip(band)
            .step_by(self.bands)
            .copied()
            .collect()
    }

    #[inline]
    #[must_use]
    pub fn get(&self, col: usize, row: usize, band: usize) -> f32 {
        self.pixels[(row * self.width + col) * self.bands + band]
    }

    #[must_use]
    pub fn is_nodata(&self, value: f32) -> bool {
        value.is_nan() || self.nodata.is_some_and(|nd| value == nd)
    }
}
