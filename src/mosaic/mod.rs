//! Mosaic reconstruction.
//!
//! A later stage knows nothing about the grid except what the store tells it.
//! [`MosaicReconstructor`] resolves the enhancement and prediction grids
//! independently, refuses to continue if they disagree, loads both tile sets
//! in row-major order and stitches them into full mosaics.
//!
//! Rendering:
//! - [`render_input`]: RGB from the first three bands, scaled by one global
//!   min/max so neighbouring tiles share a contrast stretch
//! - [`render_prediction`]: `value > 0 → 255`
//! - [`overlay::overlay`]: highlight, dashed grid and cell numbers

pub mod overlay;

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, info};

use crate::casting::{unit_to_u8, usize_to_u32};
use crate::error::{Result, TileGridError};
use crate::geotiff_reader::read_geotiff_bytes;
use crate::naming::{resolve_grid, ResolvedGrid, Stage};
use crate::raster::GeoRaster;
use crate::store::ObjectStore;

pub use overlay::{overlay, OverlayStyle};

/// Pixel layout of a stitched grid.
///
/// Every tile in a grid row shares that row's height and every tile in a
/// grid column shares that column's width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MosaicLayout {
    pub rows: usize,
    pub cols: usize,
    pub row_heights: Vec<usize>,
    pub col_widths: Vec<usize>,
}

impl MosaicLayout {
    /// Derive the layout from row-major tiles.
    ///
    /// # Errors
    /// Returns `InvalidData` if the tile count is not `rows * cols` or a tile
    /// does not fit its row height or column width.
    pub fn from_tiles(tiles: &[GeoRaster], rows: usize, cols: usize) -> Result<Self> {
        if rows == 0 || cols == 0 || tiles.len() != rows * cols {
            return Err(TileGridError::invalid_data(format!(
                "{} tiles cannot fill a {rows}x{cols} grid",
                tiles.len()
            )));
        }
        let row_heights: Vec<usize> = (0..rows).map(|r| tiles[r * cols].height).collect();
        let col_widths: Vec<usize> = tiles[..cols].iter().map(|t| t.width).collect();

        for (i, tile) in tiles.iter().enumerate() {
            let (row, col) = (i / cols, i % cols);
            if tile.height != row_heights[row] || tile.width != col_widths[col] {
                return Err(TileGridError::invalid_data(format!(
                    "Tile {row:03}_{col:03} is {}x{}, expected {}x{}",
                    tile.width, tile.height, col_widths[col], row_heights[row]
                )));
            }
        }

        Ok(Self {
            rows,
            cols,
            row_heights,
            col_widths,
        })
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.col_widths.iter().sum()
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.row_heights.iter().sum()
    }

    /// Mosaic row of the top edge of grid row `row`
    #[must_use]
    pub fn row_offset(&self, row: usize) -> usize {
        self.row_heights[..row].iter().sum()
    }

    /// Mosaic column of the left edge of grid column `col`
    #[must_use]
    pub fn col_offset(&self, col: usize) -> usize {
        self.col_widths[..col].iter().sum()
    }

    /// `(cell number, x, y)` of every cell's top-left corner, numbered from 1
    /// in row-major order
    pub fn cell_origins(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        (0..self.rows).flat_map(move |row| {
            (0..self.cols).map(move |col| (row * self.cols + col + 1, self.col_offset(col), self.row_offset(row)))
        })
    }
}

/// Stitch row-major tiles into one raster.
///
/// The mosaic takes the transform of tile `000_000`.
///
/// # Errors
/// Returns `InvalidData` for a layout error or tiles with differing band
/// counts.
pub fn assemble(tiles: &[GeoRaster], rows: usize, cols: usize) -> Result<(GeoRaster, MosaicLayout)> {
    let layout = MosaicLayout::from_tiles(tiles, rows, cols)?;
    let first = &tiles[0];
    if let Some(bad) = tiles.iter().position(|t| t.bands != first.bands) {
        return Err(TileGridError::invalid_data(format!(
            "Tile {bad} has {} bands, expected {}",
            tiles[bad].bands, first.bands
        )));
    }

    let bands = first.bands;
    let width = layout.width();
    let mut pixels = vec![0.0_f32; width * layout.height() * bands];

    for (i, tile) in tiles.iter().enumerate() {
        let x0 = layout.col_offset(i % cols);
        let y0 = layout.row_offset(i / cols);
        let span = tile.width * bands;
        for y in 0..tile.height {
            let src = y * span;
            let dst = ((y0 + y) * width + x0) * bands;
            pixels[dst..dst + span].copy_from_slice(&tile.pixels[src..src + span]);
        }
    }

    let mosaic = GeoRaster {
        pixels,
        bands,
        width,
        height: layout.height(),
        transform: first.transform,
        crs: first.crs,
        nodata: first.nodata,
    };
    Ok((mosaic, layout))
}

/// RGB rendering of the first three bands with one global stretch.
///
/// Nodata pixels are excluded from the stretch and drawn black. A flat
/// mosaic renders black.
///
/// # Errors
/// Returns `InvalidData` for fewer than three bands and `Encoding` for
/// dimensions beyond `u32`.
pub fn render_input(mosaic: &GeoRaster) -> Result<RgbImage> {
    if mosaic.bands < 3 {
        return Err(TileGridError::invalid_data(format!(
            "Input mosaic needs 3 bands, has {}",
            mosaic.bands
        )));
    }

    let (min, max) = mosaic
        .pixels
        .chunks_exact(mosaic.bands)
        .flat_map(|px| px[..3].iter().copied())
        .filter(|v| !mosaic.is_nodata(*v))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(f64::from(v)), hi.max(f64::from(v)))
        });
    let range = max - min;
    debug!(min, max, "Input mosaic value range");

    let mut image = RgbImage::new(usize_to_u32(mosaic.width)?, usize_to_u32(mosaic.height)?);
    for (out, px) in image.pixels_mut().zip(mosaic.pixels.chunks_exact(mosaic.bands)) {
        let channel = |v: f32| {
            if mosaic.is_nodata(v) || range <= 0.0 {
                0
            } else {
                unit_to_u8((f64::from(v) - min) / range)
            }
        };
        *out = Rgb([channel(px[0]), channel(px[1]), channel(px[2])]);
    }
    Ok(image)
}

/// Binary rendering of band 0: positive pixels white, everything else black.
///
/// # Errors
/// Returns `Encoding` for dimensions beyond `u32`.
pub fn render_prediction(mosaic: &GeoRaster) -> Result<GrayImage> {
    let mut image = GrayImage::new(usize_to_u32(mosaic.width)?, usize_to_u32(mosaic.height)?);
    for (out, px) in image.pixels_mut().zip(mosaic.pixels.chunks_exact(mosaic.bands.max(1))) {
        *out = Luma([if px[0] > 0.0 { 255 } else { 0 }]);
    }
    Ok(image)
}

/// Encode an image as PNG bytes.
///
/// # Errors
/// Returns `Encoding` if the encoder fails.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Both mosaics of one transaction
#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub rows: usize,
    pub cols: usize,
    pub input: GeoRaster,
    pub prediction: GeoRaster,
    pub layout: MosaicLayout,
    /// Row-major prediction tiles, kept for statistics
    pub prediction_tiles: Vec<GeoRaster>,
}

/// Rebuilds mosaics from stored enhancement and prediction tiles
pub struct MosaicReconstructor<'a> {
    store: &'a dyn ObjectStore,
    pool: &'a ThreadPool,
}

impl<'a> MosaicReconstructor<'a> {
    pub fn new(store: &'a dyn ObjectStore, pool: &'a ThreadPool) -> Self {
        Self { store, pool }
    }

    /// Resolve both grids and require that they agree.
    ///
    /// # Errors
    /// Returns `GridMismatch` when the prediction grid differs from the
    /// enhancement grid, or any error of [`resolve_grid`].
    pub fn resolve_grids(&self, transaction_id: &str) -> Result<(ResolvedGrid, ResolvedGrid)> {
        let enhanced = resolve_grid(self.store, Stage::Enhancement, transaction_id)?;
        let predicted = resolve_grid(self.store, Stage::Prediction, transaction_id)?;
        if enhanced.shape() != predicted.shape() {
            return Err(TileGridError::GridMismatch {
                expected: enhanced.shape(),
                found: predicted.shape(),
            });
        }
        Ok((enhanced, predicted))
    }

    /// Fetch and decode a grid's tiles in row-major order.
    ///
    /// # Errors
    /// Returns the first store or decoding error.
    pub fn load_tiles(&self, grid: &ResolvedGrid) -> Result<Vec<GeoRaster>> {
        self.pool.install(|| {
            grid.tiles
                .par_iter()
                .map(|address| {
                    let key = address.key();
                    let raster = read_geotiff_bytes(&self.store.get(&key)?)?;
                    debug!(key = %key, width = raster.width, height = raster.height, "Loaded tile");
                    Ok(raster)
                })
                .collect()
        })
    }

    /// Load and stitch both tile sets.
    ///
    /// # Errors
    /// Returns `GridMismatch` if the grids disagree and `InvalidData` if the
    /// two mosaics do not cover the same pixels.
    pub fn reconstruct(&self, transaction_id: &str) -> Result<Reconstruction> {
        let (enhanced, predicted) = self.resolve_grids(transaction_id)?;
        let (rows, cols) = enhanced.shape();
        info!(transaction_id, rows, cols, "Reconstructing mosaics");

        let (input, layout) = assemble(&self.load_tiles(&enhanced)?, rows, cols)?;
        let prediction_tiles = self.load_tiles(&predicted)?;
        let (prediction, prediction_layout) = assemble(&prediction_tiles, rows, cols)?;
        if prediction_layout != layout {
            return Err(TileGridError::invalid_data(format!(
                "Prediction mosaic is {}x{}, input mosaic is {}x{}",
                prediction.width, prediction.height, input.width, input.height
            )));
        }

        Ok(Reconstruction {
            rows,
            cols,
            input,
            prediction,
            layout,
            prediction_tiles,
        })
    }
}
