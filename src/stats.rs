//! Coverage statistics over prediction tiles.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TileGridError};
use crate::raster::GeoRaster;

/// Counts and areas for one grid cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellStatistics {
    /// 1-based row-major number, matching the overlay labels
    pub cell: usize,
    pub row: usize,
    pub col: usize,
    pub total_pixels: usize,
    pub positive_pixels: usize,
    pub total_area_km2: f64,
    pub positive_area_m2: f64,
    pub coverage_pct: f64,
}

/// Per-cell statistics plus the ground extent of the whole grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsTable {
    pub cells: Vec<CellStatistics>,
    /// North-south ground span in meters
    pub ns_extent_m: f64,
    /// East-west ground span in meters
    pub we_extent_m: f64,
}

impl StatisticsTable {
    #[must_use]
    pub fn positive_pixels(&self) -> usize {
        self.cells.iter().map(|c| c.positive_pixels).sum()
    }

    #[must_use]
    pub fn positive_area_m2(&self) -> f64 {
        self.cells.iter().map(|c| c.positive_area_m2).sum()
    }

    /// # Errors
    /// Returns `Encoding` if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// Turns prediction tiles into a [`StatisticsTable`]
#[derive(Debug, Clone, Copy)]
pub struct StatisticsAggregator {
    ground_sample_distance_m: f64,
}

impl StatisticsAggregator {
    #[must_use]
    pub fn new(ground_sample_distance_m: f64) -> Self {
        Self {
            ground_sample_distance_m,
        }
    }

    /// Statistics for one tile; a pixel is positive when band 0 is above zero.
    #[must_use]
    pub fn cell(&self, cell: usize, row: usize, col: usize, tile: &GeoRaster) -> CellStatistics {
        let total_pixels = tile.width * tile.height;
        let positive_pixels = tile
            .pixels
            .iter()
            .step_by(tile.bands.max(1))
            .filter(|v| **v > 0.0)
            .count();
        let pixel_area = self.ground_sample_distance_m * self.ground_sample_distance_m;

        #[allow(clippy::cast_precision_loss)]
        let (total, positive) = (total_pixels as f64, positive_pixels as f64);
        CellStatistics {
            cell,
            row,
            col,
            total_pixels,
            positive_pixels,
            total_area_km2: total * pixel_area * 1e-6,
            positive_area_m2: positive * pixel_area,
            coverage_pct: if total_pixels == 0 { 0.0 } else { positive / total * 100.0 },
        }
    }

    /// Aggregate row-major tiles of a `rows × cols` grid.
    ///
    /// Extents are the summed heights of the first column and widths of the
    /// first row, times the ground sample distance.
    ///
    /// # Errors
    /// Returns `InvalidData` if the tile count is not `rows * cols`.
    pub fn aggregate(&self, tiles: &[GeoRaster], rows: usize, cols: usize) -> Result<StatisticsTable> {
        if rows == 0 || cols == 0 || tiles.len() != rows * cols {
            return Err(TileGridError::invalid_data(format!(
                "{} prediction tiles for a {rows}x{cols} grid",
                tiles.len()
            )));
        }

        let cells = tiles
            .iter()
            .enumerate()
            .map(|(i, tile)| self.cell(i + 1, i / cols, i % cols, tile))
            .collect();

        let ns_px: usize = (0..rows).map(|r| tiles[r * cols].height).sum();
        let we_px: usize = tiles[..cols].iter().map(|t| t.width).sum();
        #[allow(clippy::cast_precision_loss)]
        let (ns_px, we_px) = (ns_px as f64, we_px as f64);

        Ok(StatisticsTable {
            cells,
            ns_extent_m: ns_px * self.ground_sample_distance_m,
            we_extent_m: we_px * self.ground_sample_distance_m,
        })
    }
}
