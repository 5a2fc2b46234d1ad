//! Pipeline configuration.
//!
//! Every constant the stages share lives here so that independently invoked
//! stages agree on tile size, nodata sentinel and key layout.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TileGridError};
use crate::geotiff_writer::GeoTiffCompression;
use crate::raster::Bands;

/// How partial tiles at the right/bottom edge of the composite are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeTilePolicy {
    /// Emit whatever slice is available; edge tiles may be smaller than the
    /// tile size
    Clip,
    /// Pad edge tiles to the full tile size with the nodata sentinel
    #[default]
    PadWithNodata,
    /// Skip tiles that would be smaller than the tile size
    Drop,
}

/// Settings shared by the acquisition, enhancement, inference and report stages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Tile edge length in pixels (model input size before enhancement)
    pub tile_size_px: usize,
    /// Sentinel written for pixels with no valid scene data
    pub nodata: f32,
    /// Catalog collection identifier
    pub collection: String,
    /// Default `start/end` date range for scene search
    pub datetime_range: String,
    /// Catalog asset key of each band
    pub band_assets: Bands<String>,
    /// Upscaling factor applied by the enhancement stage
    pub scale_factor: f64,
    /// Probability threshold applied to model output
    pub threshold: f32,
    /// Ground sample distance of prediction tiles in meters
    pub ground_sample_distance_m: f64,
    pub edge_policy: EdgeTilePolicy,
    /// Compression of stored tiles; only 1- and 3-band tiles are compressed
    pub tile_compression: GeoTiffCompression,
    /// Worker threads for per-tile work
    pub workers: usize,
    /// RGB used to paint positive prediction pixels on the overlay
    pub overlay_color: [u8; 3],
    /// RGB of grid lines and cell numbers on the overlay
    pub grid_color: [u8; 3],
    /// Store key holding the transaction counter
    pub counter_key: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tile_size_px: 256,
            nodata: -9999.0,
            collection: "S2-16D-2".to_string(),
            datetime_range: "2024-07-01/2024-08-31".to_string(),
            band_assets: Bands {
                red: "B04".to_string(),
                green: "B03".to_string(),
                blue: "B02".to_string(),
                nir: "B08".to_string(),
            },
            scale_factor: 2.0,
            threshold: 0.5,
            ground_sample_distance_m: 5.0,
            edge_policy: EdgeTilePolicy::default(),
            tile_compression: GeoTiffCompression::Deflate,
            workers: std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get),
            overlay_color: [0, 255, 255],
            grid_color: [255, 255, 255],
            counter_key: "etc/transaction_counter.txt".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file; missing fields take their defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if a value is
    /// out of range.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    /// Returns `InvalidParameter` describing the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.tile_size_px == 0 {
            return Err(TileGridError::invalid_parameter("tile_size_px must be positive"));
        }
        if !(self.scale_factor.is_finite() && self.scale_factor > 0.0) {
            return Err(TileGridError::invalid_parameter("scale_factor must be positive"));
        }
        if !(self.ground_sample_distance_m.is_finite() && self.ground_sample_distance_m > 0.0) {
            return Err(TileGridError::invalid_parameter(
                "ground_sample_distance_m must be positive",
            ));
        }
        if self.workers == 0 {
            return Err(TileGridError::invalid_parameter("workers must be at least 1"));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_tile_size(mut self, tile_size_px: usize) -> Self {
        self.tile_size_px = tile_size_px;
        self
    }

    #[must_use]
    pub fn with_edge_policy(mut self, policy: EdgeTilePolicy) -> Self {
        self.edge_policy = policy;
        self
    }

    #[must_use]
    pub fn with_scale_factor(mut self, scale_factor: f64) -> Self {
        self.scale_factor = scale_factor;
        self
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[must_use]
    pub fn with_ground_sample_distance(mut self, meters: f64) -> Self {
        self.ground_sample_distance_m = meters;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.tile_size_px, 256);
        assert_eq!(config.band_assets.red, "B04");
        assert_eq!(config.band_assets.nir, "B08");
        assert_eq!(config.edge_policy, EdgeTilePolicy::PadWithNodata);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"tile_size_px": 128, "edge_policy": "clip", "tile_compression": "lzw"}"#,
        )
        .unwrap();
        assert_eq!(config.tile_size_px, 128);
        assert_eq!(config.edge_policy, EdgeTilePolicy::Clip);
        assert_eq!(config.tile_compression, GeoTiffCompression::Lzw);
        assert_eq!(config.collection, "S2-16D-2");
    }

    #[test]
    fn test_validate_rejects_zero_tile() {
        let config = PipelineConfig::default().with_tile_size(0);
        assert!(config.validate().is_err());
    }
}
