//! Scene catalogs.
//!
//! A catalog lists satellite scenes (one acquisition date of one collection)
//! and gives windowed access to each scene's band assets. Searching filters
//! by collection, date range and WGS84 footprint, like a STAC item search.
//!
//! # Example
//!
//! ```rust,no_run
//! use tilegrid::catalog::{DateRange, LocalSceneCatalog, LocalScanOptions, SceneCatalog, SearchQuery};
//! use tilegrid::GeoWindow;
//!
//! fn main() -> tilegrid::Result<()> {
//!     let catalog = LocalSceneCatalog::scan("/data/scenes", &LocalScanOptions::default())?;
//!     let query = SearchQuery {
//!         collection: "S2-16D-2".to_string(),
//!         bbox: GeoWindow::new(-46.7, -23.6, -46.6, -23.5),
//!         datetime: DateRange::parse("2024-07-01/2024-08-31")?,
//!     };
//!     for scene in catalog.search(&query) {
//!         println!("{} ({} assets)", scene.id, scene.assets.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod local;
pub mod memory;

pub use local::{LocalScanOptions, LocalSceneCatalog};
pub use memory::MemorySceneCatalog;

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::casting::i64_to_pixel_index;
use crate::error::{Result, TileGridError};
use crate::geometry::projection::{project_window, WGS84};
use crate::geometry::{GeoTransform, GeoWindow, PixelWindow};
use crate::raster::{GeoRaster, MaskedBand};

/// Inclusive date range, written `start/end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Parse `YYYY-MM-DD/YYYY-MM-DD`.
    ///
    /// # Errors
    /// Returns `InvalidParameter` for malformed dates or `start > end`.
    pub fn parse(range: &str) -> Result<Self> {
        let invalid = || TileGridError::invalid_parameter(format!("invalid datetime range {range:?}"));
        let (start, end) = range.split_once('/').ok_or_else(invalid)?;
        let start = NaiveDate::parse_from_str(start.trim(), "%Y-%m-%d").map_err(|_| invalid())?;
        let end = NaiveDate::parse_from_str(end.trim(), "%Y-%m-%d").map_err(|_| invalid())?;
        if start > end {
            return Err(invalid());
        }
        Ok(Self { start, end })
    }

    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Where an asset's pixels live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetLocation {
    Local(PathBuf),
    /// Handle into an in-memory catalog
    Memory(String),
}

impl AssetLocation {
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            AssetLocation::Local(path) => path.display().to_string(),
            AssetLocation::Memory(handle) => format!("memory://{handle}"),
        }
    }
}

/// One band file of a scene
#[derive(Debug, Clone)]
pub struct BandAsset {
    pub location: AssetLocation,
    /// EPSG code of the native grid
    pub crs: i32,
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
    pub nodata: Option<f32>,
    /// Footprint in EPSG:4326
    pub bounds_wgs84: GeoWindow,
}

impl BandAsset {
    /// Describe an asset, deriving its WGS84 footprint.
    ///
    /// # Errors
    /// Returns `Projection` if the footprint cannot be reprojected.
    pub fn new(
        location: AssetLocation,
        crs: i32,
        transform: GeoTransform,
        width: usize,
        height: usize,
        nodata: Option<f32>,
    ) -> Result<Self> {
        let bounds = transform.bounds(width, height);
        let bounds_wgs84 = project_window(&bounds, crs, WGS84)?;
        Ok(Self {
            location,
            crs,
            transform,
            width,
            height,
            nodata,
            bounds_wgs84,
        })
    }

    #[must_use]
    pub fn intersects_wgs84(&self, bbox: &GeoWindow) -> bool {
        self.bounds_wgs84.intersects(bbox)
    }
}

/// A dated acquisition with one asset per band key (`B04`, `B08`, ...)
#[derive(Debug, Clone)]
pub struct Scene {
    pub id: String,
    pub collection: String,
    pub date: NaiveDate,
    pub assets: BTreeMap<String, BandAsset>,
}

impl Scene {
    #[must_use]
    pub fn asset(&self, key: &str) -> Option<&BandAsset> {
        self.assets.get(key)
    }

    #[must_use]
    pub fn intersects_wgs84(&self, bbox: &GeoWindow) -> bool {
        self.assets.values().any(|a| a.intersects_wgs84(bbox))
    }
}

/// Scene search parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub collection: String,
    /// Area of interest in EPSG:4326
    pub bbox: GeoWindow,
    pub datetime: DateRange,
}

/// Source of scenes and their pixels.
pub trait SceneCatalog: Send + Sync {
    /// All known scenes
    fn scenes(&self) -> &[Scene];

    /// Scenes matching the query, ordered by date then id
    fn search(&self, query: &SearchQuery) -> Vec<&Scene> {
        let mut found: Vec<&Scene> = self
            .scenes()
            .iter()
            .filter(|s| s.collection == query.collection)
            .filter(|s| query.datetime.contains(s.date))
            .filter(|s| s.intersects_wgs84(&query.bbox))
            .collect();
        found.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
        found
    }

    /// Read a pixel window of the asset's first band without decoding the
    /// rest of the asset. Pixels outside the asset or equal to its nodata
    /// value come back masked.
    ///
    /// # Errors
    /// Returns an error if the asset cannot be read or decoded.
    fn read_window(&self, asset: &BandAsset, window: &PixelWindow) -> Result<MaskedBand>;
}

/// Copy a window of one band, masking out-of-range and nodata pixels
#[must_use]
pub fn extract_window(raster: &GeoRaster, band: usize, window: &PixelWindow) -> MaskedBand {
    let mut out = MaskedBand::masked(window.width, window.height);
    for row in 0..window.height {
        #[allow(clippy::cast_possible_wrap)]
        let Some(src_row) = i64_to_pixel_index(window.row_off + row as i64, raster.height) else {
            continue;
        };
        for col in 0..window.width {
            #[allow(clippy::cast_possible_wrap)]
            let Some(src_col) = i64_to_pixel_index(window.col_off + col as i64, raster.width) else {
                continue;
            };
            let value = raster.get(src_col, src_row, band);
            if raster.is_nodata(value) {
                continue;
            }
            let idx = row * window.width + col;
            out.data[idx] = value;
            out.mask[idx] = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_range() {
        let range = DateRange::parse("2024-07-01/2024-08-31").unwrap();
        assert!(range.contains(NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()));
        assert!(range.contains(NaiveDate::from_ymd_opt(2024, 8, 31).unwrap()));
        assert!(!range.contains(NaiveDate::from_ymd_opt(2024, 9, 1).unwrap()));
        assert!(DateRange::parse("2024-08-31/2024-07-01").is_err());
        assert!(DateRange::parse("2024-07-01").is_err());
    }

    #[test]
    fn test_asset_location_display() {
        let local = AssetLocation::Local(PathBuf::from("/data/S2/2024-07-01/B04.tif"));
        assert_eq!(local.display(), "/data/S2/2024-07-01/B04.tif");
        assert_eq!(AssetLocation::Memory("s1/B04".to_string()).display(), "memory://s1/B04");
    }

    #[test]
    fn test_extract_window_masks_outside() {
        let pixels: Vec<f32> = vec![1.0, 2.0, 3.0, 4.0, -9999.0, 6.0];
        let raster = GeoRaster {
            pixels,
            bands: 1,
            width: 3,
            height: 2,
            transform: GeoTransform::north_up(0.0, 2.0, 1.0, 1.0),
            crs: WGS84,
            nodata: Some(-9999.0),
        };
        let band = extract_window(&raster, 0, &PixelWindow::new(-1, 0, 3, 3));
        assert_eq!(band.get(0, 0), None);
        assert_eq!(band.get(1, 0), Some(1.0));
        assert_eq!(band.get(2, 0), Some(2.0));
        assert_eq!(band.get(1, 1), Some(4.0));
        assert_eq!(band.get(2, 1), None);
        assert_eq!(band.get(1, 2), None);
        assert_eq!(band.valid_count(), 3);
    }

    #[test]
    fn test_asset_footprint_wgs84() {
        let asset = BandAsset::new(
            AssetLocation::Memory("a".to_string()),
            WGS84,
            GeoTransform::north_up(10.0, 5.0, 0.1, 0.1),
            10,
            20,
            None,
        )
        .unwrap();
        assert!((asset.bounds_wgs84.east - 11.0).abs() < 1e-12);
        assert!((asset.bounds_wgs84.south - 3.0).abs() < 1e-12);
        assert!(asset.intersects_wgs84(&GeoWindow::new(10.5, 4.0, 12.0, 6.0)));
        assert!(!asset.intersects_wgs84(&GeoWindow::new(20.0, 4.0, 21.0, 6.0)));
    }
}
