//! Local filesystem scene catalog.
//!
//! Scenes are laid out as `<root>/<collection>/<YYYY-MM-DD>[_suffix]/<ASSET>.tif`,
//! one GeoTIFF per band. Only tags are read while scanning; windows decode just
//! the strips or tiles they touch, which stay in the shared band cache.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{AssetLocation, BandAsset, Scene, SceneCatalog};
use crate::band_cache;
use crate::error::{Result, TileGridError};
use crate::geometry::PixelWindow;
use crate::geotiff_reader::{self, read_header};
use crate::raster::MaskedBand;

/// Options for scanning a scene directory tree.
#[derive(Debug, Clone)]
pub struct LocalScanOptions {
    /// File extensions to consider as `GeoTIFFs` (case-insensitive)
    pub extensions: Vec<String>,
    /// Whether to follow symbolic links
    pub follow_links: bool,
    /// Only scan this collection directory
    pub collection: Option<String>,
}

impl Default for LocalScanOptions {
    fn default() -> Self {
        Self {
            extensions: vec![
                "tif".to_string(),
                "tiff".to_string(),
                "geotiff".to_string(),
                "geotif".to_string(),
            ],
            follow_links: false,
            collection: None,
        }
    }
}

impl LocalScanOptions {
    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    #[must_use]
    pub fn with_follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }
}

/// Catalog backed by a directory tree.
pub struct LocalSceneCatalog {
    scenes: Vec<Scene>,
}

impl LocalSceneCatalog {
    /// Scan `root` for scenes.
    ///
    /// Files that are not readable GeoTIFFs, and scene directories whose name
    /// does not start with a date, are logged and skipped.
    ///
    /// # Errors
    /// Returns `InvalidParameter` if the root directory does not exist.
    pub fn scan<P: AsRef<Path>>(root: P, options: &LocalScanOptions) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(TileGridError::invalid_parameter(format!(
                "Directory does not exist: {}",
                root.display()
            )));
        }

        let mut scenes: BTreeMap<String, Scene> = BTreeMap::new();

        // collection / scene / asset
        let walker = WalkDir::new(root)
            .min_depth(3)
            .max_depth(3)
            .follow_links(options.follow_links);

        for entry in walker.into_iter().filter_map(std::result::Result::ok) {
            let path = entry.path();

            let is_geotiff = path
                .extension()
                .and_then(|s| s.to_str())
                .is_some_and(|e| options.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)));
            if !is_geotiff || !entry.file_type().is_file() {
                continue;
            }

            let Some((collection, scene_dir, asset_key)) = split_scene_path(path) else {
                continue;
            };
            if options.collection.as_deref().is_some_and(|c| c != collection) {
                continue;
            }
            let Some(date) = parse_scene_date(scene_dir) else {
                warn!(path = %path.display(), "Scene directory name does not start with a date");
                continue;
            };

            let asset = match Self::read_asset(path) {
                Ok(asset) => asset,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to read scene asset");
                    continue;
                }
            };

            let id = format!("{collection}/{scene_dir}");
            scenes
                .entry(id.clone())
                .or_insert_with(|| Scene {
                    id,
                    collection: collection.to_string(),
                    date,
                    assets: BTreeMap::new(),
                })
                .assets
                .insert(asset_key.to_string(), asset);
            debug!(path = %path.display(), "Discovered scene asset");
        }

        Ok(Self {
            scenes: scenes.into_values().collect(),
        })
    }

    fn read_asset(path: &Path) -> Result<BandAsset> {
        let header = read_header(path)?;
        // A rescan may see a rewritten file under a cached path
        band_cache::invalidate(&path.to_string_lossy());
        BandAsset::new(
            AssetLocation::Local(path.to_path_buf()),
            header.crs,
            header.transform,
            header.width,
            header.height,
            header.nodata,
        )
    }
}

impl SceneCatalog for LocalSceneCatalog {
    fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    fn read_window(&self, asset: &BandAsset, window: &PixelWindow) -> Result<MaskedBand> {
        match &asset.location {
            AssetLocation::Local(path) => geotiff_reader::read_window(path, window),
            other => Err(TileGridError::ObjectNotFound(other.display())),
        }
    }
}

/// `(collection, scene_dir, asset_key)` from `.../<collection>/<scene>/<asset>.tif`
fn split_scene_path(path: &Path) -> Option<(&str, &str, &str)> {
    let asset = path.file_stem()?.to_str()?;
    let scene_dir = path.parent()?;
    let collection = scene_dir.parent()?.file_name()?.to_str()?;
    Some((collection, scene_dir.file_name()?.to_str()?, asset))
}

fn parse_scene_date(dir: &str) -> Option<NaiveDate> {
    let prefix = dir.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}
