//! In-memory scene catalog for tests and demos.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;

use super::{extract_window, AssetLocation, BandAsset, Scene, SceneCatalog};
use crate::error::{Result, TileGridError};
use crate::geometry::PixelWindow;
use crate::raster::{GeoRaster, MaskedBand};

/// Catalog holding decoded rasters directly
#[derive(Default)]
pub struct MemorySceneCatalog {
    scenes: Vec<Scene>,
    rasters: HashMap<String, Arc<GeoRaster>>,
}

impl MemorySceneCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scene from `(asset key, raster)` pairs.
    ///
    /// # Errors
    /// Returns `Projection` if an asset footprint cannot be reprojected.
    pub fn add_scene(
        &mut self,
        id: &str,
        collection: &str,
        date: NaiveDate,
        bands: impl IntoIterator<Item = (String, GeoRaster)>,
    ) -> Result<&mut Self> {
        let mut assets = BTreeMap::new();
        for (key, raster) in bands {
            let handle = format!("{id}/{key}");
            let asset = BandAsset::new(
                AssetLocation::Memory(handle.clone()),
                raster.crs,
                raster.transform,
                raster.width,
                raster.height,
                raster.nodata,
            )?;
            self.rasters.insert(handle, Arc::new(raster));
            assets.insert(key, asset);
        }
        self.scenes.push(Scene {
            id: id.to_string(),
            collection: collection.to_string(),
            date,
            assets,
        });
        Ok(self)
    }

    /// Add an asset that cannot be read, to exercise failure isolation
    pub fn add_broken_asset(&mut self, scene_id: &str, key: &str, template: &BandAsset) {
        if let Some(scene) = self.scenes.iter_mut().find(|s| s.id == scene_id) {
            let mut asset = template.clone();
            asset.location = AssetLocation::Memory(format!("{scene_id}/{key}/missing"));
            scene.assets.insert(key.to_string(), asset);
        }
    }
}

impl SceneCatalog for MemorySceneCatalog {
    fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    fn read_window(&self, asset: &BandAsset, window: &PixelWindow) -> Result<MaskedBand> {
        match &asset.location {
            AssetLocation::Memory(handle) => self
                .rasters
                .get(handle)
                .map(|raster| extract_window(raster, 0, window))
                .ok_or_else(|| TileGridError::ObjectNotFound(asset.location.display())),
            other => Err(TileGridError::ObjectNotFound(other.display())),
        }
    }
}
