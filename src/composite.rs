//! Multi-scene median compositing.
//!
//! Each scene is read only over the requested window (reprojected into the
//! scene's native CRS and snapped to its pixel grid). The per-pixel median of
//! the valid values across scenes suppresses clouds and other transient
//! artifacts; pixels masked in every scene stay masked and are filled with
//! the nodata sentinel.
//!
//! The first scene that reads successfully defines the reference grid
//! (transform, CRS and dimensions); later scenes are assumed co-registered
//! and are conformed to its dimensions without resampling.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::{Scene, SceneCatalog};
use crate::error::{Result, TileGridError};
use crate::geometry::projection::{project_window, WGS84};
use crate::geometry::{GeoTransform, GeoWindow, PixelWindow};
use crate::raster::{BandName, BandRaster, Bands, MaskedBand};

/// One scene's window of one band
#[derive(Debug, Clone)]
pub struct SceneRead {
    pub scene_id: String,
    pub band: MaskedBand,
    pub transform: GeoTransform,
    pub crs: i32,
}

/// A scene that could not be read for a band
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneFailure {
    pub scene_id: String,
    pub message: String,
}

/// Median composite of one band plus its provenance
#[derive(Debug, Clone)]
pub struct Composite {
    pub raster: BandRaster,
    /// Scenes whose window was read, in input order
    pub contributing: Vec<String>,
    pub failures: Vec<SceneFailure>,
}

/// Reads scene windows from a catalog and reduces them to a median composite.
pub struct SceneCompositor<'a, C: SceneCatalog + ?Sized> {
    catalog: &'a C,
    nodata: f32,
}

impl<'a, C: SceneCatalog + ?Sized> SceneCompositor<'a, C> {
    pub fn new(catalog: &'a C, nodata: f32) -> Self {
        Self { catalog, nodata }
    }

    /// Read `asset_key` from every scene over a WGS84 window.
    ///
    /// Failures are isolated per scene: they are logged and returned
    /// alongside the successful reads instead of aborting.
    #[must_use]
    pub fn read_scenes(
        &self,
        scenes: &[&Scene],
        asset_key: &str,
        window: &GeoWindow,
    ) -> (Vec<SceneRead>, Vec<SceneFailure>) {
        let mut reads = Vec::with_capacity(scenes.len());
        let mut failures = Vec::new();

        for scene in scenes {
            match self.read_scene(scene, asset_key, window) {
                Ok(read) => {
                    debug!(
                        scene = %scene.id,
                        asset = asset_key,
                        width = read.band.width,
                        height = read.band.height,
                        "Read scene window"
                    );
                    reads.push(read);
                }
                Err(e) => {
                    warn!(scene = %scene.id, asset = asset_key, error = %e, "Skipping scene");
                    failures.push(SceneFailure {
                        scene_id: scene.id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
        (reads, failures)
    }

    fn read_scene(&self, scene: &Scene, asset_key: &str, window: &GeoWindow) -> Result<SceneRead> {
        let asset = scene.asset(asset_key).ok_or_else(|| {
            TileGridError::ObjectNotFound(format!("{} has no asset {asset_key}", scene.id))
        })?;
        let native = project_window(window, WGS84, asset.crs)?;
        let pixels = PixelWindow::from_bounds(&native, &asset.transform)?;
        let band = self.catalog.read_window(asset, &pixels)?;
        Ok(SceneRead {
            scene_id: scene.id.clone(),
            band,
            transform: pixels.transform_within(&asset.transform),
            crs: asset.crs,
        })
    }

    /// Composite one band over `window`.
    ///
    /// # Errors
    /// Returns `NoDataFound` when `scenes` is empty and `PartialFetchFailure`
    /// when no scene could be read for this band.
    pub fn composite(
        &self,
        scenes: &[&Scene],
        band: BandName,
        asset_key: &str,
        window: &GeoWindow,
    ) -> Result<Composite> {
        if scenes.is_empty() {
            return Err(TileGridError::NoDataFound(format!(
                "no scenes to composite for {asset_key}"
            )));
        }

        let (reads, failures) = self.read_scenes(scenes, asset_key, window);
        let Some(reference) = reads.first() else {
            return Err(TileGridError::PartialFetchFailure {
                band: band.description().to_string(),
                message: format!(
                    "all {} scenes failed for asset {asset_key}",
                    scenes.len()
                ),
            });
        };

        let stack: Vec<&MaskedBand> = reads.iter().map(|r| &r.band).collect();
        let median = masked_median(&stack);

        Ok(Composite {
            raster: BandRaster {
                width: median.width,
                height: median.height,
                data: median.filled(self.nodata),
                transform: reference.transform,
                crs: reference.crs,
                nodata: self.nodata,
            },
            contributing: reads.iter().map(|r| r.scene_id.clone()).collect(),
            failures,
        })
    }

    /// Composite all four bands. Each band takes its reference grid from its
    /// own first readable scene.
    ///
    /// # Errors
    /// See [`Self::composite`]; also `InvalidData` if the bands end up on
    /// different pixel grids.
    pub fn composite_bands(
        &self,
        scenes: &[&Scene],
        assets: &Bands<String>,
        window: &GeoWindow,
    ) -> Result<Bands<Composite>> {
        let composites =
            Bands::try_from_fn(|band| self.composite(scenes, band, assets.get(band), window))?;

        let red = &composites.red.raster;
        for (band, c) in BandName::ALL.iter().zip(composites.as_array()) {
            let r = &c.raster;
            if (r.width, r.height) != (red.width, red.height) || r.crs != red.crs {
                return Err(TileGridError::invalid_data(format!(
                    "{} composite is {}x{} EPSG:{}, Red is {}x{} EPSG:{}",
                    band.description(),
                    r.width,
                    r.height,
                    r.crs,
                    red.width,
                    red.height,
                    red.crs
                )));
            }
        }
        Ok(composites)
    }
}

/// Per-pixel median over the valid values of a scene stack.
///
/// The output has the first band's dimensions; other bands are conformed
/// (cropped or padded with masked pixels). An even number of valid values
/// yields the mean of the two middle values.
#[must_use]
pub fn masked_median(stack: &[&MaskedBand]) -> MaskedBand {
    let Some(first) = stack.first() else {
        return MaskedBand::masked(0, 0);
    };
    let (width, height) = (first.width, first.height);

    let conformed: Vec<MaskedBand>;
    let layers: Vec<&MaskedBand> = if stack.iter().all(|b| b.width == width && b.height == height) {
        stack.to_vec()
    } else {
        conformed = stack.iter().map(|b| b.conform(width, height)).collect();
        conformed.iter().collect()
    };

    let mut out = MaskedBand::masked(width, height);
    if width == 0 {
        return out;
    }
    out.data
        .par_chunks_mut(width)
        .zip(out.mask.par_chunks_mut(width))
        .enumerate()
        .for_each(|(row, (data, mask))| {
            let mut values = Vec::with_capacity(layers.len());
            for col in 0..width {
                values.clear();
                values.extend(layers.iter().filter_map(|b| b.get(col, row)));
                if let Some(m) = median(&mut values) {
                    data[col] = m;
                    mask[col] = false;
                }
            }
        });
    out
}

fn median(values: &mut [f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable_by(f32::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemorySceneCatalog;
    use crate::raster::GeoRaster;
    use chrono::NaiveDate;

    fn band(values: &[f32], width: usize) -> MaskedBand {
        MaskedBand::from_values(width, values.len() / width, values.to_vec(), Some(-9999.0))
    }

    #[test]
    fn test_median_odd_even_and_masked() {
        let a = band(&[1.0, 5.0, -9999.0, 2.0], 4);
        let b = band(&[3.0, -9999.0, -9999.0, 4.0], 4);
        let c = band(&[2.0, 7.0, -9999.0, 9.0], 4);
        let m = masked_median(&[&a, &b, &c]);
        assert_eq!(m.get(0, 0), Some(2.0));
        assert_eq!(m.get(1, 0), Some(6.0));
        assert_eq!(m.get(2, 0), None);
        assert_eq!(m.get(3, 0), Some(4.0));
        assert_eq!(m.filled(-9999.0)[2], -9999.0);
    }

    #[test]
    fn test_median_conforms_to_first() {
        let a = band(&[1.0, 1.0, 1.0, 1.0], 2);
        let b = band(&[3.0, 3.0, 3.0], 3);
        let m = masked_median(&[&a, &b]);
        assert_eq!((m.width, m.height), (2, 2));
        assert_eq!(m.get(0, 0), Some(2.0));
        assert_eq!(m.get(0, 1), Some(1.0));
    }

    fn scene_raster(value: f32) -> GeoRaster {
        let mut pixels = vec![value; 100];
        // A "cloud" in one corner
        pixels[0] = -9999.0;
        GeoRaster {
            pixels,
            bands: 1,
            width: 10,
            height: 10,
            transform: GeoTransform::north_up(0.0, 10.0, 1.0, 1.0),
            crs: WGS84,
            nodata: Some(-9999.0),
        }
    }

    fn catalog() -> MemorySceneCatalog {
        let mut catalog = MemorySceneCatalog::new();
        let date = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        for (id, value) in [("a", 1.0), ("b", 5.0), ("c", 3.0)] {
            catalog
                .add_scene(id, "C", date, [("B04".to_string(), scene_raster(value))])
                .unwrap();
        }
        catalog
    }

    #[test]
    fn test_composite_reads_window_only() {
        let catalog = catalog();
        let scenes: Vec<&Scene> = catalog.scenes().iter().collect();
        let compositor = SceneCompositor::new(&catalog, -9999.0);

        let window = GeoWindow::new(2.0, 3.0, 6.0, 8.0);
        let c = compositor.composite(&scenes, BandName::Red, "B04", &window).unwrap();
        assert_eq!((c.raster.width, c.raster.height), (4, 5));
        assert_eq!(c.raster.transform, GeoTransform::north_up(2.0, 8.0, 1.0, 1.0));
        assert!(c.raster.data.iter().all(|&v| (v - 3.0).abs() < f32::EPSILON));
        assert_eq!(c.contributing, vec!["a", "b", "c"]);
        assert!(c.failures.is_empty());
    }

    #[test]
    fn test_composite_fills_all_masked_pixel() {
        let catalog = catalog();
        let scenes: Vec<&Scene> = catalog.scenes().iter().collect();
        let compositor = SceneCompositor::new(&catalog, -9999.0);
        let c = compositor
            .composite(&scenes, BandName::Red, "B04", &GeoWindow::new(0.0, 8.0, 2.0, 10.0))
            .unwrap();
        assert_eq!(c.raster.get(0, 0), -9999.0);
        assert_eq!(c.raster.get(1, 0), 3.0);
    }

    #[test]
    fn test_composite_isolates_failing_scene() {
        let mut catalog = catalog();
        let template = catalog.scenes()[0].asset("B04").unwrap().clone();
        catalog.add_broken_asset("b", "B04", &template);
        let scenes: Vec<&Scene> = catalog.scenes().iter().collect();
        let compositor = SceneCompositor::new(&catalog, -9999.0);

        let c = compositor
            .composite(&scenes, BandName::Red, "B04", &GeoWindow::new(2.0, 2.0, 4.0, 4.0))
            .unwrap();
        assert_eq!(c.contributing, vec!["a", "c"]);
        assert_eq!(c.failures.len(), 1);
        assert_eq!(c.failures[0].scene_id, "b");
        assert!(c.raster.data.iter().all(|&v| (v - 2.0).abs() < f32::EPSILON));
    }

    #[test]
    fn test_composite_all_failed() {
        let catalog = catalog();
        let scenes: Vec<&Scene> = catalog.scenes().iter().collect();
        let compositor = SceneCompositor::new(&catalog, -9999.0);
        let err = compositor
            .composite(&scenes, BandName::Nir, "B08", &GeoWindow::new(2.0, 2.0, 4.0, 4.0))
            .unwrap_err();
        assert_eq!(err.kind().as_str(), "partial_fetch_failure");

        let err = compositor
            .composite(&[], BandName::Nir, "B08", &GeoWindow::new(2.0, 2.0, 4.0, 4.0))
            .unwrap_err();
        assert_eq!(err.kind().as_str(), "no_data_found");
    }
}
