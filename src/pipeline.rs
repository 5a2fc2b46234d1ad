//! Stage drivers.
//!
//! Each stage is invoked on its own with a transaction id and talks to the
//! others only through the object store:
//!
//! | stage    | reads                   | writes                           |
//! |----------|-------------------------|----------------------------------|
//! | acquire  | scene catalog           | `acquisition/{txn}/`             |
//! | enhance  | `acquisition/{txn}/`    | `image_enhancement/{txn}/`       |
//! | predict  | `image_enhancement/…`   | `predictions/{txn}/`             |
//! | report   | enhancement+predictions | `reports/{txn}/` PNGs and JSON   |
//!
//! Every tile stage also writes a manifest recording the grid it produced.

use std::collections::BTreeSet;
use std::time::Instant;

use image::DynamicImage;
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, info, warn};

use crate::bbox::{AreaRequest, BoundingBoxResolver};
use crate::catalog::{DateRange, SceneCatalog, SearchQuery};
use crate::composite::SceneCompositor;
use crate::config::PipelineConfig;
use crate::error::{Result, TileGridError};
use crate::geotiff_reader::read_geotiff_bytes;
use crate::inference::{Predictor, SegmentationModel};
use crate::mosaic::{encode_png, overlay, render_input, render_prediction, MosaicReconstructor, OverlayStyle};
use crate::naming::{resolve_grid, ManifestTile, Stage, TileAddress, TileManifest};
use crate::partition::TilePartitioner;
use crate::pool::worker_pool;
use crate::raster::{BandName, GeoRaster};
use crate::resample::resample_bicubic;
use crate::stats::{StatisticsAggregator, StatisticsTable};
use crate::store::{ObjectStore, SequenceSource};
use crate::transaction::{Transaction, TransactionFactory};

/// Report artifact names under `reports/{txn}/`
pub const INPUT_PNG: &str = "input.png";
pub const PREDICTION_PNG: &str = "prediction.png";
pub const OVERLAY_PNG: &str = "overlay.png";
pub const STATISTICS_JSON: &str = "statistics.json";

/// Result of an acquisition request
#[derive(Debug, Clone)]
pub enum AcquisitionOutcome {
    /// Tiles and manifest were written
    Completed {
        transaction: Transaction,
        manifest: TileManifest,
    },
    /// The scene search matched nothing; no tiles were written
    NoData { transaction: Transaction },
}

impl AcquisitionOutcome {
    #[must_use]
    pub fn transaction(&self) -> &Transaction {
        match self {
            Self::Completed { transaction, .. } | Self::NoData { transaction } => transaction,
        }
    }
}

/// Keys and content of a finished report
#[derive(Debug, Clone)]
pub struct ReportArtifacts {
    pub input_key: String,
    pub prediction_key: String,
    pub overlay_key: String,
    pub statistics_key: String,
    pub statistics: StatisticsTable,
}

/// Runs stages against one store with one configuration
pub struct Pipeline<'a> {
    config: PipelineConfig,
    store: &'a dyn ObjectStore,
    pool: ThreadPool,
}

impl<'a> Pipeline<'a> {
    /// # Errors
    /// Returns `InvalidParameter` for an invalid configuration, or `Io` if the
    /// worker pool cannot start.
    pub fn new(config: PipelineConfig, store: &'a dyn ObjectStore) -> Result<Self> {
        config.validate()?;
        let pool = worker_pool(config.workers)?;
        Ok(Self { config, store, pool })
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Fetch, composite and partition imagery for an area.
    ///
    /// The request is fully validated before a transaction is allocated. An
    /// empty scene search is not an error: it yields
    /// [`AcquisitionOutcome::NoData`] with the allocated transaction.
    ///
    /// # Errors
    /// Returns `InvalidParameter` for a bad date range or a window crossing
    /// the antimeridian, `PartialFetchFailure`
    /// if a band cannot be read from any scene, or any store error.
    pub fn acquire<C, Q>(
        &self,
        catalog: &C,
        transactions: &TransactionFactory<Q>,
        request: &AreaRequest,
        datetime_range: Option<&str>,
    ) -> Result<AcquisitionOutcome>
    where
        C: SceneCatalog + ?Sized,
        Q: SequenceSource,
    {
        let start = Instant::now();
        let datetime = DateRange::parse(datetime_range.unwrap_or(&self.config.datetime_range))?;

        let original = BoundingBoxResolver::original_window(request)?;
        let transaction = transactions.create()?;
        let txn = transaction.id();
        info!(
            transaction_id = %txn,
            lat = request.center.lat,
            lon = request.center.lon,
            ns_km = request.ns_distance_km,
            we_km = request.we_distance_km,
            "Starting acquisition"
        );

        let query = SearchQuery {
            collection: self.config.collection.clone(),
            bbox: original,
            datetime,
        };
        let scenes = catalog.search(&query);
        if scenes.is_empty() {
            warn!(transaction_id = %txn, collection = %query.collection, "No scenes found");
            return Ok(AcquisitionOutcome::NoData { transaction });
        }
        info!(transaction_id = %txn, scenes = scenes.len(), "Found scenes");

        let compositor = SceneCompositor::new(catalog, self.config.nodata);
        let reference = self.pool.install(|| {
            compositor.composite(&scenes, BandName::Red, &self.config.band_assets.red, &original)
        })?;
        let (layout, extended) = BoundingBoxResolver::extended_window(
            &original,
            reference.raster.height,
            reference.raster.width,
            self.config.tile_size_px,
        )?;
        info!(
            transaction_id = %txn,
            rows = layout.shape.rows,
            cols = layout.shape.cols,
            reference_width = reference.raster.width,
            reference_height = reference.raster.height,
            "Derived tile grid"
        );

        let composites = self
            .pool
            .install(|| compositor.composite_bands(&scenes, &self.config.band_assets, &extended))?;

        let mut contributing = BTreeSet::new();
        let mut skipped = BTreeSet::new();
        for c in composites.as_array() {
            contributing.extend(c.contributing.iter().cloned());
            skipped.extend(c.failures.iter().map(|f| f.scene_id.clone()));
        }

        let bands = composites.map(|_, c| c.raster);
        let partitioner =
            TilePartitioner::new(self.config.edge_policy).with_compression(self.config.tile_compression);
        let tiles = partitioner.partition(&bands, &layout.shape)?;
        if tiles.is_empty() {
            return Err(TileGridError::NoDataFound(format!(
                "no tiles left for {txn} under the {:?} edge policy",
                self.config.edge_policy
            )));
        }
        let entries = partitioner.write(self.store, &self.pool, &txn, &tiles)?;

        let mut manifest = manifest_for(Stage::Acquisition, &txn, entries);
        manifest.scenes = contributing.into_iter().collect();
        manifest.skipped_scenes = skipped.into_iter().collect();
        manifest.write(self.store)?;

        info!(
            transaction_id = %txn,
            tiles = manifest.tiles.len(),
            elapsed = ?start.elapsed(),
            "Acquisition completed"
        );
        Ok(AcquisitionOutcome::Completed { transaction, manifest })
    }

    /// Upscale every acquisition tile by the configured factor.
    ///
    /// # Errors
    /// Returns `InvalidParameter` for a malformed transaction id, the grid
    /// resolution errors of the acquisition tiles, or the first tile error.
    pub fn enhance(&self, transaction_id: &str) -> Result<TileManifest> {
        let scale = self.config.scale_factor;
        self.map_tiles(Stage::Acquisition, Stage::Enhancement, transaction_id, |tile| {
            resample_bicubic(&tile, scale)
        })
    }

    /// Run `model` over every enhanced tile and store thresholded masks.
    ///
    /// # Errors
    /// Like [`Self::enhance`], plus model errors.
    pub fn predict<M: SegmentationModel + ?Sized>(&self, transaction_id: &str, model: &M) -> Result<TileManifest> {
        let predictor = Predictor::new(model, self.config.threshold);
        self.map_tiles(Stage::Enhancement, Stage::Prediction, transaction_id, |tile| {
            predictor.predict(&tile)
        })
    }

    /// Reconstruct mosaics and statistics and store the report artifacts.
    ///
    /// # Errors
    /// Returns `GridMismatch` if the enhancement and prediction grids differ,
    /// or any reconstruction, encoding or store error.
    pub fn report(&self, transaction_id: &str) -> Result<ReportArtifacts> {
        let start = Instant::now();
        Transaction::parse(transaction_id)?;
        info!(transaction_id, "Starting report");

        let reconstruction = MosaicReconstructor::new(self.store, &self.pool).reconstruct(transaction_id)?;

        let input = render_input(&reconstruction.input)?;
        let prediction = render_prediction(&reconstruction.prediction)?;
        let style = OverlayStyle {
            highlight: self.config.overlay_color,
            grid: self.config.grid_color,
        };
        let overlaid = overlay(&input, &prediction, &reconstruction.layout, &style)?;

        let statistics = StatisticsAggregator::new(self.config.ground_sample_distance_m).aggregate(
            &reconstruction.prediction_tiles,
            reconstruction.rows,
            reconstruction.cols,
        )?;

        let key = |name: &str| Stage::Report.artifact_key(transaction_id, name);
        let artifacts = ReportArtifacts {
            input_key: key(INPUT_PNG),
            prediction_key: key(PREDICTION_PNG),
            overlay_key: key(OVERLAY_PNG),
            statistics_key: key(STATISTICS_JSON),
            statistics,
        };

        self.store
            .put(&artifacts.input_key, encode_png(&DynamicImage::ImageRgb8(input))?)?;
        self.store
            .put(&artifacts.prediction_key, encode_png(&DynamicImage::ImageLuma8(prediction))?)?;
        self.store
            .put(&artifacts.overlay_key, encode_png(&DynamicImage::ImageRgb8(overlaid))?)?;
        self.store
            .put(&artifacts.statistics_key, artifacts.statistics.to_json()?)?;

        info!(
            transaction_id,
            cells = artifacts.statistics.cells.len(),
            positive_pixels = artifacts.statistics.positive_pixels(),
            elapsed = ?start.elapsed(),
            "Report completed"
        );
        Ok(artifacts)
    }

    /// Read every tile of `from`, transform it, and store the result under
    /// the same cell in `to`.
    fn map_tiles<F>(&self, from: Stage, to: Stage, transaction_id: &str, f: F) -> Result<TileManifest>
    where
        F: Fn(GeoRaster) -> Result<GeoRaster> + Sync,
    {
        let start = Instant::now();
        Transaction::parse(transaction_id)?;
        info!(transaction_id, from = %from, to = %to, "Starting stage");

        let grid = resolve_grid(self.store, from, transaction_id)?;
        let entries: Vec<ManifestTile> = self.pool.install(|| {
            grid.tiles
                .par_iter()
                .map(|address| {
                    let source = address.key();
                    let output = f(read_geotiff_bytes(&self.store.get(&source)?)?)?;
                    let target = TileAddress {
                        stage: to,
                        ..address.clone()
                    }
                    .key();
                    self.store
                        .put(&target, output.to_geotiff_bytes_compressed(self.config.tile_compression)?)?;
                    debug!(source = %source, target = %target, width = output.width, height = output.height, "Processed tile");
                    Ok(ManifestTile {
                        row: address.index.row,
                        col: address.index.col,
                        key: target,
                        width: output.width,
                        height: output.height,
                    })
                })
                .collect::<Result<_>>()
        })?;

        let manifest = manifest_for(to, transaction_id, entries);
        manifest.write(self.store)?;
        info!(
            transaction_id,
            stage = %to,
            tiles = manifest.tiles.len(),
            elapsed = ?start.elapsed(),
            "Stage completed"
        );
        Ok(manifest)
    }
}

/// Manifest whose shape is the extent of the tiles actually written
fn manifest_for(stage: Stage, transaction_id: &str, mut tiles: Vec<ManifestTile>) -> TileManifest {
    tiles.sort_by_key(|t| (t.row, t.col));
    let rows = tiles.iter().map(|t| t.row + 1).max().unwrap_or(0);
    let cols = tiles.iter().map(|t| t.col + 1).max().unwrap_or(0);
    TileManifest {
        transaction_id: transaction_id.to_string(),
        stage,
        rows,
        cols,
        tiles,
        scenes: Vec::new(),
        skipped_scenes: Vec::new(),
    }
}
