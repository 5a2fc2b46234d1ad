#![doc = include_str!("../README.md")]
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`bbox`]: Center point + distances → geographic window → grid shape
//! - [`catalog`]: Scene discovery via the [`SceneCatalog`] trait
//! - [`composite`]: Cloud-suppressing median compositing with [`SceneCompositor`]
//! - [`partition`]: Row-major tiling with [`TilePartitioner`]
//! - [`naming`]: Tile keys, grid recovery from listings, stage manifests
//! - [`resample`]: Per-tile bicubic upscaling
//! - [`inference`]: Normalization and thresholding around a [`SegmentationModel`]
//! - [`mosaic`]: Mosaic reconstruction, rendering and overlay
//! - [`stats`]: Per-cell coverage statistics
//! - [`transaction`]: Run identifiers backed by a [`SequenceSource`]
//! - [`store`]: Object store abstraction (memory and local filesystem)
//! - [`pipeline`]: Stage drivers tying the above together
//! - [`geometry`]: Windows, affine transforms, geodesics and projections
//! - [`geotiff_writer`] / [`geotiff_reader`]: Float32 GeoTIFF tile codec
//! - [`band_cache`]: Global LRU cache for decoded scene band chunks

// ============================================================================
// Public modules
// ============================================================================

pub mod band_cache;
pub mod bbox;
pub mod casting;
pub mod catalog;
pub mod composite;
pub mod config;
pub mod error;
pub mod geometry;
pub mod geotiff_reader;
pub mod geotiff_writer;
pub mod inference;
pub mod mosaic;
pub mod naming;
pub mod partition;
pub mod pipeline;
pub mod pool;
pub mod raster;
pub mod resample;
pub mod stats;
pub mod store;
pub mod transaction;

// ============================================================================
// Errors & Configuration
// ============================================================================

pub use error::{ErrorKind, Result, TileGridError};
pub use config::{EdgeTilePolicy, PipelineConfig};

// ============================================================================
// Geometry & Projections
// ============================================================================

pub use geometry::{GeoTransform, GeoWindow, PixelWindow};
pub use geometry::geodesic::{destination, distance_m};
pub use geometry::projection::{
    project_point,
    project_window,
    get_proj_string,
    is_geographic_crs,
    WGS84,
};

// ============================================================================
// Grid Layout
// ============================================================================

pub use bbox::{
    AreaRequest,
    BoundingBoxResolver,
    CenterPoint,
    GridLayout,
    GridShape,
};

// ============================================================================
// Rasters
// ============================================================================

pub use raster::{BandName, BandRaster, Bands, GeoRaster, MaskedBand};

// ============================================================================
// Scene Discovery & Compositing
// ============================================================================

pub use catalog::{
    AssetLocation,
    BandAsset,
    DateRange,
    LocalSceneCatalog,
    LocalScanOptions,
    MemorySceneCatalog,
    Scene,
    SceneCatalog,
    SearchQuery,
};
pub use composite::{masked_median, Composite, SceneCompositor, SceneFailure};

// ============================================================================
// Tiling & Naming
// ============================================================================

pub use partition::{store_tiles, Tile, TilePartitioner};
pub use naming::{
    parse_tile_key,
    resolve_grid,
    scan,
    tile_key,
    GridScan,
    ManifestTile,
    ResolvedGrid,
    Stage,
    TileAddress,
    TileIndex,
    TileManifest,
};

// ============================================================================
// Per-tile Stages
// ============================================================================

pub use resample::resample_bicubic;
pub use inference::{normalize_bands, Predictor, SegmentationModel};

// ============================================================================
// Reconstruction & Reporting
// ============================================================================

pub use mosaic::{
    assemble,
    encode_png,
    overlay,
    render_input,
    render_prediction,
    MosaicLayout,
    MosaicReconstructor,
    OverlayStyle,
    Reconstruction,
};
pub use stats::{CellStatistics, StatisticsAggregator, StatisticsTable};

// ============================================================================
// Storage & Transactions
// ============================================================================

pub use store::{LocalStore, MemoryStore, ObjectStore, SequenceSource, StoreSequence};
pub use transaction::{Transaction, TransactionFactory};

// ============================================================================
// Pipeline
// ============================================================================

pub use pipeline::{AcquisitionOutcome, Pipeline, ReportArtifacts};

// ============================================================================
// GeoTIFF I/O
// ============================================================================

pub use geotiff_writer::{GeoTiffCompression, GeoTiffWriter};
pub use geotiff_reader::{read_geotiff, read_geotiff_bytes, read_header, read_window, RasterHeader};
