//! Tile partitioning.
//!
//! Slices four co-registered composite bands into a row-major grid of
//! `tile_size_px` square tiles. Every tile's transform is the reference
//! transform windowed at the tile's pixel offset, so neighbouring tiles share
//! edges exactly in pixel space.

use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, warn};

use crate::bbox::GridShape;
use crate::config::EdgeTilePolicy;
use crate::error::{Result, TileGridError};
use crate::geotiff_writer::GeoTiffCompression;
use crate::naming::{tile_key, ManifestTile, Stage, TileIndex};
use crate::raster::{BandRaster, Bands, GeoRaster};
use crate::store::ObjectStore;

/// Extension of every GeoTIFF tile key
pub const TILE_EXTENSION: &str = "tif";

/// One grid cell's raster
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub index: TileIndex,
    pub raster: GeoRaster,
}

/// Splits composites into tiles
#[derive(Debug, Clone, Copy)]
pub struct TilePartitioner {
    policy: EdgeTilePolicy,
    compression: GeoTiffCompression,
}

impl TilePartitioner {
    #[must_use]
    pub fn new(policy: EdgeTilePolicy) -> Self {
        Self {
            policy,
            compression: GeoTiffCompression::default(),
        }
    }

    #[must_use]
    pub fn with_compression(mut self, compression: GeoTiffCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Cut the composite into `shape.rows × shape.cols` tiles, Red, Green,
    /// Blue, NIR interleaved, in row-major order.
    ///
    /// Cells that extend past the composite follow the edge policy. Cells
    /// with no composite pixels at all are never emitted under `Clip`.
    ///
    /// # Errors
    /// Returns `InvalidData` if the bands do not share one pixel grid.
    pub fn partition(&self, bands: &Bands<BandRaster>, shape: &GridShape) -> Result<Vec<Tile>> {
        let reference = &bands.red;
        for band in bands.as_array() {
            if band.width != reference.width
                || band.height != reference.height
                || band.data.len() != reference.width * reference.height
            {
                return Err(TileGridError::invalid_data(format!(
                    "bands are not co-registered: {}x{} vs {}x{}",
                    band.width, band.height, reference.width, reference.height
                )));
            }
        }

        let ts = shape.tile_size_px;
        let mut tiles = Vec::with_capacity(shape.tile_count());

        for (row, col) in shape.cells() {
            let row_start = row * ts;
            let col_start = col * ts;
            let avail_h = reference.height.saturating_sub(row_start).min(ts);
            let avail_w = reference.width.saturating_sub(col_start).min(ts);
            let partial = avail_h < ts || avail_w < ts;

            let (out_w, out_h) = match self.policy {
                EdgeTilePolicy::Drop if partial => {
                    debug!(row, col, "Dropping partial edge tile");
                    continue;
                }
                EdgeTilePolicy::Clip if avail_h == 0 || avail_w == 0 => {
                    warn!(row, col, "Grid cell lies outside the composite, not emitted");
                    continue;
                }
                EdgeTilePolicy::Clip => (avail_w, avail_h),
                _ => (ts, ts),
            };

            let mut pixels = vec![reference.nodata; out_w * out_h * 4];
            for y in 0..avail_h.min(out_h) {
                for x in 0..avail_w.min(out_w) {
                    let src = (row_start + y) * reference.width + col_start + x;
                    let dst = (y * out_w + x) * 4;
                    for (b, band) in bands.as_array().into_iter().enumerate() {
                        pixels[dst + b] = band.data[src];
                    }
                }
            }

            #[allow(clippy::cast_precision_loss)]
            let transform = reference
                .transform
                .window_transform(col_start as f64, row_start as f64);

            tiles.push(Tile {
                index: TileIndex::new(row, col),
                raster: GeoRaster {
                    pixels,
                    bands: 4,
                    width: out_w,
                    height: out_h,
                    transform,
                    crs: reference.crs,
                    nodata: Some(reference.nodata),
                },
            });
        }

        Ok(tiles)
    }

    /// Store acquisition tiles for `transaction_id`.
    ///
    /// # Errors
    /// See [`store_tiles`].
    pub fn write(
        &self,
        store: &dyn ObjectStore,
        pool: &ThreadPool,
        transaction_id: &str,
        tiles: &[Tile],
    ) -> Result<Vec<ManifestTile>> {
        store_tiles(store, pool, Stage::Acquisition, transaction_id, tiles, self.compression)
    }
}

/// Encode and store tiles under `{stage}/{txn}/` on the pool.
///
/// Keys are unique per tile so writes need no coordination. Returns manifest
/// entries in row-major order.
///
/// # Errors
/// Returns the first encoding or store error.
pub fn store_tiles(
    store: &dyn ObjectStore,
    pool: &ThreadPool,
    stage: Stage,
    transaction_id: &str,
    tiles: &[Tile],
    compression: GeoTiffCompression,
) -> Result<Vec<ManifestTile>> {
    let mut entries: Vec<ManifestTile> = pool.install(|| {
        tiles
            .par_iter()
            .map(|tile| {
                let key = tile_key(stage, transaction_id, tile.index.row, tile.index.col, TILE_EXTENSION);
                store.put(&key, tile.raster.to_geotiff_bytes_compressed(compression)?)?;
                debug!(key = %key, "Stored tile");
                Ok(ManifestTile {
                    row: tile.index.row,
                    col: tile.index.col,
                    key,
                    width: tile.raster.width,
                    height: tile.raster.height,
                })
            })
            .collect::<Result<Vec<_>>>()
    })?;
    entries.sort_by_key(|e| (e.row, e.col));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeoTransform;
    use crate::mosaic::assemble;
    use crate::naming::scan;
    use crate::pool::worker_pool;
    use crate::store::MemoryStore;

    fn bands(width: usize, height: usize) -> Bands<BandRaster> {
        let transform = GeoTransform::north_up(-46.0, -23.0, 0.001, 0.001);
        let make = |offset: f32| {
            #[allow(clippy::cast_precision_loss)]
            let data = (0..width * height).map(|i| i as f32 + offset).collect();
            BandRaster {
                width,
                height,
                data,
                transform,
                crs: 4326,
                nodata: -9999.0,
            }
        };
        Bands {
            red: make(0.0),
            green: make(1000.0),
            blue: make(2000.0),
            nir: make(3000.0),
        }
    }

    #[test]
    fn test_full_grid_tiles_exactly() {
        let bands = bands(8, 8);
        let shape = GridShape::from_reference_dims(6, 6, 4).unwrap();
        let tiles = TilePartitioner::new(EdgeTilePolicy::PadWithNodata)
            .partition(&bands, &shape)
            .unwrap();
        assert_eq!(tiles.len(), 4);
        assert!(tiles.iter().all(|t| t.raster.width == 4 && t.raster.height == 4));

        // Row-major order
        let order: Vec<_> = tiles.iter().map(|t| (t.index.row, t.index.col)).collect();
        assert_eq!(order, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);

        // Tile (1, 1) starts at composite pixel (4, 4) = index 36
        let t = &tiles[3];
        assert_eq!(t.raster.get(0, 0, 0), 36.0);
        assert_eq!(t.raster.get(0, 0, 3), 3036.0);
    }

    #[test]
    fn test_adjacent_tiles_share_edges() {
        let bands = bands(8, 8);
        let shape = GridShape::from_reference_dims(6, 6, 4).unwrap();
        let tiles = TilePartitioner::new(EdgeTilePolicy::PadWithNodata)
            .partition(&bands, &shape)
            .unwrap();
        let left = tiles[0].raster.transform;
        let right = tiles[1].raster.transform;
        let below = tiles[2].raster.transform;
        assert_eq!(left.apply(4.0, 0.0), right.apply(0.0, 0.0));
        assert_eq!(left.apply(0.0, 4.0), below.apply(0.0, 0.0));
        assert_eq!(right.c, bands.red.transform.window_transform(4.0, 0.0).c);
    }

    #[test]
    fn test_edge_policies() {
        let bands = bands(6, 5);
        let shape = GridShape::from_reference_dims(5, 6, 4).unwrap();
        assert_eq!((shape.rows, shape.cols), (2, 2));

        let padded = TilePartitioner::new(EdgeTilePolicy::PadWithNodata)
            .partition(&bands, &shape)
            .unwrap();
        assert_eq!(padded.len(), 4);
        let corner = &padded[3].raster;
        assert_eq!((corner.width, corner.height), (4, 4));
        assert_eq!(corner.get(1, 0, 0), 29.0);
        assert_eq!(corner.get(2, 0, 0), -9999.0);
        assert_eq!(corner.get(0, 1, 0), -9999.0);

        let clipped = TilePartitioner::new(EdgeTilePolicy::Clip)
            .partition(&bands, &shape)
            .unwrap();
        assert_eq!(clipped.len(), 4);
        assert_eq!((clipped[3].raster.width, clipped[3].raster.height), (2, 1));

        let dropped = TilePartitioner::new(EdgeTilePolicy::Drop)
            .partition(&bands, &shape)
            .unwrap();
        assert_eq!(dropped.len(), 1);
    }

    #[test]
    fn test_partition_roundtrip() {
        // (composite width, height, reference width, height): non-multiple,
        // exact multiple and a short composite
        let cases = [(9, 7, 9, 7), (8, 8, 7, 7), (6, 5, 6, 5)];
        for (width, height, ref_width, ref_height) in cases {
            let bands = bands(width, height);
            let shape = GridShape::from_reference_dims(ref_height, ref_width, 4).unwrap();
            for policy in [EdgeTilePolicy::Clip, EdgeTilePolicy::PadWithNodata] {
                let tiles = TilePartitioner::new(policy).partition(&bands, &shape).unwrap();
                let rasters: Vec<GeoRaster> = tiles.into_iter().map(|t| t.raster).collect();
                let (mosaic, _) = assemble(&rasters, shape.rows, shape.cols).unwrap();

                let expected = match policy {
                    EdgeTilePolicy::Clip => (width, height),
                    _ => (shape.pixel_width(), shape.pixel_height()),
                };
                assert_eq!((mosaic.width, mosaic.height), expected, "{policy:?} {width}x{height}");
                assert_eq!(mosaic.transform, bands.red.transform);

                for y in 0..mosaic.height {
                    for x in 0..mosaic.width {
                        for (b, band) in bands.as_array().into_iter().enumerate() {
                            let value = mosaic.get(x, y, b);
                            if x < width && y < height {
                                assert_eq!(value, band.data[y * width + x], "{policy:?} ({x}, {y}) band {b}");
                            } else {
                                assert_eq!(value, band.nodata, "{policy:?} padding ({x}, {y}) band {b}");
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_mismatched_bands() {
        let mut bands = bands(4, 4);
        bands.nir.width = 3;
        let shape = GridShape::from_reference_dims(4, 4, 4).unwrap();
        assert!(TilePartitioner::new(EdgeTilePolicy::Clip).partition(&bands, &shape).is_err());
    }

    #[test]
    fn test_store_tiles_names_every_cell() {
        let bands = bands(8, 8);
        let shape = GridShape::from_reference_dims(6, 6, 4).unwrap();
        let tiles = TilePartitioner::new(EdgeTilePolicy::PadWithNodata)
            .partition(&bands, &shape)
            .unwrap();
        let store = MemoryStore::new();
        let pool = worker_pool(2).unwrap();
        let entries = store_tiles(
            &store,
            &pool,
            Stage::Acquisition,
            "000001-2024-08-01",
            &tiles,
            GeoTiffCompression::None,
        )
        .unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[1].key, "acquisition/000001-2024-08-01/000001-2024-08-01_000_001.tif");

        let keys = store.list("acquisition/000001-2024-08-01/").unwrap();
        let scan = scan(&keys, Stage::Acquisition, "000001-2024-08-01");
        assert_eq!(scan.shape, Some((shape.rows, shape.cols)));
    }
}
