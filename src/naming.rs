//! Tile naming convention shared by every stage.
//!
//! Tiles are stored as `{stage}/{txn}/{txn}_{row:03}_{col:03}.{ext}`. Stages
//! run independently and only see each other's output through these keys, so
//! both the writer and the reader side of the convention live here:
//!
//! - [`tile_key`] / [`parse_tile_key`]: encode and decode a single key
//! - [`scan`]: recover grid shape and row-major order from a key listing,
//!   reporting malformed keys and holes instead of silently shrinking
//! - [`TileManifest`]: explicit per-stage record of grid shape and keys,
//!   written next to the tiles and cross-checked against the listing

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, TileGridError};
use crate::store::ObjectStore;

/// File name of the per-stage manifest
pub const MANIFEST_FILE: &str = "manifest.json";

/// Pipeline stage owning a key prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Acquisition,
    Enhancement,
    Prediction,
    Report,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Self::Acquisition,
        Self::Enhancement,
        Self::Prediction,
        Self::Report,
    ];

    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Acquisition => "acquisition",
            Self::Enhancement => "image_enhancement",
            Self::Prediction => "predictions",
            Self::Report => "reports",
        }
    }

    #[must_use]
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.prefix() == prefix)
    }

    /// `{stage}/{txn}/`
    #[must_use]
    pub fn transaction_prefix(self, transaction_id: &str) -> String {
        format!("{}/{transaction_id}/", self.prefix())
    }

    /// Key of a flat artifact such as a report image
    #[must_use]
    pub fn artifact_key(self, transaction_id: &str, name: &str) -> String {
        format!("{}{name}", self.transaction_prefix(transaction_id))
    }

    #[must_use]
    pub fn manifest_key(self, transaction_id: &str) -> String {
        self.artifact_key(transaction_id, MANIFEST_FILE)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Grid position of a tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileIndex {
    pub row: usize,
    pub col: usize,
}

impl TileIndex {
    #[must_use]
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

/// Everything encoded in a tile key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileAddress {
    pub stage: Stage,
    pub transaction_id: String,
    pub index: TileIndex,
    pub extension: String,
}

impl TileAddress {
    #[must_use]
    pub fn key(&self) -> String {
        tile_key(
            self.stage,
            &self.transaction_id,
            self.index.row,
            self.index.col,
            &self.extension,
        )
    }

    /// File name part of the key
    #[must_use]
    pub fn file_name(&self) -> String {
        format!(
            "{}_{:03}_{:03}.{}",
            self.transaction_id, self.index.row, self.index.col, self.extension
        )
    }
}

/// Build a tile key; indices are zero-padded to three digits.
#[must_use]
pub fn tile_key(stage: Stage, transaction_id: &str, row: usize, col: usize, extension: &str) -> String {
    format!(
        "{}/{transaction_id}/{transaction_id}_{row:03}_{col:03}.{extension}",
        stage.prefix()
    )
}

/// Decode a tile key.
///
/// # Errors
/// Returns `NamingProtocolViolation` if the key does not follow the
/// convention exactly (unknown stage, mismatched transaction ids, indices not
/// zero-padded digits, missing extension).
pub fn parse_tile_key(key: &str) -> Result<TileAddress> {
    let violation = || TileGridError::NamingProtocolViolation(key.to_string());

    let mut parts = key.split('/');
    let (Some(prefix), Some(folder), Some(file), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(violation());
    };

    let stage = Stage::from_prefix(prefix).ok_or_else(violation)?;
    let (stem, extension) = file.rsplit_once('.').ok_or_else(violation)?;
    if extension.is_empty() {
        return Err(violation());
    }

    let mut fields = stem.rsplitn(3, '_');
    let (Some(col), Some(row), Some(transaction_id)) = (fields.next(), fields.next(), fields.next())
    else {
        return Err(violation());
    };
    if transaction_id != folder || transaction_id.is_empty() {
        return Err(violation());
    }

    let row = parse_index(row).ok_or_else(violation)?;
    let col = parse_index(col).ok_or_else(violation)?;

    Ok(TileAddress {
        stage,
        transaction_id: transaction_id.to_string(),
        index: TileIndex::new(row, col),
        extension: extension.to_string(),
    })
}

fn parse_index(field: &str) -> Option<usize> {
    if field.len() < 3 || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

/// Grid recovered from a key listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridScan {
    /// `(rows, cols)` = `max(index) + 1`, `None` if no tile was found
    pub shape: Option<(usize, usize)>,
    /// Tiles in row-major order
    pub tiles: Vec<TileAddress>,
    /// Keys under the prefix that are not tiles
    pub violations: Vec<String>,
    /// Cells inside the inferred shape with no tile
    pub missing: Vec<TileIndex>,
}

impl GridScan {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.shape.is_some() && self.missing.is_empty()
    }

    /// # Errors
    /// Returns `NoDataFound` for an empty listing and `InvalidData` listing
    /// the holes when any cell is missing.
    pub fn require_complete(&self) -> Result<(usize, usize)> {
        let Some(shape) = self.shape else {
            return Err(TileGridError::NoDataFound("no tiles found".to_string()));
        };
        if !self.missing.is_empty() {
            let holes: Vec<String> = self
                .missing
                .iter()
                .map(|i| format!("{:03}_{:03}", i.row, i.col))
                .collect();
            return Err(TileGridError::invalid_data(format!(
                "{}x{} grid is missing tiles: {}",
                shape.0,
                shape.1,
                holes.join(", ")
            )));
        }
        Ok(shape)
    }
}

/// Recover grid topology from the keys of one stage and transaction.
///
/// Keys outside `{stage}/{txn}/` are ignored, the manifest is skipped, and
/// any other key that fails to parse is logged and recorded as a violation
/// without aborting the scan.
#[must_use]
pub fn scan<S: AsRef<str>>(keys: &[S], stage: Stage, transaction_id: &str) -> GridScan {
    let prefix = stage.transaction_prefix(transaction_id);
    let manifest = stage.manifest_key(transaction_id);

    let mut by_index: BTreeMap<TileIndex, TileAddress> = BTreeMap::new();
    let mut violations = Vec::new();

    for key in keys.iter().map(AsRef::as_ref) {
        if !key.starts_with(&prefix) || key == manifest {
            continue;
        }
        match parse_tile_key(key) {
            Ok(address) => {
                if let Some(previous) = by_index.insert(address.index, address) {
                    warn!(key, previous = %previous.key(), "Duplicate tile index");
                    violations.push(key.to_string());
                }
            }
            Err(e) => {
                warn!(key, error = %e, "Skipping key");
                violations.push(key.to_string());
            }
        }
    }

    let shape = if by_index.is_empty() {
        None
    } else {
        let rows = by_index.keys().map(|i| i.row).max().unwrap_or(0) + 1;
        let cols = by_index.keys().map(|i| i.col).max().unwrap_or(0) + 1;
        Some((rows, cols))
    };

    let missing = shape.map_or_else(Vec::new, |(rows, cols)| {
        (0..rows)
            .flat_map(|row| (0..cols).map(move |col| TileIndex::new(row, col)))
            .filter(|idx| !by_index.contains_key(idx))
            .collect()
    });

    GridScan {
        shape,
        // BTreeMap order on (row, col) is row-major
        tiles: by_index.into_values().collect(),
        violations,
        missing,
    }
}

/// One tile entry in a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestTile {
    pub row: usize,
    pub col: usize,
    pub key: String,
    pub width: usize,
    pub height: usize,
}

/// Explicit record of what a stage wrote for a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileManifest {
    pub transaction_id: String,
    pub stage: Stage,
    pub rows: usize,
    pub cols: usize,
    pub tiles: Vec<ManifestTile>,
    /// Scene ids that contributed to at least one composite band
    #[serde(default)]
    pub scenes: Vec<String>,
    /// Scene ids that failed to read for at least one band
    #[serde(default)]
    pub skipped_scenes: Vec<String>,
}

impl TileManifest {
    /// Persist under `{stage}/{txn}/manifest.json`.
    ///
    /// # Errors
    /// Returns an error if serialization or the store write fails.
    pub fn write(&self, store: &dyn ObjectStore) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        store.put(&self.stage.manifest_key(&self.transaction_id), bytes)
    }

    /// # Errors
    /// Returns `ObjectNotFound` if there is no manifest, or a decoding error.
    pub fn read(store: &dyn ObjectStore, stage: Stage, transaction_id: &str) -> Result<Self> {
        let bytes = store.get(&stage.manifest_key(transaction_id))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Grid of one stage, resolved from its manifest and key listing
#[derive(Debug, Clone)]
pub struct ResolvedGrid {
    pub stage: Stage,
    pub rows: usize,
    pub cols: usize,
    /// Row-major tiles
    pub tiles: Vec<TileAddress>,
    pub manifest: Option<TileManifest>,
}

impl ResolvedGrid {
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}

/// List a stage's keys and resolve its grid.
///
/// When a manifest exists it is authoritative: the listing must contain
/// exactly the manifest's cells, otherwise `GridMismatch` or `InvalidData`
/// is returned. Without a manifest the listing must form a complete
/// rectangle; holes are reported rather than shrinking the grid.
///
/// # Errors
/// Returns `NoDataFound` when nothing is stored under the prefix, or one of
/// the consistency errors above.
pub fn resolve_grid(store: &dyn ObjectStore, stage: Stage, transaction_id: &str) -> Result<ResolvedGrid> {
    let keys = store.list(&stage.transaction_prefix(transaction_id))?;
    let scan = scan(&keys, stage, transaction_id);

    let manifest = if keys.iter().any(|k| *k == stage.manifest_key(transaction_id)) {
        Some(TileManifest::read(store, stage, transaction_id)?)
    } else {
        None
    };

    let (rows, cols) = match &manifest {
        Some(m) => {
            let found = scan.shape.ok_or_else(|| {
                TileGridError::NoDataFound(format!("{stage}/{transaction_id} has a manifest but no tiles"))
            })?;
            if found != (m.rows, m.cols) {
                return Err(TileGridError::GridMismatch {
                    expected: (m.rows, m.cols),
                    found,
                });
            }
            scan.require_complete()?;
            if scan.tiles.len() != m.tiles.len() {
                return Err(TileGridError::invalid_data(format!(
                    "{stage}/{transaction_id}: manifest lists {} tiles, store has {}",
                    m.tiles.len(),
                    scan.tiles.len()
                )));
            }
            (m.rows, m.cols)
        }
        None => scan.require_complete().map_err(|e| match e {
            TileGridError::NoDataFound(_) => {
                TileGridError::NoDataFound(format!("no tiles under {stage}/{transaction_id}/"))
            }
            other => other,
        })?,
    };

    Ok(ResolvedGrid {
        stage,
        rows,
        cols,
        tiles: scan.tiles,
        manifest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const TXN: &str = "000042-2024-08-01";

    fn keys_for(rows: usize, cols: usize) -> Vec<String> {
        let mut keys = Vec::new();
        for row in 0..rows {
            for col in 0..cols {
                keys.push(tile_key(Stage::Acquisition, TXN, row, col, "tif"));
            }
        }
        keys
    }

    #[test]
    fn test_tile_key_format() {
        assert_eq!(
            tile_key(Stage::Acquisition, TXN, 2, 11, "tif"),
            "acquisition/000042-2024-08-01/000042-2024-08-01_002_011.tif"
        );
        assert_eq!(
            tile_key(Stage::Enhancement, TXN, 0, 0, "tif"),
            "image_enhancement/000042-2024-08-01/000042-2024-08-01_000_000.tif"
        );
    }

    #[test]
    fn test_parse_tile_key() {
        let address = parse_tile_key("predictions/000042-2024-08-01/000042-2024-08-01_010_003.tif").unwrap();
        assert_eq!(address.stage, Stage::Prediction);
        assert_eq!(address.transaction_id, TXN);
        assert_eq!(address.index, TileIndex::new(10, 3));
        assert_eq!(address.extension, "tif");
        assert_eq!(address.key(), "predictions/000042-2024-08-01/000042-2024-08-01_010_003.tif");
    }

    #[test]
    fn test_parse_rejects_malformed_keys() {
        for key in [
            "acquisition/000042-2024-08-01/000042-2024-08-01_1_3.tif",
            "acquisition/000042-2024-08-01/000042-2024-08-01_001_003",
            "acquisition/000042-2024-08-01/000001-2024-08-01_001_003.tif",
            "unknown/000042-2024-08-01/000042-2024-08-01_001_003.tif",
            "acquisition/000042-2024-08-01_001_003.tif",
            "acquisition/000042-2024-08-01/x/000042-2024-08-01_001_003.tif",
            "acquisition/000042-2024-08-01/000042-2024-08-01_0a1_003.tif",
        ] {
            let err = parse_tile_key(key).unwrap_err();
            assert_eq!(err.kind().as_str(), "naming_protocol_violation", "{key}");
        }
    }

    #[test]
    fn test_scan_recovers_every_shape() {
        for rows in 1..=4 {
            for cols in 1..=4 {
                let scan = scan(&keys_for(rows, cols), Stage::Acquisition, TXN);
                assert_eq!(scan.shape, Some((rows, cols)));
                assert!(scan.is_complete());
                assert_eq!(scan.tiles.len(), rows * cols);
            }
        }
    }

    #[test]
    fn test_scan_orders_row_major_regardless_of_listing_order() {
        let mut keys = keys_for(3, 2);
        keys.reverse();
        let scan = scan(&keys, Stage::Acquisition, TXN);
        let order: Vec<_> = scan.tiles.iter().map(|t| (t.index.row, t.index.col)).collect();
        assert_eq!(order, vec![(0, 0), (0, 1), (1, 0), (1, 1), (2, 0), (2, 1)]);
    }

    #[test]
    fn test_scan_reports_interior_hole() {
        let mut keys = keys_for(3, 3);
        keys.retain(|k| !k.ends_with("_001_001.tif"));
        let scan = scan(&keys, Stage::Acquisition, TXN);
        assert_eq!(scan.shape, Some((3, 3)));
        assert_eq!(scan.tiles.len(), 8);
        assert_eq!(scan.missing, vec![TileIndex::new(1, 1)]);
        assert!(scan.require_complete().is_err());
    }

    #[test]
    fn test_scan_missing_edge_shrinks_without_manifest() {
        // A whole missing last column is indistinguishable from a smaller grid
        let mut keys = keys_for(3, 3);
        keys.retain(|k| !k.ends_with("_002.tif"));
        let scan = scan(&keys, Stage::Acquisition, TXN);
        assert_eq!(scan.shape, Some((3, 2)));
        assert!(scan.is_complete());
    }

    #[test]
    fn test_scan_skips_violations() {
        let mut keys = keys_for(2, 2);
        keys.push(format!("acquisition/{TXN}/notes.txt"));
        keys.push(format!("acquisition/{TXN}/{MANIFEST_FILE}"));
        keys.push("acquisition/000001-2024-08-01/000001-2024-08-01_005_005.tif".to_string());
        let scan = scan(&keys, Stage::Acquisition, TXN);
        assert_eq!(scan.shape, Some((2, 2)));
        assert_eq!(scan.violations, vec![format!("acquisition/{TXN}/notes.txt")]);
    }

    #[test]
    fn test_resolve_grid_with_manifest_detects_missing_edge() {
        let store = MemoryStore::new();
        let mut tiles = Vec::new();
        for key in keys_for(3, 3) {
            let address = parse_tile_key(&key).unwrap();
            tiles.push(ManifestTile {
                row: address.index.row,
                col: address.index.col,
                key: key.clone(),
                width: 4,
                height: 4,
            });
            if !key.ends_with("_002.tif") {
                store.put(&key, vec![0]).unwrap();
            }
        }
        let manifest = TileManifest {
            transaction_id: TXN.to_string(),
            stage: Stage::Acquisition,
            rows: 3,
            cols: 3,
            tiles,
            scenes: vec![],
            skipped_scenes: vec![],
        };
        manifest.write(&store).unwrap();

        let err = resolve_grid(&store, Stage::Acquisition, TXN).unwrap_err();
        assert_eq!(err.kind().as_str(), "grid_mismatch");
    }

    #[test]
    fn test_resolve_grid_empty() {
        let store = MemoryStore::new();
        let err = resolve_grid(&store, Stage::Prediction, TXN).unwrap_err();
        assert_eq!(err.kind().as_str(), "no_data_found");
    }
}
