//! Bounding box and grid shape resolution.
//!
//! A request is a center point plus north-south / east-west ground distances.
//! Resolution happens in two passes:
//!
//! 1. [`BoundingBoxResolver::original_window`] projects the center along the
//!    four cardinal geodesics to get the requested lon/lat window.
//! 2. Once a reference band has been read over that window, its pixel size
//!    fixes the [`GridShape`] and the angular span of one tile row/column.
//!    [`BoundingBoxResolver::extended_window`] then widens the window by half
//!    a row/column on every side so edge tiles receive full source pixels.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TileGridError};
use crate::geometry::geodesic::destination;
use crate::geometry::GeoWindow;

/// Validated `(lat, lon)` center point in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CenterPoint {
    pub lat: f64,
    pub lon: f64,
}

impl CenterPoint {
    /// # Errors
    /// Returns `InvalidParameter` for non-finite or out-of-range coordinates.
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(TileGridError::invalid_parameter(format!(
                "latitude {lat} is outside [-90, 90]"
            )));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(TileGridError::invalid_parameter(format!(
                "longitude {lon} is outside [-180, 180]"
            )));
        }
        Ok(Self { lat, lon })
    }

    /// Parse a `[latitude, longitude]` pair as received from a request body.
    ///
    /// # Errors
    /// Returns `InvalidParameter` unless exactly two valid values are given.
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        match values {
            [lat, lon] => Self::new(*lat, *lon),
            _ => Err(TileGridError::invalid_parameter(format!(
                "center point must be [latitude, longitude], got {} values",
                values.len()
            ))),
        }
    }
}

/// Requested area around a center point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AreaRequest {
    pub center: CenterPoint,
    pub ns_distance_km: f64,
    pub we_distance_km: f64,
}

impl AreaRequest {
    /// # Errors
    /// Returns `InvalidParameter` unless both distances are finite and positive.
    pub fn new(center: CenterPoint, ns_distance_km: f64, we_distance_km: f64) -> Result<Self> {
        for (name, value) in [("ns_distance_km", ns_distance_km), ("we_distance_km", we_distance_km)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(TileGridError::invalid_parameter(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        Ok(Self {
            center,
            ns_distance_km,
            we_distance_km,
        })
    }
}

/// Tile grid dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridShape {
    pub rows: usize,
    pub cols: usize,
    pub tile_size_px: usize,
}

impl GridShape {
    /// Grid covering a reference band of `height` × `width` pixels.
    ///
    /// `rows = floor(height / tile) + 1`, likewise for columns. The extra
    /// row/column is always added, even when the band divides evenly.
    ///
    /// # Errors
    /// Returns `InvalidParameter` for a zero tile size.
    pub fn from_reference_dims(height: usize, width: usize, tile_size_px: usize) -> Result<Self> {
        if tile_size_px == 0 {
            return Err(TileGridError::invalid_parameter("tile size must be positive"));
        }
        Ok(Self {
            rows: height / tile_size_px + 1,
            cols: width / tile_size_px + 1,
            tile_size_px,
        })
    }

    #[must_use]
    pub fn tile_count(&self) -> usize {
        self.rows * self.cols
    }

    /// Pixel height of the full grid
    #[must_use]
    pub fn pixel_height(&self) -> usize {
        self.rows * self.tile_size_px
    }

    /// Pixel width of the full grid
    #[must_use]
    pub fn pixel_width(&self) -> usize {
        self.cols * self.tile_size_px
    }

    /// `(row, col)` pairs in row-major order
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.rows).flat_map(move |row| (0..self.cols).map(move |col| (row, col)))
    }
}

/// Grid shape plus the angular size of one tile row and column
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridLayout {
    pub shape: GridShape,
    pub ns_deg_per_row: f64,
    pub we_deg_per_col: f64,
}

/// Turns requests into lon/lat windows and grid layouts
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundingBoxResolver;

impl BoundingBoxResolver {
    /// Window spanning half the requested distances along bearings
    /// 0/180/90/270 from the center.
    ///
    /// # Errors
    /// Returns `InvalidParameter` if the window would cross the antimeridian,
    /// where the wrapped west edge ends up east of the east edge.
    pub fn original_window(request: &AreaRequest) -> Result<GeoWindow> {
        let CenterPoint { lat, lon } = request.center;
        let half_ns_m = request.ns_distance_km * 1000.0 / 2.0;
        let half_we_m = request.we_distance_km * 1000.0 / 2.0;

        let (north, _) = destination(lat, lon, 0.0, half_ns_m);
        let (south, _) = destination(lat, lon, 180.0, half_ns_m);
        let (_, east) = destination(lat, lon, 90.0, half_we_m);
        let (_, west) = destination(lat, lon, 270.0, half_we_m);

        if west >= east {
            return Err(TileGridError::invalid_parameter(format!(
                "window around ({lat}, {lon}) crosses the antimeridian (west {west}, east {east})"
            )));
        }
        Ok(GeoWindow::new(west, south, east, north))
    }

    /// Derive the grid from a reference band read over `original`, and the
    /// window to fetch all four bands over.
    ///
    /// The extension is half of one row's (column's) angular span, where that
    /// span is the original window divided by `pixels / tile_size`. It relies
    /// on the reference band's measured pixel density, so it cannot be
    /// computed from the original window alone.
    ///
    /// # Errors
    /// Returns `InvalidParameter` for a zero tile size, an empty reference band
    /// or an extension past ±180° longitude.
    pub fn extended_window(
        original: &GeoWindow,
        reference_height: usize,
        reference_width: usize,
        tile_size_px: usize,
    ) -> Result<(GridLayout, GeoWindow)> {
        if reference_height == 0 || reference_width == 0 {
            return Err(TileGridError::invalid_parameter("reference band is empty"));
        }
        let shape = GridShape::from_reference_dims(reference_height, reference_width, tile_size_px)?;

        #[allow(clippy::cast_precision_loss)]
        let ratio_height = reference_height as f64 / tile_size_px as f64;
        #[allow(clippy::cast_precision_loss)]
        let ratio_width = reference_width as f64 / tile_size_px as f64;

        let ns_deg_per_row = original.height() / ratio_height;
        let we_deg_per_col = original.width() / ratio_width;

        let extended = original.extend(we_deg_per_col / 2.0, ns_deg_per_row / 2.0);
        if extended.west < -180.0 || extended.east > 180.0 {
            return Err(TileGridError::invalid_parameter(format!(
                "extended window {:.6}..{:.6} crosses the antimeridian",
                extended.west, extended.east
            )));
        }
        Ok((
            GridLayout {
                shape,
                ns_deg_per_row,
                we_deg_per_col,
            },
            extended,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::geodesic::distance_m;

    fn request(lat: f64, lon: f64, ns: f64, we: f64) -> AreaRequest {
        AreaRequest::new(CenterPoint::new(lat, lon).unwrap(), ns, we).unwrap()
    }

    #[test]
    fn test_invalid_center_point() {
        assert!(CenterPoint::from_slice(&[1.0]).is_err());
        assert!(CenterPoint::from_slice(&[1.0, 2.0, 3.0]).is_err());
        assert!(CenterPoint::new(91.0, 0.0).is_err());
        assert!(CenterPoint::new(0.0, -181.0).is_err());
        assert!(CenterPoint::new(f64::NAN, 0.0).is_err());
        let err = CenterPoint::from_slice(&[]).unwrap_err();
        assert_eq!(err.kind().as_str(), "invalid_parameter");
    }

    #[test]
    fn test_invalid_distances() {
        let center = CenterPoint::new(0.0, 0.0).unwrap();
        assert!(AreaRequest::new(center, 0.0, 10.0).is_err());
        assert!(AreaRequest::new(center, 10.0, -1.0).is_err());
        assert!(AreaRequest::new(center, f64::INFINITY, 1.0).is_err());
    }

    #[test]
    fn test_original_window_spans_requested_distances() {
        for (lat, lon, ns, we) in [
            (0.0, 0.0, 10.0, 10.0),
            (-23.55, -46.63, 4.0, 7.5),
            (45.0, 120.0, 25.0, 3.0),
            (-60.0, -179.0, 1.0, 1.0),
        ] {
            let w = BoundingBoxResolver::original_window(&request(lat, lon, ns, we)).unwrap();
            assert!(w.south < w.north);
            assert!(w.west < w.east);

            let ns_m = distance_m(w.south, lon, w.north, lon).unwrap();
            let we_m = distance_m(lat, w.west, lat, w.east).unwrap();
            assert!((ns_m - ns * 1000.0).abs() < 1.0, "ns: {ns_m}");
            assert!((we_m - we * 1000.0).abs() < 1.0, "we: {we_m}");
        }
    }

    #[test]
    fn test_antimeridian_windows_rejected() {
        // 1 km either side of 179.995 E at the equator runs past 180
        for lon in [179.995, -179.995] {
            let err = BoundingBoxResolver::original_window(&request(0.0, lon, 2.0, 2.0)).unwrap_err();
            assert_eq!(err.kind().as_str(), "invalid_parameter");
        }
        assert!(BoundingBoxResolver::original_window(&request(0.0, 179.9, 2.0, 2.0)).is_ok());

        // Half a column of extension past 180
        let original = GeoWindow::new(179.5, 0.0, 179.95, 0.45);
        let err = BoundingBoxResolver::extended_window(&original, 450, 450, 256).unwrap_err();
        assert_eq!(err.kind().as_str(), "invalid_parameter");
    }

    #[test]
    fn test_grid_shape_floor_plus_one() {
        let shape = GridShape::from_reference_dims(600, 600, 256).unwrap();
        assert_eq!((shape.rows, shape.cols), (3, 3));

        // Exact multiples still get the extra row/column
        let shape = GridShape::from_reference_dims(512, 256, 256).unwrap();
        assert_eq!((shape.rows, shape.cols), (3, 2));

        assert!(GridShape::from_reference_dims(10, 10, 0).is_err());
    }

    #[test]
    fn test_cells_row_major() {
        let shape = GridShape::from_reference_dims(300, 600, 256).unwrap();
        let cells: Vec<_> = shape.cells().collect();
        assert_eq!(cells, vec![(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2)]);
    }

    #[test]
    fn test_extended_window_adds_half_a_row() {
        let original = GeoWindow::new(0.0, 0.0, 0.6, 0.6);
        let (layout, ext) = BoundingBoxResolver::extended_window(&original, 600, 600, 256).unwrap();

        // 600 px over 0.6 degrees: 0.001 deg/px, 256 px per row
        assert!((layout.ns_deg_per_row - 0.256).abs() < 1e-12);
        assert!((layout.we_deg_per_col - 0.256).abs() < 1e-12);
        assert!(ext.contains(&original));
        assert!((original.west - ext.west - 0.128).abs() < 1e-12);
        assert!((ext.north - original.north - 0.128).abs() < 1e-12);
        assert_eq!((layout.shape.rows, layout.shape.cols), (3, 3));
    }

    #[test]
    fn test_extended_window_rejects_empty_reference() {
        let original = GeoWindow::new(0.0, 0.0, 1.0, 1.0);
        assert!(BoundingBoxResolver::extended_window(&original, 0, 10, 256).is_err());
    }
}
