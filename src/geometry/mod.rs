//! Coordinate types shared by every stage: geographic windows, affine pixel
//! transforms and pixel windows.
//!
//! - [`GeoWindow`]: a `(west, south, east, north)` rectangle
//! - [`GeoTransform`]: pixel `(col, row)` → world `(x, y)` affine mapping
//! - [`PixelWindow`]: integer window into a raster grid
//! - [`geodesic`]: WGS84 destination/distance calculations
//! - [`projection`]: EPSG reprojection via proj4rs

pub mod geodesic;
pub mod projection;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TileGridError};

/// Axis-aligned rectangle in a coordinate reference system.
///
/// For EPSG:4326 the axes are longitude (x) and latitude (y).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoWindow {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl GeoWindow {
    #[must_use]
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// East-west span in CRS units
    #[must_use]
    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    /// North-south span in CRS units
    #[must_use]
    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    /// Grow the window by `dx` on the west and east sides and `dy` on the
    /// south and north sides.
    #[must_use]
    pub fn extend(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.west - dx, self.south - dy, self.east + dx, self.north + dy)
    }

    #[must_use]
    pub fn contains(&self, other: &GeoWindow) -> bool {
        self.west <= other.west
            && self.south <= other.south
            && self.east >= other.east
            && self.north >= other.north
    }

    #[must_use]
    pub fn intersects(&self, other: &GeoWindow) -> bool {
        !(self.east < other.west
            || self.west > other.east
            || self.north < other.south
            || self.south > other.north)
    }

    /// `[west, south, east, north]`, the order catalog searches expect
    #[must_use]
    pub fn to_array(&self) -> [f64; 4] {
        [self.west, self.south, self.east, self.north]
    }
}

/// Affine transform from pixel space to world coordinates.
///
/// `x = a * col + b * row + c`, `y = d * col + e * row + f`, where `(col, row)`
/// addresses the upper-left corner of a pixel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl GeoTransform {
    #[must_use]
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// North-up transform with origin at the upper-left corner
    #[must_use]
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self::new(pixel_width, 0.0, origin_x, 0.0, -pixel_height, origin_y)
    }

    /// Map a (possibly fractional) pixel position to world coordinates
    #[must_use]
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a * col + self.b * row + self.c,
            self.d * col + self.e * row + self.f,
        )
    }

    #[must_use]
    pub fn is_north_up(&self) -> bool {
        self.b == 0.0 && self.d == 0.0
    }

    /// Inverse mapping, world → pixel.
    ///
    /// # Errors
    /// Returns `InvalidData` when the transform is degenerate.
    pub fn inverse(&self) -> Result<GeoTransform> {
        let det = self.a * self.e - self.b * self.d;
        if det == 0.0 || !det.is_finite() {
            return Err(TileGridError::invalid_data("Degenerate affine transform"));
        }
        let ia = self.e / det;
        let ib = -self.b / det;
        let id = -self.d / det;
        let ie = self.a / det;
        Ok(GeoTransform::new(
            ia,
            ib,
            -(ia * self.c + ib * self.f),
            id,
            ie,
            -(id * self.c + ie * self.f),
        ))
    }

    /// Transform of a sub-window whose upper-left pixel sits at
    /// `(col_off, row_off)` of this grid.
    ///
    /// Only the origin moves; pixel size and rotation are inherited exactly, so
    /// adjacent windows share edges bit-for-bit in pixel space.
    #[must_use]
    pub fn window_transform(&self, col_off: f64, row_off: f64) -> Self {
        let (c, f) = self.apply(col_off, row_off);
        Self { c, f, ..*self }
    }

    /// Compose with a uniform scale of `1 / factor` (pixel density × factor).
    #[must_use]
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            a: self.a / factor,
            b: self.b / factor,
            d: self.d / factor,
            e: self.e / factor,
            ..*self
        }
    }

    /// World-space bounds of a `width` × `height` grid
    #[must_use]
    pub fn bounds(&self, width: usize, height: usize) -> GeoWindow {
        #[allow(clippy::cast_precision_loss)]
        let (w, h) = (width as f64, height as f64);
        let corners = [
            self.apply(0.0, 0.0),
            self.apply(w, 0.0),
            self.apply(0.0, h),
            self.apply(w, h),
        ];
        envelope(&corners)
    }
}

/// Integer window into a raster grid. Offsets may be negative or run past the
/// grid when the requested area is larger than the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelWindow {
    pub col_off: i64,
    pub row_off: i64,
    pub width: usize,
    pub height: usize,
}

impl PixelWindow {
    #[must_use]
    pub fn new(col_off: i64, row_off: i64, width: usize, height: usize) -> Self {
        Self {
            col_off,
            row_off,
            width,
            height,
        }
    }

    /// Window covering `bounds` (in the transform's CRS).
    ///
    /// The fractional window is rounded to the nearest whole pixel for both
    /// offsets and lengths, with lengths never below one pixel.
    ///
    /// # Errors
    /// Returns `InvalidData` for a degenerate transform.
    pub fn from_bounds(bounds: &GeoWindow, transform: &GeoTransform) -> Result<Self> {
        let inv = transform.inverse()?;
        let corners = [
            inv.apply(bounds.west, bounds.north),
            inv.apply(bounds.east, bounds.north),
            inv.apply(bounds.west, bounds.south),
            inv.apply(bounds.east, bounds.south),
        ];
        let env = envelope(&corners);

        let col_off = env.west.round();
        let row_off = env.south.round();
        let width = (env.east - env.west).round().max(1.0);
        let height = (env.north - env.south).round().max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Ok(Self::new(
            col_off as i64,
            row_off as i64,
            width as usize,
            height as usize,
        ))
    }

    /// Transform of this window within a grid described by `transform`
    #[must_use]
    pub fn transform_within(&self, transform: &GeoTransform) -> GeoTransform {
        #[allow(clippy::cast_precision_loss)]
        transform.window_transform(self.col_off as f64, self.row_off as f64)
    }
}

/// Smallest axis-aligned window containing every point
fn envelope(points: &[(f64, f64)]) -> GeoWindow {
    let mut env = GeoWindow::new(f64::MAX, f64::MAX, f64::MIN, f64::MIN);
    for &(x, y) in points {
        env.west = env.west.min(x);
        env.south = env.south.min(y);
        env.east = env.east.max(x);
        env.north = env.north.max(y);
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_window_extend_contains_original() {
        let w = GeoWindow::new(-1.0, -1.0, 1.0, 1.0);
        let ext = w.extend(0.25, 0.5);
        assert!(ext.contains(&w));
        assert!((ext.width() - 2.5).abs() < EPS);
        assert!((ext.height() - 3.0).abs() < EPS);
    }

    #[test]
    fn test_window_intersection() {
        let a = GeoWindow::new(0.0, 0.0, 10.0, 10.0);
        assert!(a.intersects(&GeoWindow::new(5.0, 5.0, 15.0, 15.0)));
        assert!(!a.intersects(&GeoWindow::new(20.0, 20.0, 30.0, 30.0)));
    }

    #[test]
    fn test_inverse_roundtrip() {
        let t = GeoTransform::new(10.0, 0.5, 500_000.0, -0.25, -10.0, 4_000_000.0);
        let inv = t.inverse().unwrap();
        let (x, y) = t.apply(123.0, 45.0);
        let (col, row) = inv.apply(x, y);
        assert!((col - 123.0).abs() < 1e-6);
        assert!((row - 45.0).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_inverse_fails() {
        let t = GeoTransform::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        assert!(t.inverse().is_err());
    }

    #[test]
    fn test_adjacent_window_transforms_share_edges() {
        let t = GeoTransform::north_up(100.0, 50.0, 0.001, 0.001);
        let left = t.window_transform(0.0, 0.0);
        let right = t.window_transform(256.0, 0.0);
        let (left_edge, _) = left.apply(256.0, 0.0);
        assert!((left_edge - right.c).abs() < 1e-12);
        assert_eq!(left.a, right.a);
        assert_eq!(left.e, right.e);
    }

    #[test]
    fn test_scaled_preserves_footprint() {
        let t = GeoTransform::north_up(0.0, 10.0, 1.0, 1.0);
        let s = t.scaled(2.0);
        let before = t.bounds(256, 256);
        let after = s.bounds(512, 512);
        assert!((before.east - after.east).abs() < EPS);
        assert!((before.south - after.south).abs() < EPS);
    }

    #[test]
    fn test_pixel_window_from_bounds() {
        let t = GeoTransform::north_up(0.0, 100.0, 1.0, 1.0);
        let w = PixelWindow::from_bounds(&GeoWindow::new(10.0, 40.0, 30.0, 90.0), &t).unwrap();
        assert_eq!(w, PixelWindow::new(10, 10, 20, 50));

        // Windows may start before the grid
        let w = PixelWindow::from_bounds(&GeoWindow::new(-5.0, 95.0, 5.0, 105.0), &t).unwrap();
        assert_eq!(w, PixelWindow::new(-5, -5, 10, 10));
    }
}
