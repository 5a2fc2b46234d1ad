//! EPSG reprojection using pure Rust (proj4rs + crs-definitions).

use crate::error::{Result, TileGridError};
use crate::geometry::GeoWindow;

/// EPSG code of WGS84 longitude/latitude, the CRS of every request window
pub const WGS84: i32 = 4326;

/// Project a point from one CRS to another.
///
/// Handles any EPSG code in the crs-definitions database (UTM zones,
/// national grids, etc).
///
/// # Errors
/// Returns `Projection` if either EPSG code is unknown or the transform fails.
#[inline]
pub fn project_point(source_epsg: i32, target_epsg: i32, x: f64, y: f64) -> Result<(f64, f64)> {
    if source_epsg == target_epsg {
        return Ok((x, y));
    }

    project_with_proj4rs(source_epsg, target_epsg, x, y)
}

/// Reproject a window's lower-left and upper-right corners into `target_epsg`.
///
/// Only the two defining corners are transformed, matching how scene windows
/// are derived from a lon/lat request before being snapped to pixels.
///
/// # Errors
/// Returns `Projection` if the transform fails.
pub fn project_window(window: &GeoWindow, source_epsg: i32, target_epsg: i32) -> Result<GeoWindow> {
    let (x0, y0) = project_point(source_epsg, target_epsg, window.west, window.south)?;
    let (x1, y1) = project_point(source_epsg, target_epsg, window.east, window.north)?;
    Ok(GeoWindow::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)))
}

/// Get PROJ4 string for an EPSG code using the crs-definitions database
#[inline]
pub fn get_proj_string(epsg: i32) -> Option<&'static str> {
    u16::try_from(epsg)
        .ok()
        .and_then(crs_definitions::from_code)
        .map(|def| def.proj4)
}

/// Check if an EPSG code represents a geographic (lon/lat) CRS
#[inline]
#[must_use]
pub fn is_geographic_crs(epsg: i32) -> bool {
    if let Some(proj_str) = get_proj_string(epsg) {
        proj_str.contains("+proj=longlat")
    } else {
        epsg == WGS84 || (4000..5000).contains(&epsg)
    }
}

fn project_with_proj4rs(source_epsg: i32, target_epsg: i32, x: f64, y: f64) -> Result<(f64, f64)> {
    use proj4rs::proj::Proj;
    use proj4rs::transform::transform;

    let source_str = get_proj_string(source_epsg).ok_or_else(|| {
        TileGridError::Projection(format!("EPSG:{source_epsg} is not in the crs-definitions database"))
    })?;
    let target_str = get_proj_string(target_epsg).ok_or_else(|| {
        TileGridError::Projection(format!("EPSG:{target_epsg} is not in the crs-definitions database"))
    })?;

    let source_proj = Proj::from_proj_string(source_str).map_err(|e| {
        TileGridError::Projection(format!("Invalid source projection EPSG:{source_epsg}: {e:?}"))
    })?;
    let target_proj = Proj::from_proj_string(target_str).map_err(|e| {
        TileGridError::Projection(format!("Invalid target projection EPSG:{target_epsg}: {e:?}"))
    })?;

    // proj4rs works in radians for geographic coordinates
    let (x_in, y_in) = if is_geographic_crs(source_epsg) {
        (x.to_radians(), y.to_radians())
    } else {
        (x, y)
    };

    let mut point = (x_in, y_in, 0.0);
    transform(&source_proj, &target_proj, &mut point).map_err(|e| {
        TileGridError::Projection(format!(
            "Transform from EPSG:{source_epsg} to EPSG:{target_epsg} failed: {e:?}"
        ))
    })?;

    if is_geographic_crs(target_epsg) {
        Ok((point.0.to_degrees(), point.1.to_degrees()))
    } else {
        Ok((point.0, point.1))
    }
}
