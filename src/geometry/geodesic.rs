//! Geodesic calculations on the WGS84 ellipsoid (Vincenty's formulae).
//!
//! Used to turn a center point and ground distances into a lon/lat window,
//! and to measure that window back in meters.

use crate::error::{Result, TileGridError};

/// WGS84 semi-major axis (meters)
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;

const CONVERGENCE: f64 = 1e-12;
const MAX_ITERATIONS: usize = 200;

fn semi_minor() -> f64 {
    (1.0 - WGS84_F) * WGS84_A
}

fn series_a_b(cos_sq_alpha: f64) -> (f64, f64) {
    let b = semi_minor();
    let u_sq = cos_sq_alpha * (WGS84_A * WGS84_A - b * b) / (b * b);
    let big_a = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
    let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
    (big_a, big_b)
}

fn delta_sigma(big_b: f64, sin_sigma: f64, cos_sigma: f64, cos_2sm: f64) -> f64 {
    big_b
        * sin_sigma
        * (cos_2sm
            + big_b / 4.0
                * (cos_sigma * (-1.0 + 2.0 * cos_2sm * cos_2sm)
                    - big_b / 6.0
                        * cos_2sm
                        * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                        * (-3.0 + 4.0 * cos_2sm * cos_2sm)))
}

/// Point reached by travelling `distance_m` from `(lat, lon)` along the
/// geodesic with initial `bearing_deg` (clockwise from north).
///
/// Returns `(lat, lon)` in degrees, longitude normalized to `[-180, 180]`.
#[must_use]
pub fn destination(lat: f64, lon: f64, bearing_deg: f64, distance_m: f64) -> (f64, f64) {
    let f = WGS84_F;
    let b = semi_minor();

    let alpha1 = bearing_deg.to_radians();
    let (sin_alpha1, cos_alpha1) = alpha1.sin_cos();

    let tan_u1 = (1.0 - f) * lat.to_radians().tan();
    let cos_u1 = 1.0 / (1.0 + tan_u1 * tan_u1).sqrt();
    let sin_u1 = tan_u1 * cos_u1;

    let sigma1 = tan_u1.atan2(cos_alpha1);
    let sin_alpha = cos_u1 * sin_alpha1;
    let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
    let (big_a, big_b) = series_a_b(cos_sq_alpha);

    let mut sigma = distance_m / (b * big_a);
    let mut cos_2sm;
    let mut sin_sigma;
    let mut cos_sigma;
    let mut iterations = 0;
    loop {
        cos_2sm = (2.0 * sigma1 + sigma).cos();
        sin_sigma = sigma.sin();
        cos_sigma = sigma.cos();
        let next = distance_m / (b * big_a) + delta_sigma(big_b, sin_sigma, cos_sigma, cos_2sm);
        let done = (next - sigma).abs() < CONVERGENCE;
        sigma = next;
        iterations += 1;
        if done || iterations >= MAX_ITERATIONS {
            break;
        }
    }
    sin_sigma = sigma.sin();
    cos_sigma = sigma.cos();
    cos_2sm = (2.0 * sigma1 + sigma).cos();

    let tmp = sin_u1 * sin_sigma - cos_u1 * cos_sigma * cos_alpha1;
    let lat2 = (sin_u1 * cos_sigma + cos_u1 * sin_sigma * cos_alpha1)
        .atan2((1.0 - f) * (sin_alpha * sin_alpha + tmp * tmp).sqrt());
    let lambda = (sin_sigma * sin_alpha1).atan2(cos_u1 * cos_sigma - sin_u1 * sin_sigma * cos_alpha1);
    let c = f / 16.0 * cos_sq_alpha * (4.0 + f * (4.0 - 3.0 * cos_sq_alpha));
    let l = lambda
        - (1.0 - c)
            * f
            * sin_alpha
            * (sigma + c * sin_sigma * (cos_2sm + c * cos_sigma * (-1.0 + 2.0 * cos_2sm * cos_2sm)));

    (lat2.to_degrees(), normalize_lon(lon + l.to_degrees()))
}

/// Geodesic distance in meters between two `(lat, lon)` points.
///
/// # Errors
/// Returns `Projection` when the iteration fails to converge (nearly
/// antipodal points).
pub fn distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Result<f64> {
    let f = WGS84_F;
    let b = semi_minor();

    let l = (lon2 - lon1).to_radians();
    let u1 = ((1.0 - f) * lat1.to_radians().tan()).atan();
    let u2 = ((1.0 - f) * lat2.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    for _ in 0..MAX_ITERATIONS {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        let sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma == 0.0 {
            return Ok(0.0);
        }
        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        let cos_2sm = if cos_sq_alpha == 0.0 {
            0.0 // equatorial line
        } else {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        };
        let c = f / 16.0 * cos_sq_alpha * (4.0 + f * (4.0 - 3.0 * cos_sq_alpha));
        let previous = lambda;
        lambda = l
            + (1.0 - c)
                * f
                * sin_alpha
                * (sigma + c * sin_sigma * (cos_2sm + c * cos_sigma * (-1.0 + 2.0 * cos_2sm * cos_2sm)));

        if (lambda - previous).abs() < CONVERGENCE {
            let (big_a, big_b) = series_a_b(cos_sq_alpha);
            let ds = delta_sigma(big_b, sin_sigma, cos_sigma, cos_2sm);
            return Ok(b * big_a * (sigma - ds));
        }
    }

    Err(TileGridError::Projection(format!(
        "Geodesic distance between ({lat1}, {lon1}) and ({lat2}, {lon2}) did not converge"
    )))
}

fn normalize_lon(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && lon > 0.0 {
        180.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_north_then_measure() {
        let (lat, lon) = destination(0.0, 0.0, 0.0, 5_000.0);
        assert!(lat > 0.0);
        assert!(lon.abs() < 1e-12);
        let d = distance_m(0.0, 0.0, lat, lon).unwrap();
        assert!((d - 5_000.0).abs() < 1e-3, "distance: {d}");
    }

    #[test]
    fn test_destination_east_along_equator() {
        let (lat, lon) = destination(0.0, 0.0, 90.0, 5_000.0);
        assert!(lat.abs() < 1e-9);
        // One degree of longitude on the equator is ~111.32 km
        assert!((lon - 5.0 / 111.319_49).abs() < 1e-4, "lon: {lon}");
    }

    #[test]
    fn test_roundtrip_at_mid_latitude() {
        for bearing in [0.0, 90.0, 180.0, 270.0, 33.0] {
            let (lat, lon) = destination(-23.5, -46.6, bearing, 12_345.0);
            let d = distance_m(-23.5, -46.6, lat, lon).unwrap();
            assert!((d - 12_345.0).abs() < 1e-3, "bearing {bearing}: {d}");
        }
    }

    #[test]
    fn test_known_distance() {
        // Flinders Peak → Buninyong, Vincenty's original test line
        let d = distance_m(-37.951_033_42, 144.424_867_89, -37.652_821_14, 143.926_495_53).unwrap();
        assert!((d - 54_972.271).abs() < 0.5, "distance: {d}");
    }

    #[test]
    fn test_normalize_lon() {
        assert!((normalize_lon(190.0) - -170.0).abs() < 1e-12);
        assert!((normalize_lon(-190.0) - 170.0).abs() < 1e-12);
        assert!((normalize_lon(180.0) - 180.0).abs() < 1e-12);
    }
}
