//! Forward projection from WGS84 longitude/latitude (EPSG:4326) to the
//! Korea 2000 unified coordinate system (EPSG:5179).
//!
//! EPSG:5179 is a Transverse Mercator on the GRS80 ellipsoid. Clustering
//! radii and grid cells are both expressed in its metre units.

use serde::{Deserialize, Serialize};

const GRS80_A: f64 = 6_378_137.0;
const GRS80_F: f64 = 1.0 / 298.257_222_101;

const ORIGIN_LAT_DEG: f64 = 38.0;
const CENTRAL_MERIDIAN_DEG: f64 = 127.5;
const SCALE_FACTOR: f64 = 0.9996;
const FALSE_EASTING: f64 = 1_000_000.0;
const FALSE_NORTHING: f64 = 2_000_000.0;

/// A point in the projected (metre based) coordinate system.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectedPoint {
    pub x: f64,
    pub y: f64,
}

impl ProjectedPoint {
    pub fn new(x: f64, y: f64) -> Self {
        ProjectedPoint { x, y }
    }
}

/// Meridian arc length from the equator to latitude `phi` (radians).
fn meridian_arc(phi: f64, e2: f64) -> f64 {
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    GRS80_A
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

/// Projects a longitude/latitude pair (degrees) to EPSG:5179.
///
/// Returns `None` for non-finite input or coordinates outside the valid
/// geographic range, so callers can drop the sample instead of clustering NaN.
pub fn wgs84_to_korea2000(lon: f64, lat: f64) -> Option<ProjectedPoint> {
    if !lon.is_finite() || !lat.is_finite() {
        return None;
    }
    if !(-180.0..=180.0).contains(&lon) || lat.abs() >= 90.0 {
        return None;
    }

    let e2 = GRS80_F * (2.0 - GRS80_F);
    let ep2 = e2 / (1.0 - e2);

    let phi = lat.to_radians();
    let dlambda = (lon - CENTRAL_MERIDIAN_DEG).to_radians();

    let sin_phi = phi.sin();
    let cos_phi = phi.cos();
    let tan_phi = phi.tan();

    let n = GRS80_A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = tan_phi * tan_phi;
    let c = ep2 * cos_phi * cos_phi;
    let a = dlambda * cos_phi;

    let m = meridian_arc(phi, e2);
    let m0 = meridian_arc(ORIGIN_LAT_DEG.to_radians(), e2);

    let a2 = a * a;
    let a3 = a2 * a;
    let a4 = a3 * a;
    let a5 = a4 * a;
    let a6 = a5 * a;

    let x = SCALE_FACTOR
        * n
        * (a + (1.0 - t + c) * a3 / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a5 / 120.0);
    let y = SCALE_FACTOR
        * (m - m0
            + n * tan_phi
                * (a2 / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a6 / 720.0));

    let point = ProjectedPoint::new(FALSE_EASTING + x, FALSE_NORTHING + y);
    if point.x.is_finite() && point.y.is_finite() {
        Some(point)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_origin_maps_to_false_origin() {
        let p = wgs84_to_korea2000(CENTRAL_MERIDIAN_DEG, ORIGIN_LAT_DEG).unwrap();
        assert_abs_diff_eq!(p.x, FALSE_EASTING, epsilon = 1e-6);
        assert_abs_diff_eq!(p.y, FALSE_NORTHING, epsilon = 1e-6);
    }

    #[test]
    fn test_one_degree_north_on_central_meridian() {
        let south = wgs84_to_korea2000(127.5, 38.0).unwrap();
        let north = wgs84_to_korea2000(127.5, 39.0).unwrap();
        let dy = north.y - south.y;
        assert!((110_900.0..111_100.0).contains(&dy), "dy = {dy}");
        assert_abs_diff_eq!(north.x, FALSE_EASTING, epsilon = 1e-6);
    }

    #[test]
    fn test_small_east_offset_is_metric() {
        let p = wgs84_to_korea2000(127.51, 38.0).unwrap();
        let dx = p.x - FALSE_EASTING;
        assert!((870.0..886.0).contains(&dx), "dx = {dx}");
    }

    #[test]
    fn test_seoul_lands_in_covered_grid() {
        // Seoul City Hall
        let p = wgs84_to_korea2000(126.9784, 37.5666).unwrap();
        assert!((900_000.0..1_000_000.0).contains(&p.x));
        assert!((1_900_000.0..2_000_000.0).contains(&p.y));
    }

    #[test]
    fn test_invalid_inputs_yield_none() {
        assert!(wgs84_to_korea2000(f64::NAN, 37.0).is_none());
        assert!(wgs84_to_korea2000(127.0, f64::INFINITY).is_none());
        assert!(wgs84_to_korea2000(200.0, 37.0).is_none());
        assert!(wgs84_to_korea2000(127.0, 90.0).is_none());
    }
}
