//! Coordinate reference system conversion.
//!
//! Providers return coordinates in their own projection:
//! - Tianditu: WGS84 (no conversion)
//! - Amap: GCJ02
//! - Baidu: BD09 (GCJ02 plus an additional polar offset)
//!
//! The inverse functions reproduce the widely published correction
//! algorithm bit for bit so that stored coordinates match what other
//! tools compute for the same provider payload. The forward functions
//! exist to simulate provider projections (grid queries, tests).

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

const X_PI: f64 = PI * 3000.0 / 180.0;
const A: f64 = 6378245.0;
#[allow(clippy::excessive_precision)]
const EE: f64 = 0.00669342162296594323;

/// Native projection of a provider payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Projection {
    Wgs84,
    Gcj02,
    Bd09,
}

impl Projection {
    /// Converts a provider-native point into WGS84.
    pub fn to_wgs84(self, lon: f64, lat: f64) -> (f64, f64) {
        match self {
            Projection::Wgs84 => (lon, lat),
            Projection::Gcj02 => gcj02_to_wgs84(lon, lat),
            Projection::Bd09 => bd09_to_wgs84(lon, lat),
        }
    }

    /// Converts a WGS84 point into this projection.
    pub fn from_wgs84(self, lon: f64, lat: f64) -> (f64, f64) {
        match self {
            Projection::Wgs84 => (lon, lat),
            Projection::Gcj02 => wgs84_to_gcj02(lon, lat),
            Projection::Bd09 => wgs84_to_bd09(lon, lat),
        }
    }
}

/// BD09 → GCJ02.
pub fn bd09_to_gcj02(bd_lon: f64, bd_lat: f64) -> (f64, f64) {
    let x = bd_lon - 0.0065;
    let y = bd_lat - 0.006;
    let z = (x * x + y * y).sqrt() - 0.00002 * (y * X_PI).sin();
    let theta = y.atan2(x) - 0.000003 * (x * X_PI).cos();
    (z * theta.cos(), z * theta.sin())
}

/// GCJ02 → BD09.
pub fn gcj02_to_bd09(gcj_lon: f64, gcj_lat: f64) -> (f64, f64) {
    let z = (gcj_lon * gcj_lon + gcj_lat * gcj_lat).sqrt() + 0.00002 * (gcj_lat * X_PI).sin();
    let theta = gcj_lat.atan2(gcj_lon) + 0.000003 * (gcj_lon * X_PI).cos();
    (z * theta.cos() + 0.0065, z * theta.sin() + 0.006)
}

/// GCJ02 → WGS84, single-step published correction.
///
/// Points outside the mainland bounding box are returned unchanged.
/// Accuracy is roughly 2 m; see [`gcj02_to_wgs84_precise`].
pub fn gcj02_to_wgs84(gcj_lon: f64, gcj_lat: f64) -> (f64, f64) {
    if out_of_china(gcj_lon, gcj_lat) {
        return (gcj_lon, gcj_lat);
    }
    let (dlon, dlat) = offset(gcj_lon, gcj_lat);
    (gcj_lon - dlon, gcj_lat - dlat)
}

/// WGS84 → GCJ02 (the projection applied by GCJ02 providers).
pub fn wgs84_to_gcj02(lon: f64, lat: f64) -> (f64, f64) {
    if out_of_china(lon, lat) {
        return (lon, lat);
    }
    let (dlon, dlat) = offset(lon, lat);
    (lon + dlon, lat + dlat)
}

/// GCJ02 → WGS84 by fixed-point refinement of the forward projection.
///
/// Converges to sub-centimetre accuracy in a handful of iterations.
pub fn gcj02_to_wgs84_precise(gcj_lon: f64, gcj_lat: f64) -> (f64, f64) {
    if out_of_china(gcj_lon, gcj_lat) {
        return (gcj_lon, gcj_lat);
    }
    let (mut lon, mut lat) = gcj02_to_wgs84(gcj_lon, gcj_lat);
    for _ in 0..30 {
        let (fwd_lon, fwd_lat) = wgs84_to_gcj02(lon, lat);
        let (err_lon, err_lat) = (fwd_lon - gcj_lon, fwd_lat - gcj_lat);
        lon -= err_lon;
        lat -= err_lat;
        if err_lon.abs() < 1e-10 && err_lat.abs() < 1e-10 {
            break;
        }
    }
    (lon, lat)
}

/// BD09 → WGS84.
pub fn bd09_to_wgs84(bd_lon: f64, bd_lat: f64) -> (f64, f64) {
    let (gcj_lon, gcj_lat) = bd09_to_gcj02(bd_lon, bd_lat);
    gcj02_to_wgs84(gcj_lon, gcj_lat)
}

/// BD09 → WGS84 using the refined GCJ02 inverse.
pub fn bd09_to_wgs84_precise(bd_lon: f64, bd_lat: f64) -> (f64, f64) {
    let (gcj_lon, gcj_lat) = bd09_to_gcj02(bd_lon, bd_lat);
    gcj02_to_wgs84_precise(gcj_lon, gcj_lat)
}

/// WGS84 → BD09.
pub fn wgs84_to_bd09(lon: f64, lat: f64) -> (f64, f64) {
    let (gcj_lon, gcj_lat) = wgs84_to_gcj02(lon, lat);
    gcj02_to_bd09(gcj_lon, gcj_lat)
}

fn out_of_china(lon: f64, lat: f64) -> bool {
    !(72.004..=137.8347).contains(&lon) || !(0.8293..=55.8271).contains(&lat)
}

/// Distortion (dlon, dlat) in degrees evaluated at the given point.
fn offset(lon: f64, lat: f64) -> (f64, f64) {
    let dlat = transform_lat(lon - 105.0, lat - 35.0);
    let dlon = transform_lon(lon - 105.0, lat - 35.0);
    let radlat = lat / 180.0 * PI;
    let magic = radlat.sin();
    let magic = 1.0 - EE * magic * magic;
    let sqrtmagic = magic.sqrt();
    let dlat = (dlat * 180.0) / ((A * (1.0 - EE)) / (magic * sqrtmagic) * PI);
    let dlon = (dlon * 180.0) / (A / sqrtmagic * radlat.cos() * PI);
    (dlon, dlat)
}

fn transform_lat(x: f64, y: f64) -> f64 {
    let mut ret = -100.0 + 2.0 * x + 3.0 * y + 0.2 * y * y + 0.1 * x * y + 0.2 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (y * PI).sin() + 40.0 * (y / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (160.0 * (y / 12.0 * PI).sin() + 320.0 * (y * PI / 30.0).sin()) * 2.0 / 3.0;
    ret
}

fn transform_lon(x: f64, y: f64) -> f64 {
    let mut ret = 300.0 + x + 2.0 * y + 0.1 * x * x + 0.1 * x * y + 0.1 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (x * PI).sin() + 40.0 * (x / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (150.0 * (x / 12.0 * PI).sin() + 300.0 * (x / 30.0 * PI).sin()) * 2.0 / 3.0;
    ret
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: (f64, f64), expected: (f64, f64), tol: f64) {
        assert!(
            (actual.0 - expected.0).abs() <= tol && (actual.1 - expected.1).abs() <= tol,
            "{:?} != {:?} (tol {})",
            actual,
            expected,
            tol
        );
    }

    /// 100 deterministic points spread across the Funing county box.
    fn sample_points() -> Vec<(f64, f64)> {
        (0..100)
            .map(|i| {
                let lon = 119.45 + 0.5 * i as f64 / 99.0;
                let lat = 33.55 + 0.5 * ((i * 37) % 100) as f64 / 99.0;
                (lon, lat)
            })
            .collect()
    }

    #[test]
    fn published_reference_values() {
        assert_close(gcj02_to_wgs84(119.55, 33.78), (119.544816, 33.781514), 1e-6);
        assert_close(bd09_to_gcj02(119.55, 33.78), (119.543528, 33.773879), 1e-6);
        assert_close(bd09_to_wgs84(119.55, 33.78), (119.538325, 33.775380), 1e-6);
        assert_close(wgs84_to_gcj02(119.55, 33.78), (119.555184, 33.778486), 1e-6);
    }

    #[test]
    fn outside_mainland_is_identity() {
        assert_eq!(gcj02_to_wgs84(2.35, 48.85), (2.35, 48.85));
        assert_eq!(wgs84_to_gcj02(-74.0, 40.7), (-74.0, 40.7));
    }

    #[test]
    fn gcj02_round_trip_within_tolerance() {
        for (lon, lat) in sample_points() {
            let (g_lon, g_lat) = wgs84_to_gcj02(lon, lat);
            assert_close(gcj02_to_wgs84_precise(g_lon, g_lat), (lon, lat), 1e-5);
            // the single-step inverse stays within a few metres
            assert_close(gcj02_to_wgs84(g_lon, g_lat), (lon, lat), 5e-5);
        }
    }

    #[test]
    fn bd09_round_trip_within_tolerance() {
        for (lon, lat) in sample_points() {
            let (b_lon, b_lat) = wgs84_to_bd09(lon, lat);
            assert_close(bd09_to_wgs84_precise(b_lon, b_lat), (lon, lat), 1e-5);
            assert_close(Projection::Bd09.to_wgs84(b_lon, b_lat), (lon, lat), 5e-5);
        }
    }

    #[test]
    fn projection_wgs84_passthrough() {
        assert_eq!(Projection::Wgs84.to_wgs84(119.6, 33.7), (119.6, 33.7));
        assert_eq!(Projection::Wgs84.from_wgs84(119.6, 33.7), (119.6, 33.7));
    }
}
