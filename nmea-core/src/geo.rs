//! Great-circle helpers for placing radar targets relative to own ship.

/// Mean Earth radius (IUGG), metres.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// One international nautical mile, metres.
pub const METERS_PER_NM: f64 = 1852.0;

/// Normalize an angle into `[0, 360)`.
pub fn normalize_deg(deg: f64) -> f64 {
    let d = deg % 360.0;
    if d < 0.0 {
        d + 360.0
    } else {
        d
    }
}

/// Point reached from `(lat, lon)` travelling `distance_m` along the initial
/// true `bearing_deg`.
pub fn destination(lat: f64, lon: f64, bearing_deg: f64, distance_m: f64) -> (f64, f64) {
    let delta = distance_m / EARTH_RADIUS_M;
    let theta = bearing_deg.to_radians();
    let phi1 = lat.to_radians();
    let lambda1 = lon.to_radians();

    let sin_phi2 = phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos();
    let phi2 = sin_phi2.asin();
    let lambda2 = lambda1
        + (theta.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * sin_phi2);

    let lon2 = (lambda2.to_degrees() + 540.0) % 360.0 - 180.0;
    (phi2.to_degrees(), lon2)
}

/// Haversine distance in metres.
pub fn distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_deg(370.0), 10.0);
        assert_eq!(normalize_deg(-10.0), 350.0);
        assert_eq!(normalize_deg(0.0), 0.0);
    }

    #[test]
    fn test_destination_north_one_nm() {
        let (lat, lon) = destination(41.0, -8.0, 0.0, METERS_PER_NM);
        // One nautical mile is about one arc-minute of latitude.
        assert!((lat - (41.0 + 1.0 / 60.0)).abs() < 1e-4);
        assert!((lon + 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_destination_roundtrip_distance() {
        let (lat, lon) = destination(41.0, -8.0, 135.0, 5_000.0);
        let d = distance_m(41.0, -8.0, lat, lon);
        assert!((d - 5_000.0).abs() < 0.5, "distance {d}");
    }
}
