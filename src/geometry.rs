//! Great-circle math used by region checks, latlongring rules, and the
//! proximity pass. Distances are nautical miles throughout the crate.

/// Mean Earth radius in nautical miles.
const EARTH_RADIUS_NM: f64 = 3_440.065;

/// Haversine distance between two points, in nautical miles.
pub fn haversine_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_NM * c
}

/// Convert a radius in nautical miles to lat/lon degree offsets around a
/// center latitude. One degree of latitude is ~60 nm everywhere; longitude
/// compresses with the cosine of the latitude.
pub fn nm_to_lat_lon_offsets(radius_nm: f64, center_lat: f64) -> (f64, f64) {
    let lat_offset = radius_nm / 60.0;
    let lon_offset = radius_nm / (60.0 * center_lat.to_radians().cos());
    (lat_offset, lon_offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_distance() {
        assert_eq!(haversine_nm(40.0, -119.0, 40.0, -119.0), 0.0);
    }

    #[test]
    fn test_symmetric() {
        let d1 = haversine_nm(40.76, -119.21, 40.77, -119.20);
        let d2 = haversine_nm(40.77, -119.20, 40.76, -119.21);
        assert!((d1 - d2).abs() < 1e-12);
    }

    #[test]
    fn test_one_degree_latitude() {
        // One degree of latitude is very close to 60 nm.
        let d = haversine_nm(40.0, -119.0, 41.0, -119.0);
        assert!((d - 60.0).abs() < 0.2, "got {d}");
    }

    #[test]
    fn test_offsets_at_equator() {
        let (lat_off, lon_off) = nm_to_lat_lon_offsets(60.0, 0.0);
        assert!((lat_off - 1.0).abs() < 0.01);
        assert!((lon_off - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_lon_offset_grows_with_latitude() {
        let (_, lon_equator) = nm_to_lat_lon_offsets(60.0, 0.0);
        let (_, lon_north) = nm_to_lat_lon_offsets(60.0, 60.0);
        assert!(lon_north > lon_equator * 1.9);
    }
}
