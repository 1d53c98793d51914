/// Mean earth radius in meters used for every distance in the engine.
pub const EARTH_RADIUS_M: f64 = 6_378_135.0;

/// Great-circle distance in meters between two coordinates in degrees,
/// treating the earth as a sphere.
pub fn approximate_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1 = lat1.to_radians();
    let lon1 = lon1.to_radians();
    let lat2 = lat2.to_radians();
    let lon2 = lon2.to_radians();
    let dlat = (0.5 * (lat2 - lat1)).sin();
    let dlon = (0.5 * (lon2 - lon1)).sin();
    let x = dlat * dlat + dlon * dlon * lat1.cos() * lat2.cos();
    EARTH_RADIUS_M * 2.0 * x.sqrt().atan2((1.0 - x).max(0.0).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance_for_same_point() {
        assert_eq!(approximate_distance(36.4, -116.8, 36.4, -116.8), 0.0);
    }

    #[test]
    fn small_latitude_offset_is_about_a_meter() {
        let distance = approximate_distance(36.425288, -117.133162, 36.425298, -117.133162);
        assert!(distance > 1.0 && distance < 1.2, "{distance}");
    }

    #[test]
    fn one_degree_of_latitude() {
        let distance = approximate_distance(0.0, 0.0, 1.0, 0.0);
        assert!((distance - 111_319.0).abs() < 100.0, "{distance}");
    }
}
