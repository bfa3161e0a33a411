// src/geofence/geo.rs
//! Great-circle distance and containment

use super::region::{Coordinate, Region};

/// IUGG mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Haversine distance in meters between two coordinates.
///
/// Within a few meters of the ellipsoidal distance at geofencing scales
/// (under ~50 km). Symmetric in its arguments and zero for identical points.
pub fn distance(a: Coordinate, b: Coordinate) -> f64 {
    // abs() keeps the result bit-identical when the arguments are swapped
    let d_lat = (b.latitude - a.latitude).abs().to_radians();
    let d_lon = (b.longitude - a.longitude).abs().to_radians();
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();

    let sin_lat = (d_lat / 2.0).sin();
    let sin_lon = (d_lon / 2.0).sin();
    let h = sin_lat * sin_lat + lat_a.cos() * lat_b.cos() * sin_lon * sin_lon;
    let h = h.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// True when `point` lies inside or on the boundary of `region`.
pub fn contains(region: &Region, point: Coordinate) -> bool {
    distance(region.center(), point) <= region.radius_meters()
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE_HOUSE: Coordinate = Coordinate::new(38.8977, -77.0365);

    #[test]
    fn test_distance_identity_and_symmetry() {
        let other = Coordinate::new(39.5, -78.0);
        assert_eq!(distance(WHITE_HOUSE, WHITE_HOUSE), 0.0);
        assert_eq!(distance(WHITE_HOUSE, other), distance(other, WHITE_HOUSE));
    }

    #[test]
    fn test_distance_known_values() {
        // One degree of latitude is ~111.2 km on the mean sphere
        let d = distance(Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 0.0));
        assert!((d - 111_195.0).abs() < 5.0, "got {}", d);

        // Washington Monument is ~0.9 km south of the White House
        let monument = Coordinate::new(38.8895, -77.0353);
        let d = distance(WHITE_HOUSE, monument);
        assert!((d - 918.0).abs() < 10.0, "got {}", d);
    }

    #[test]
    fn test_distance_across_antimeridian() {
        let d = distance(Coordinate::new(0.0, 179.9995), Coordinate::new(0.0, -179.9995));
        assert!(d < 200.0, "got {}", d);
    }

    #[test]
    fn test_contains_boundary_inclusive() {
        let point = Coordinate::new(38.9000, -77.0365);
        let edge = distance(WHITE_HOUSE, point);

        let exact = Region::new("edge", WHITE_HOUSE, edge).unwrap();
        assert!(contains(&exact, point));

        let larger = Region::new("larger", WHITE_HOUSE, edge + 1.0).unwrap();
        assert!(contains(&larger, point));

        let smaller = Region::new("smaller", WHITE_HOUSE, edge - 1.0).unwrap();
        assert!(!contains(&smaller, point));
    }

    #[test]
    fn test_far_point_outside() {
        let home = Region::new("home", WHITE_HOUSE, 1000.0).unwrap();
        assert!(contains(&home, WHITE_HOUSE));
        assert!(!contains(&home, Coordinate::new(39.5, -78.0)));
    }
}
