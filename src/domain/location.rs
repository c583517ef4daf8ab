//! Geographic primitives: great-circle distance and dispatch links.
//!
//! Coordinates are `geo::Point<f64>` throughout the engine, with the
//! conventional axis mapping x = longitude, y = latitude.

use geo::Point;

/// Mean Earth radius in kilometers used for all great-circle math.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points in kilometers (haversine).
pub fn haversine_km(a: Point<f64>, b: Point<f64>) -> f64 {
    let lat1 = a.y().to_radians();
    let lat2 = b.y().to_radians();
    let d_lat = (b.y() - a.y()).to_radians();
    let d_lng = (b.x() - a.x()).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// Great-circle distance between two points in meters.
pub fn haversine_m(a: Point<f64>, b: Point<f64>) -> f64 {
    haversine_km(a, b) * 1000.0
}

/// Build a map-navigation URL for dispatching responders to a location.
pub fn dispatch_link(location: Point<f64>) -> String {
    format!(
        "https://www.google.com/maps/dir/?api=1&destination={},{}",
        location.y(),
        location.x()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_distance() {
        let p = Point::new(76.39, 30.34);
        assert!(haversine_m(p, p).abs() < 1e-9);
    }

    #[test]
    fn test_one_degree_longitude_at_equator() {
        // One degree of longitude at the equator is ~111.19 km with
        // R = 6371 km (2π · 6371 / 360).
        let a = Point::new(0.0, 0.0);
        let b = Point::new(1.0, 0.0);
        let km = haversine_km(a, b);
        assert!((km - 111.195).abs() < 0.01, "got {km}");
    }

    #[test]
    fn test_symmetry() {
        let a = Point::new(76.3860, 30.3400);
        let b = Point::new(76.4300, 30.3500);
        assert!((haversine_km(a, b) - haversine_km(b, a)).abs() < 1e-12);
    }

    #[test]
    fn test_short_displacement_in_meters() {
        // ~0.0001 degrees of latitude is ~11 meters.
        let a = Point::new(76.39, 30.3400);
        let b = Point::new(76.39, 30.3401);
        let m = haversine_m(a, b);
        assert!(m > 10.0 && m < 12.0, "got {m}");
    }

    #[test]
    fn test_dispatch_link_contains_destination() {
        let link = dispatch_link(Point::new(76.38, 30.34));
        assert!(link.starts_with("https://www.google.com/maps"));
        assert!(link.contains("destination=30.34,76.38"));
    }
}
