//! Great-circle geometry for fan-out range checks. Pure and stateless;
//! callers validate coordinates before measuring (non-finite input yields
//! NaN, which fails every radius comparison).

/// Mean Earth radius in meters, as used by the haversine formula.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A WGS84 coordinate pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }
}

/// Haversine distance between two coordinates, in meters.
pub fn distance_meters(a: Coordinates, b: Coordinates) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();

    let sin_lat = (d_lat / 2.0).sin();
    let sin_lon = (d_lon / 2.0).sin();
    let h = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lon * sin_lon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_METERS * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_points_are_zero_meters_apart() {
        let origin = Coordinates::new(0.0, 0.0);
        assert_eq!(distance_meters(origin, origin), 0.0);
    }

    #[test]
    fn one_degree_of_longitude_at_the_equator() {
        let d = distance_meters(Coordinates::new(0.0, 0.0), Coordinates::new(0.0, 1.0));
        // One degree of arc on the mean-radius sphere is ~111,194 m.
        assert!((d - 111_194.0).abs() < 111_194.0 * 0.01, "got {d}");
    }

    #[test]
    fn short_range_accuracy_near_singapore() {
        let origin = Coordinates::new(1.30, 103.80);
        // 2,000 m of pure northward displacement.
        let responder = Coordinates::new(1.30 + 2_000.0 / 111_194.93, 103.80);
        let d = distance_meters(origin, responder);
        assert!((d - 2_000.0).abs() < 5.0, "got {d}");
    }

    #[test]
    fn non_finite_input_propagates_nan() {
        let d = distance_meters(
            Coordinates::new(f64::NAN, 0.0),
            Coordinates::new(0.0, 0.0),
        );
        assert!(d.is_nan());
        // NaN fails any radius check, so an unvalidated point can never fan out.
        assert!(!(d <= 500_000.0));
    }

    #[test]
    fn symmetric_in_its_arguments() {
        let a = Coordinates::new(1.30, 103.80);
        let b = Coordinates::new(1.35, 103.99);
        assert_eq!(distance_meters(a, b), distance_meters(b, a));
    }
}
