//! Planar corridor geometry.
//!
//! At city scale an equirectangular projection centred on the corridor is
//! accurate to well under a percent, which is plenty for ranking candidate
//! waypoints. Both functions go through the same [`LocalFrame`] so that the
//! projection parameter and the offset agree with each other.

use crate::model::Coordinate;

/// Meters per degree of latitude (and of longitude at the equator).
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Local east/north frame in meters with its origin at a corridor start.
#[derive(Debug, Clone, Copy)]
pub struct LocalFrame {
    origin: Coordinate,
    meters_per_degree_lon: f64,
}

impl LocalFrame {
    /// Frame for the corridor `start -> end`, scaled at the mean latitude.
    pub fn for_corridor(start: Coordinate, end: Coordinate) -> Self {
        let mean_latitude = (start.latitude + end.latitude) / 2.0;
        Self {
            origin: start,
            meters_per_degree_lon: METERS_PER_DEGREE * mean_latitude.to_radians().cos(),
        }
    }

    /// Offset of `point` from the origin as `(east_m, north_m)`.
    pub fn to_local(&self, point: Coordinate) -> (f64, f64) {
        (
            (point.longitude - self.origin.longitude) * self.meters_per_degree_lon,
            (point.latitude - self.origin.latitude) * METERS_PER_DEGREE,
        )
    }
}

/// Scalar projection of `point` onto the segment `line_start -> line_end`.
///
/// 0 is `line_start`, 1 is `line_end`. The value is deliberately not
/// clamped: callers decide what `t < 0` or `t > 1` means. A degenerate
/// segment yields 0.
pub fn project_onto_line(point: Coordinate, line_start: Coordinate, line_end: Coordinate) -> f64 {
    let frame = LocalFrame::for_corridor(line_start, line_end);
    let (dx, dy) = frame.to_local(line_end);
    let (px, py) = frame.to_local(point);
    let length_sq = dx * dx + dy * dy;
    if length_sq == 0.0 {
        return 0.0;
    }
    (px * dx + py * dy) / length_sq
}

/// Distance in meters from `point` to the infinite line through
/// `line_start` and `line_end`. A degenerate line falls back to the
/// distance from `line_start`.
pub fn perpendicular_distance(
    point: Coordinate,
    line_start: Coordinate,
    line_end: Coordinate,
) -> f64 {
    let frame = LocalFrame::for_corridor(line_start, line_end);
    let (dx, dy) = frame.to_local(line_end);
    let (px, py) = frame.to_local(point);
    let length = dx.hypot(dy);
    if length == 0.0 {
        return px.hypot(py);
    }
    (dx * py - dy * px).abs() / length
}

/// Straight-line distance in meters under the same local approximation.
pub fn planar_distance(a: Coordinate, b: Coordinate) -> f64 {
    let (x, y) = LocalFrame::for_corridor(a, b).to_local(b);
    x.hypot(y)
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: Coordinate = Coordinate::new(0.0, 0.0);
    const END: Coordinate = Coordinate::new(0.0, 0.01);

    #[test]
    fn test_projection_midpoint() {
        let t = project_onto_line(Coordinate::new(0.0, 0.005), START, END);
        assert!((t - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_projection_is_not_clamped() {
        let behind = project_onto_line(Coordinate::new(0.0, -0.005), START, END);
        let beyond = project_onto_line(Coordinate::new(0.0, 0.02), START, END);
        assert!((behind + 0.5).abs() < 1e-9);
        assert!((beyond - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_perpendicular_distance_in_meters() {
        let offset = perpendicular_distance(Coordinate::new(0.001, 0.005), START, END);
        assert!((offset - 111.32).abs() < 0.01, "got {offset}");
    }

    #[test]
    fn test_offset_is_independent_of_progress() {
        let near = perpendicular_distance(Coordinate::new(0.001, 0.001), START, END);
        let far = perpendicular_distance(Coordinate::new(0.001, 0.03), START, END);
        assert!((near - far).abs() < 1e-6);
    }

    #[test]
    fn test_longitude_shrinks_with_latitude() {
        let start = Coordinate::new(-2.60, 51.40);
        let end = Coordinate::new(-2.60, 51.50);
        let offset = perpendicular_distance(Coordinate::new(-2.59, 51.45), start, end);
        // 0.01 degrees of longitude at ~51.45N is roughly 694 m.
        assert!((offset - 694.0).abs() < 5.0, "got {offset}");
    }

    #[test]
    fn test_degenerate_line() {
        let point = Coordinate::new(0.0, 0.001);
        assert_eq!(project_onto_line(point, START, START), 0.0);
        assert!((perpendicular_distance(point, START, START) - 111.32).abs() < 0.01);
    }

    #[test]
    fn test_planar_distance_symmetric() {
        let a = Coordinate::new(-2.597, 51.4545);
        let b = Coordinate::new(-2.600, 51.4200);
        assert!((planar_distance(a, b) - planar_distance(b, a)).abs() < 1e-6);
        assert_eq!(planar_distance(a, a), 0.0);
    }
}
