//! Corridor filtering: narrows the waypoint universe to a bounded pool of
//! candidates lying near the straight line from start to end.

use std::collections::HashSet;

use tracing::debug;

use crate::geometry::{perpendicular_distance, planar_distance, project_onto_line};
use crate::model::Coordinate;
use crate::universe::WaypointUniverse;

/// How far outside `[0, 1]` a waypoint's corridor position may fall, tried
/// in order until enough waypoints qualify. The last step admits everyone,
/// so selection only comes up short when the universe itself is too small.
pub const WIDENING_SCHEDULE: [f64; 5] = [0.1, 0.25, 0.5, 1.0, f64::INFINITY];

/// A waypoint that passed the corridor filter, with the features it was
/// ranked by.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Index into the universe.
    pub index: usize,
    /// Corridor position `t`; 0 at start, 1 at end.
    pub progress: f64,
    /// Perpendicular distance from the corridor line in meters.
    pub offset_m: f64,
    /// Ranking penalty; lower is better.
    pub penalty: f64,
}

/// Picks up to `pool_size` candidates (never fewer than `min_count` when the
/// universe allows it), returned in order of corridor progress.
///
/// Waypoints in `excluded` are never considered.
pub fn select_candidates(
    universe: &WaypointUniverse,
    start: Coordinate,
    end: Coordinate,
    min_count: usize,
    pool_size: usize,
    excluded: &HashSet<usize>,
) -> Vec<Candidate> {
    let corridor_length = planar_distance(start, end);
    let features: Vec<(Candidate, f64)> = universe
        .waypoints()
        .iter()
        .enumerate()
        .filter(|(index, _)| !excluded.contains(index))
        .map(|(index, waypoint)| {
            let progress = project_onto_line(waypoint.coordinate, start, end);
            let offset_m = perpendicular_distance(waypoint.coordinate, start, end);
            let excess = (-progress).max(progress - 1.0).max(0.0);
            let candidate = Candidate {
                index,
                progress,
                offset_m,
                penalty: offset_m + excess * corridor_length,
            };
            (candidate, excess)
        })
        .collect();

    let mut pool = Vec::new();
    for margin in WIDENING_SCHEDULE {
        pool = features
            .iter()
            .filter(|(_, excess)| *excess <= margin)
            .map(|(candidate, _)| candidate.clone())
            .collect();
        if pool.len() >= min_count {
            debug!(margin, eligible = pool.len(), "corridor filter satisfied");
            break;
        }
        debug!(margin, eligible = pool.len(), min_count, "widening corridor");
    }

    pool.sort_by(|a, b| a.penalty.total_cmp(&b.penalty).then(a.index.cmp(&b.index)));
    pool.truncate(pool_size.max(min_count));
    pool.sort_by(|a, b| a.progress.total_cmp(&b.progress).then(a.index.cmp(&b.index)));
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::universe::Waypoint;

    fn universe(points: &[(f64, f64)]) -> WaypointUniverse {
        let waypoints = points
            .iter()
            .enumerate()
            .map(|(i, (lon, lat))| Waypoint::new(format!("w{i}"), Coordinate::new(*lon, *lat)))
            .collect::<Vec<_>>();
        let n = waypoints.len();
        WaypointUniverse::new(waypoints, vec![vec![0.0; n]; n]).unwrap()
    }

    const START: Coordinate = Coordinate::new(0.0, 0.0);
    const END: Coordinate = Coordinate::new(0.0, 0.01);

    fn indices(pool: &[Candidate]) -> Vec<usize> {
        pool.iter().map(|c| c.index).collect()
    }

    #[test]
    fn test_keeps_closest_to_corridor() {
        let universe = universe(&[
            (0.004, 0.005),
            (0.0001, 0.002),
            (0.0002, 0.008),
            (0.002, 0.005),
        ]);
        let pool = select_candidates(&universe, START, END, 1, 2, &HashSet::new());
        assert_eq!(indices(&pool), vec![1, 2]);
    }

    #[test]
    fn test_sorted_by_progress() {
        let universe = universe(&[(0.0, 0.008), (0.0, 0.002), (0.0, 0.005)]);
        let pool = select_candidates(&universe, START, END, 3, 10, &HashSet::new());
        assert_eq!(indices(&pool), vec![1, 2, 0]);
        assert!(pool.windows(2).all(|w| w[0].progress <= w[1].progress));
    }

    #[test]
    fn test_drops_waypoints_behind_start() {
        let universe = universe(&[(0.0, -0.005), (0.0, 0.003), (0.0, 0.006)]);
        let pool = select_candidates(&universe, START, END, 2, 10, &HashSet::new());
        assert_eq!(indices(&pool), vec![1, 2]);
    }

    #[test]
    fn test_widens_when_starved() {
        // Everything lies well behind the start or past the end.
        let universe = universe(&[(0.0, -0.02), (0.0, 0.05), (0.0, -0.004)]);
        let pool = select_candidates(&universe, START, END, 3, 3, &HashSet::new());
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_never_returns_excluded() {
        let universe = universe(&[(0.0, 0.002), (0.0, 0.005), (0.0, 0.008)]);
        let excluded = HashSet::from([1]);
        let pool = select_candidates(&universe, START, END, 2, 10, &excluded);
        assert_eq!(indices(&pool), vec![0, 2]);
    }

    #[test]
    fn test_pool_never_smaller_than_minimum() {
        let universe = universe(&[(0.0, 0.002), (0.0, 0.005), (0.0, 0.008), (0.0, 0.009)]);
        let pool = select_candidates(&universe, START, END, 3, 1, &HashSet::new());
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_small_universe_returns_everything_available() {
        let universe = universe(&[(0.0, 0.002)]);
        let pool = select_candidates(&universe, START, END, 4, 16, &HashSet::new());
        assert_eq!(pool.len(), 1);
    }
}
