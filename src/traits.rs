//! The distance/routing capability the planner consumes.
//!
//! Kept minimal: a street-network collaborator (OSRM in production, the
//! haversine estimator as a fallback) only has to answer rectangular
//! distance queries and produce per-leg geometry for a finished route.

use crate::error::ProviderError;
use crate::model::Coordinate;
use crate::polyline::Polyline;

/// Rectangular distance/duration matrix.
///
/// `distances[i][j]` is the walking distance in meters from `sources[i]`
/// to `destinations[j]`; `durations` is the same in seconds.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DistanceMatrix {
    pub distances: Vec<Vec<f64>>,
    pub durations: Vec<Vec<f64>>,
}

impl DistanceMatrix {
    /// Checks that both tables are `rows x cols`.
    pub fn ensure_shape(&self, rows: usize, cols: usize) -> Result<(), ProviderError> {
        let shaped = |table: &[Vec<f64>]| {
            table.len() == rows && table.iter().all(|row| row.len() == cols)
        };
        if shaped(&self.distances) && shaped(&self.durations) {
            Ok(())
        } else {
            Err(ProviderError::MalformedResponse(format!(
                "expected a {rows}x{cols} matrix, got {} rows",
                self.distances.len()
            )))
        }
    }
}

/// Walking details for one leg of a route.
#[derive(Debug, Clone, PartialEq)]
pub struct LegGeometry {
    pub distance_m: f64,
    pub duration_s: f64,
    pub geometry: Polyline,
}

/// Provides walking distances and route geometry between coordinates.
///
/// All coordinates are (longitude, latitude). Implementations must be
/// callable concurrently from several planning requests.
pub trait DistanceProvider {
    /// Distances from every source to every destination in one batch.
    fn distance_matrix(
        &self,
        sources: &[Coordinate],
        destinations: &[Coordinate],
    ) -> Result<DistanceMatrix, ProviderError>;

    /// Per-leg geometry along `ordered`; returns `ordered.len() - 1` legs.
    fn route_legs(&self, ordered: &[Coordinate]) -> Result<Vec<LegGeometry>, ProviderError>;
}

impl<P: DistanceProvider + ?Sized> DistanceProvider for &P {
    fn distance_matrix(
        &self,
        sources: &[Coordinate],
        destinations: &[Coordinate],
    ) -> Result<DistanceMatrix, ProviderError> {
        (**self).distance_matrix(sources, destinations)
    }

    fn route_legs(&self, ordered: &[Coordinate]) -> Result<Vec<LegGeometry>, ProviderError> {
        (**self).route_legs(ordered)
    }
}

impl<P: DistanceProvider + ?Sized> DistanceProvider for std::sync::Arc<P> {
    fn distance_matrix(
        &self,
        sources: &[Coordinate],
        destinations: &[Coordinate],
    ) -> Result<DistanceMatrix, ProviderError> {
        (**self).distance_matrix(sources, destinations)
    }

    fn route_legs(&self, ordered: &[Coordinate]) -> Result<Vec<LegGeometry>, ProviderError> {
        (**self).route_legs(ordered)
    }
}
