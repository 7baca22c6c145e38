//! Haversine distance provider (fallback when OSRM is unavailable).
//!
//! Uses great-circle distance and an assumed walking speed. Less accurate
//! than OSRM (ignores streets) but always available, which also makes it
//! the provider of choice in tests.

use crate::error::ProviderError;
use crate::model::Coordinate;
use crate::polyline::Polyline;
use crate::traits::{DistanceMatrix, DistanceProvider, LegGeometry};

/// Average walking speed, 80 m/min.
const DEFAULT_SPEED_M_PER_S: f64 = 80.0 / 60.0;

/// Mean Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Straight-line [`DistanceProvider`].
#[derive(Debug, Clone)]
pub struct HaversineProvider {
    /// Assumed walking speed in m/s.
    pub speed_m_per_s: f64,
}

impl Default for HaversineProvider {
    fn default() -> Self {
        Self {
            speed_m_per_s: DEFAULT_SPEED_M_PER_S,
        }
    }
}

impl HaversineProvider {
    pub fn new(speed_m_per_s: f64) -> Self {
        Self { speed_m_per_s }
    }

    /// Great-circle distance in meters.
    pub fn haversine_m(from: Coordinate, to: Coordinate) -> f64 {
        let lat1 = from.latitude.to_radians();
        let lat2 = to.latitude.to_radians();
        let delta_lat = (to.latitude - from.latitude).to_radians();
        let delta_lon = (to.longitude - from.longitude).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();

        EARTH_RADIUS_M * c
    }

    fn seconds_for(&self, meters: f64) -> f64 {
        meters / self.speed_m_per_s
    }
}

impl DistanceProvider for HaversineProvider {
    fn distance_matrix(
        &self,
        sources: &[Coordinate],
        destinations: &[Coordinate],
    ) -> Result<DistanceMatrix, ProviderError> {
        if sources.is_empty() || destinations.is_empty() {
            return Err(ProviderError::EmptyInput);
        }

        let distances: Vec<Vec<f64>> = sources
            .iter()
            .map(|from| destinations.iter().map(|to| Self::haversine_m(*from, *to)).collect())
            .collect();
        let durations = distances
            .iter()
            .map(|row| row.iter().map(|meters| self.seconds_for(*meters)).collect())
            .collect();

        Ok(DistanceMatrix { distances, durations })
    }

    fn route_legs(&self, ordered: &[Coordinate]) -> Result<Vec<LegGeometry>, ProviderError> {
        if ordered.len() < 2 {
            return Err(ProviderError::EmptyInput);
        }

        Ok(ordered
            .windows(2)
            .map(|pair| {
                let distance_m = Self::haversine_m(pair[0], pair[1]);
                LegGeometry {
                    distance_m,
                    duration_s: self.seconds_for(distance_m),
                    geometry: Polyline::new(pair.to_vec()),
                }
            })
            .collect())
    }
}
