//! Test fixtures for crawl-planner.
//!
//! Provides:
//! - Pubs in central Bristol (approximate coordinates, OpenStreetMap)
//! - A builder for small synthetic universes on a local grid
//! - Provider doubles that count calls or always fail
//! - An OSRM container serving the Bristol walking network

#![allow(dead_code)]

pub mod bristol_pubs;
pub mod osrm_container;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crawl_planner::error::ProviderError;
use crawl_planner::haversine::HaversineProvider;
use crawl_planner::model::Coordinate;
use crawl_planner::traits::{DistanceMatrix, DistanceProvider, LegGeometry};
use crawl_planner::universe::{DEFAULT_PRECOMPUTE_BATCH, Waypoint, WaypointUniverse};

pub use bristol_pubs::*;

// ============================================================================
// Grid universes
// ============================================================================

/// Degrees per grid unit; about 111 m at the equator.
pub const GRID_UNIT: f64 = 0.001;

/// Coordinate of grid point `(x, y)` near (0, 0).
pub fn grid(x: f64, y: f64) -> Coordinate {
    Coordinate::new(x * GRID_UNIT, y * GRID_UNIT)
}

/// Builder for small universes laid out on the grid.
#[derive(Debug, Default)]
pub struct TestUniverse {
    waypoints: Vec<Waypoint>,
}

impl TestUniverse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a waypoint with ID `id` at grid point `(x, y)`.
    pub fn pub_at(mut self, id: &str, x: f64, y: f64) -> Self {
        self.waypoints.push(Waypoint::new(id, grid(x, y)).with_name(format!("The {id}")));
        self
    }

    pub fn waypoint(mut self, waypoint: Waypoint) -> Self {
        self.waypoints.push(waypoint);
        self
    }

    /// Precomputes straight-line distances between all waypoints.
    pub fn build(self) -> Arc<WaypointUniverse> {
        let universe = WaypointUniverse::precompute(
            self.waypoints,
            &HaversineProvider::default(),
            DEFAULT_PRECOMPUTE_BATCH,
        )
        .expect("haversine precompute cannot fail");
        Arc::new(universe)
    }
}

// ============================================================================
// Provider doubles
// ============================================================================

/// Straight-line provider that counts how often each service is called.
#[derive(Debug, Default)]
pub struct CountingProvider {
    inner: HaversineProvider,
    pub matrix_calls: AtomicUsize,
    pub route_calls: AtomicUsize,
}

impl CountingProvider {
    pub fn matrix_calls(&self) -> usize {
        self.matrix_calls.load(Ordering::SeqCst)
    }

    pub fn route_calls(&self) -> usize {
        self.route_calls.load(Ordering::SeqCst)
    }
}

impl DistanceProvider for CountingProvider {
    fn distance_matrix(
        &self,
        sources: &[Coordinate],
        destinations: &[Coordinate],
    ) -> Result<DistanceMatrix, ProviderError> {
        self.matrix_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.distance_matrix(sources, destinations)
    }

    fn route_legs(&self, ordered: &[Coordinate]) -> Result<Vec<LegGeometry>, ProviderError> {
        self.route_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.route_legs(ordered)
    }
}

/// Provider whose backing service is always down.
#[derive(Debug, Default)]
pub struct FailingProvider;

impl DistanceProvider for FailingProvider {
    fn distance_matrix(
        &self,
        _: &[Coordinate],
        _: &[Coordinate],
    ) -> Result<DistanceMatrix, ProviderError> {
        Err(ProviderError::Service {
            code: "NoRoute".to_string(),
            message: "routing service offline".to_string(),
        })
    }

    fn route_legs(&self, _: &[Coordinate]) -> Result<Vec<LegGeometry>, ProviderError> {
        Err(ProviderError::Service {
            code: "NoRoute".to_string(),
            message: "routing service offline".to_string(),
        })
    }
}
