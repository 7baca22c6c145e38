//! The waypoint catalog and its precomputed all-pairs distance matrix.
//!
//! A [`WaypointUniverse`] is loaded once at startup and shared read-only
//! between planning calls (typically behind an `Arc`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::UniverseError;
use crate::model::Coordinate;
use crate::traits::DistanceProvider;

/// Default number of waypoints per side of a precompute batch.
pub const DEFAULT_PRECOMPUTE_BATCH: usize = 50;

/// A routable point of interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    /// Opaque identifier, stable across calls.
    pub id: String,
    pub coordinate: Coordinate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Waypoint {
    pub fn new(id: impl Into<String>, coordinate: Coordinate) -> Self {
        Self {
            id: id.into(),
            coordinate,
            name: None,
            address: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

/// Plain record used to persist a universe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseData {
    pub waypoints: Vec<Waypoint>,
    pub distances: Vec<Vec<f64>>,
}

/// All known waypoints plus the symmetric walking-distance matrix `D`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "UniverseData", into = "UniverseData")]
pub struct WaypointUniverse {
    waypoints: Vec<Waypoint>,
    distances: Vec<Vec<f64>>,
    by_id: HashMap<String, usize>,
}

impl WaypointUniverse {
    /// Builds a universe, validating waypoint coordinates and that
    /// `distances` is `n x n` with finite non-negative entries. The diagonal
    /// is forced to zero.
    pub fn new(
        waypoints: Vec<Waypoint>,
        mut distances: Vec<Vec<f64>>,
    ) -> Result<Self, UniverseError> {
        check_coordinates(&waypoints)?;
        let n = waypoints.len();
        if distances.len() != n || distances.iter().any(|row| row.len() != n) {
            return Err(UniverseError::DimensionMismatch {
                waypoints: n,
                rows: distances.len(),
                cols: distances.first().map_or(0, Vec::len),
            });
        }

        for (from, row) in distances.iter_mut().enumerate() {
            for (to, value) in row.iter_mut().enumerate() {
                if !value.is_finite() || *value < 0.0 {
                    return Err(UniverseError::InvalidDistance { from, to });
                }
                if from == to {
                    *value = 0.0;
                }
            }
        }

        let mut by_id = HashMap::with_capacity(n);
        for (index, waypoint) in waypoints.iter().enumerate() {
            if by_id.insert(waypoint.id.clone(), index).is_some() {
                return Err(UniverseError::DuplicateId(waypoint.id.clone()));
            }
        }

        Ok(Self {
            waypoints,
            distances,
            by_id,
        })
    }

    /// Fills the distance matrix from `provider` in `batch_size x batch_size`
    /// blocks, then averages `D[i][j]` with `D[j][i]` so the result is
    /// symmetric.
    pub fn precompute<P: DistanceProvider>(
        waypoints: Vec<Waypoint>,
        provider: &P,
        batch_size: usize,
    ) -> Result<Self, UniverseError> {
        check_coordinates(&waypoints)?;
        let n = waypoints.len();
        let batch_size = batch_size.max(1);
        let coords: Vec<Coordinate> = waypoints.iter().map(|w| w.coordinate).collect();
        let mut distances = vec![vec![0.0; n]; n];

        let blocks = n.div_ceil(batch_size);
        info!(waypoints = n, batches = blocks * blocks, "precomputing waypoint distances");

        for row_start in (0..n).step_by(batch_size) {
            let row_end = (row_start + batch_size).min(n);
            for col_start in (0..n).step_by(batch_size) {
                let col_end = (col_start + batch_size).min(n);
                let block = provider
                    .distance_matrix(&coords[row_start..row_end], &coords[col_start..col_end])?;
                block.ensure_shape(row_end - row_start, col_end - col_start)?;
                for (offset, row) in block.distances.iter().enumerate() {
                    distances[row_start + offset][col_start..col_end].copy_from_slice(row);
                }
                debug!(row_start, col_start, "fetched distance block");
            }
        }

        for i in 0..n {
            for j in (i + 1)..n {
                let mean = (distances[i][j] + distances[j][i]) / 2.0;
                distances[i][j] = mean;
                distances[j][i] = mean;
            }
        }

        Self::new(waypoints, distances)
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn waypoint(&self, index: usize) -> Option<&Waypoint> {
        self.waypoints.get(index)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    /// `D[from][to]` in meters. Panics on an out-of-range index; callers
    /// only pass indices that came from this universe.
    pub fn distance(&self, from: usize, to: usize) -> f64 {
        self.distances[from][to]
    }

    pub fn coordinate(&self, index: usize) -> Coordinate {
        self.waypoints[index].coordinate
    }
}

fn check_coordinates(waypoints: &[Waypoint]) -> Result<(), UniverseError> {
    match waypoints.iter().find(|waypoint| !waypoint.coordinate.is_valid()) {
        Some(waypoint) => Err(UniverseError::InvalidCoordinate {
            id: waypoint.id.clone(),
        }),
        None => Ok(()),
    }
}

impl TryFrom<UniverseData> for WaypointUniverse {
    type Error = UniverseError;

    fn try_from(data: UniverseData) -> Result<Self, Self::Error> {
        Self::new(data.waypoints, data.distances)
    }
}

impl From<WaypointUniverse> for UniverseData {
    fn from(universe: WaypointUniverse) -> Self {
        Self {
            waypoints: universe.waypoints,
            distances: universe.distances,
        }
    }
}
