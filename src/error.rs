//! Error types for planning, distance providers and catalog loading.

use std::fmt;

use thiserror::Error;

/// Errors surfaced by [`crate::planner::RoutePlanner`].
///
/// Planning is all-or-nothing: no partial route is ever returned alongside
/// an error.
#[derive(Debug, Error)]
pub enum PlannerError {
    /// Malformed input such as `num_pubs == 0`, start equal to end, or a
    /// uniformity weight outside `[0, 1]`.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Fewer viable waypoints than requested stops, even after the corridor
    /// was widened to the whole universe.
    #[error("only {available} candidate waypoints available, {requested} requested")]
    InsufficientCandidates { available: usize, requested: usize },

    /// The distance/routing collaborator failed or timed out.
    #[error("distance provider unavailable: {0}")]
    DistanceProviderUnavailable(#[from] ProviderError),

    /// A replacement waypoint does not exist, or is already on the route.
    #[error("waypoint {id} {reason}")]
    WaypointNotFound { id: String, reason: WaypointLookup },
}

impl PlannerError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}

/// Why a waypoint lookup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaypointLookup {
    /// The ID is not part of the loaded universe.
    Unknown,
    /// The ID exists but is already visited elsewhere on the route.
    AlreadyInRoute,
}

impl fmt::Display for WaypointLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("does not exist"),
            Self::AlreadyInRoute => f.write_str("is already in the route"),
        }
    }
}

/// Errors from a [`crate::traits::DistanceProvider`].
#[derive(Debug, Error)]
pub enum ProviderError {
    /// At least one coordinate is required on each side of a request.
    #[error("at least one coordinate is required")]
    EmptyInput,

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// The routing service answered with a non-`Ok` status code.
    #[error("routing service returned {code}: {message}")]
    Service { code: String, message: String },

    /// The response parsed but did not have the expected shape.
    #[error("malformed routing response: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Polyline(#[from] PolylineError),
}

/// Errors building a [`crate::universe::WaypointUniverse`].
#[derive(Debug, Error)]
pub enum UniverseError {
    #[error("distance matrix is {rows}x{cols} but there are {waypoints} waypoints")]
    DimensionMismatch {
        waypoints: usize,
        rows: usize,
        cols: usize,
    },

    #[error("distance between waypoints {from} and {to} is not a finite non-negative number")]
    InvalidDistance { from: usize, to: usize },

    #[error("waypoint id {0} appears more than once")]
    DuplicateId(String),

    #[error("waypoint {id} has no valid longitude/latitude")]
    InvalidCoordinate { id: String },

    #[error("failed to fetch waypoint distances: {0}")]
    Provider(#[from] ProviderError),
}

/// Errors converting between coordinates and encoded polyline strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolylineError {
    #[error("cannot decode polyline: {0}")]
    Decode(String),

    #[error("cannot encode polyline: {0}")]
    Encode(String),
}
