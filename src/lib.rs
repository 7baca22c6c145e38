//! crawl-planner
//!
//! Plans walking routes that visit a requested number of waypoints (pubs)
//! between an arbitrary start and end. Candidates are taken from a corridor
//! around the straight line between the endpoints, ordered by a sampling or
//! greedy optimizer with 2-opt polishing, and scored on total distance plus
//! the evenness of the legs.

pub mod error;
pub mod traits;
pub mod model;
pub mod universe;
pub mod geometry;
pub mod candidates;
pub mod scoring;
pub mod solver;
pub mod planner;
pub mod osrm;
pub mod osrm_data;
pub mod haversine;
pub mod polyline;

pub use error::{PlannerError, ProviderError};
pub use model::{Coordinate, PlannedRoute, RouteEstimate, RouteIndexSequence, RouteStop};
pub use planner::{PlanRequest, RoutePlanner};
