//! Route data model shared by the selector, the optimizers and the planner.
//!
//! Coordinates are always carried as (longitude, latitude). The named
//! fields of [`Coordinate`] exist so that nothing in the crate has to
//! remember tuple order.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::PlannerError;
use crate::polyline::Polyline;

/// A WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub longitude: f64,
    pub latitude: f64,
}

impl Coordinate {
    /// Creates a coordinate. Argument order is longitude first.
    pub const fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    /// Returns `(longitude, latitude)`.
    pub fn lon_lat(&self) -> (f64, f64) {
        (self.longitude, self.latitude)
    }

    /// True when both components are finite and inside the WGS84 ranges.
    ///
    /// A (latitude, longitude) transposition of most real-world points
    /// outside the tropics fails this check.
    pub fn is_valid(&self) -> bool {
        self.longitude.is_finite()
            && self.latitude.is_finite()
            && (-180.0..=180.0).contains(&self.longitude)
            && (-90.0..=90.0).contains(&self.latitude)
    }
}

/// One of the two fixed ends of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Anchor {
    Start,
    End,
}

/// A single marker in a [`RouteIndexSequence`].
///
/// Serialises as either the literal `"start"` / `"end"` or a bare waypoint
/// index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RouteStop {
    Waypoint(usize),
    Anchor(Anchor),
}

impl RouteStop {
    pub const START: Self = Self::Anchor(Anchor::Start);
    pub const END: Self = Self::Anchor(Anchor::End);

    pub fn waypoint(&self) -> Option<usize> {
        match self {
            Self::Waypoint(index) => Some(*index),
            Self::Anchor(_) => None,
        }
    }
}

/// Ordered route markers: `start`, the visited waypoint indices, `end`.
///
/// Only the interior stops are stored, so the anchors can never move and
/// a waypoint index can never repeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<RouteStop>", into = "Vec<RouteStop>")]
pub struct RouteIndexSequence {
    waypoints: Vec<usize>,
}

impl RouteIndexSequence {
    /// Builds a sequence from interior waypoint indices.
    pub fn new(waypoints: Vec<usize>) -> Result<Self, PlannerError> {
        let mut seen = HashSet::with_capacity(waypoints.len());
        if let Some(duplicate) = waypoints.iter().find(|index| !seen.insert(**index)) {
            return Err(PlannerError::invalid_request(format!(
                "waypoint {duplicate} appears more than once in the route"
            )));
        }
        Ok(Self { waypoints })
    }

    /// Builds a sequence from the full marker list, checking the anchors.
    pub fn from_stops(stops: &[RouteStop]) -> Result<Self, PlannerError> {
        match stops {
            [RouteStop::Anchor(Anchor::Start), interior @ .., RouteStop::Anchor(Anchor::End)] => {
                let waypoints = interior
                    .iter()
                    .map(|stop| {
                        stop.waypoint().ok_or_else(|| {
                            PlannerError::invalid_request(
                                "start/end markers may only bound the route",
                            )
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Self::new(waypoints)
            }
            _ => Err(PlannerError::invalid_request(
                "route must begin with \"start\" and finish with \"end\"",
            )),
        }
    }

    /// Interior waypoint indices in visiting order.
    pub fn waypoints(&self) -> &[usize] {
        &self.waypoints
    }

    /// Number of visited waypoints.
    pub fn stop_count(&self) -> usize {
        self.waypoints.len()
    }

    /// Number of markers including both anchors.
    pub fn len(&self) -> usize {
        self.waypoints.len() + 2
    }

    /// Always false: a sequence holds at least its two anchors.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Marker at `position`, where position 0 is `start`.
    pub fn get(&self, position: usize) -> Option<RouteStop> {
        if position == 0 {
            return Some(RouteStop::START);
        }
        if position == self.len() - 1 {
            return Some(RouteStop::END);
        }
        self.waypoints.get(position - 1).copied().map(RouteStop::Waypoint)
    }

    pub fn contains(&self, index: usize) -> bool {
        self.waypoints.contains(&index)
    }

    /// Iterates every marker, anchors included.
    pub fn iter(&self) -> impl Iterator<Item = RouteStop> + '_ {
        std::iter::once(RouteStop::START)
            .chain(self.waypoints.iter().copied().map(RouteStop::Waypoint))
            .chain(std::iter::once(RouteStop::END))
    }

    pub fn to_stops(&self) -> Vec<RouteStop> {
        self.iter().collect()
    }
}

impl TryFrom<Vec<RouteStop>> for RouteIndexSequence {
    type Error = PlannerError;

    fn try_from(stops: Vec<RouteStop>) -> Result<Self, Self::Error> {
        Self::from_stops(&stops)
    }
}

impl From<RouteIndexSequence> for Vec<RouteStop> {
    fn from(sequence: RouteIndexSequence) -> Self {
        sequence.to_stops()
    }
}

/// One edge of a route between consecutive markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteLeg {
    /// Position of the leg's origin in the route sequence.
    pub from_position: usize,
    /// Position of the leg's destination in the route sequence.
    pub to_position: usize,
    pub distance_m: f64,
    pub duration_s: f64,
    /// Walking path, present only when directions were requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Polyline>,
}

/// Distance and walking time of a route variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteEstimate {
    pub total_distance_m: f64,
    pub estimated_time_minutes: f64,
}

impl RouteEstimate {
    pub fn from_distance(total_distance_m: f64, walking_speed_m_per_min: f64) -> Self {
        Self {
            total_distance_m,
            estimated_time_minutes: total_distance_m / walking_speed_m_per_min,
        }
    }
}

/// A finished route. Built once per planning call and never mutated;
/// edits produce a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedRoute {
    route: RouteIndexSequence,
    waypoint_ids: Vec<String>,
    total_distance_m: f64,
    estimated_time_minutes: f64,
    legs: Vec<RouteLeg>,
    score: f64,
}

impl PlannedRoute {
    pub(crate) fn new(
        route: RouteIndexSequence,
        waypoint_ids: Vec<String>,
        legs: Vec<RouteLeg>,
        walking_speed_m_per_min: f64,
        score: f64,
    ) -> Self {
        let estimate = RouteEstimate::from_distance(
            legs.iter().map(|leg| leg.distance_m).sum::<f64>(),
            walking_speed_m_per_min,
        );
        Self {
            route,
            waypoint_ids,
            total_distance_m: estimate.total_distance_m,
            estimated_time_minutes: estimate.estimated_time_minutes,
            legs,
            score,
        }
    }

    pub fn route(&self) -> &RouteIndexSequence {
        &self.route
    }

    /// IDs of the visited waypoints in route order.
    pub fn waypoint_ids(&self) -> &[String] {
        &self.waypoint_ids
    }

    pub fn total_distance_m(&self) -> f64 {
        self.total_distance_m
    }

    /// Walking time derived from the total distance at the planner's
    /// configured walking speed.
    pub fn estimated_time_minutes(&self) -> f64 {
        self.estimated_time_minutes
    }

    pub fn estimate(&self) -> RouteEstimate {
        RouteEstimate {
            total_distance_m: self.total_distance_m,
            estimated_time_minutes: self.estimated_time_minutes,
        }
    }

    pub fn legs(&self) -> &[RouteLeg] {
        &self.legs
    }

    /// Objective value: total distance plus the weighted leg spread.
    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn stop_count(&self) -> usize {
        self.route.stop_count()
    }

    pub fn leg_distances(&self) -> Vec<f64> {
        self.legs.iter().map(|leg| leg.distance_m).collect()
    }
}
