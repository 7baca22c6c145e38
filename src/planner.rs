//! Route planning orchestration.
//!
//! [`RoutePlanner`] ties the stages together: corridor selection, one
//! batched distance fetch for the endpoint legs, the optimizer, and leg
//! assembly. It also performs the local edits (alternatives, replace) on
//! routes it produced earlier.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::candidates::{Candidate, select_candidates};
use crate::error::{PlannerError, ProviderError, WaypointLookup};
use crate::geometry::{perpendicular_distance, planar_distance, project_onto_line};
use crate::haversine::HaversineProvider;
use crate::model::{
    Anchor, Coordinate, PlannedRoute, RouteEstimate, RouteIndexSequence, RouteLeg, RouteStop,
};
use crate::scoring::RouteScorer;
use crate::solver::{SearchSpace, SolveOptions, solve};
use crate::traits::DistanceProvider;
use crate::universe::WaypointUniverse;

/// Relative difference in spacing under which an alternative is tagged
/// [`AlternativeReason::SimilarSpacing`].
const SIMILAR_SPACING_TOLERANCE: f64 = 0.15;

/// Corridor offset under which an alternative counts as on the way.
const ON_THE_WAY_OFFSET_M: f64 = 150.0;

/// Distance and duration of one leg.
type LegCost = (f64, f64);

#[derive(Debug, Clone)]
pub struct PlannerOptions {
    pub solve: SolveOptions,
    /// Candidate pool size as a multiple of the requested stops.
    pub pool_multiplier: usize,
    /// Upper bound on the candidate pool (and so on the batched endpoint
    /// request).
    pub max_pool_size: usize,
    /// Largest accepted `num_pubs`.
    pub max_stops: usize,
    pub walking_speed_m_per_min: f64,
    /// Number of alternatives returned by [`RoutePlanner::suggest_alternatives`].
    pub max_alternatives: usize,
    /// Alternatives fetched per provider call when a neighbour of the
    /// removed stop is an endpoint.
    pub alternative_shortlist: usize,
    /// Start and end closer than this are rejected as the same point.
    pub endpoint_tolerance_m: f64,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            solve: SolveOptions::default(),
            pool_multiplier: 4,
            max_pool_size: 200,
            max_stops: 100,
            walking_speed_m_per_min: 80.0,
            max_alternatives: 5,
            alternative_shortlist: 25,
            endpoint_tolerance_m: 1.0,
        }
    }
}

/// Input to [`RoutePlanner::plan`].
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub start: Coordinate,
    pub end: Coordinate,
    pub num_pubs: usize,
    pub uniformity_weight: f64,
    pub include_directions: bool,
    /// Seed for the sampling optimizer. A random seed is drawn when unset.
    pub seed: Option<u64>,
    /// Waypoint IDs that must not appear in the route.
    pub excluded_ids: Vec<String>,
}

impl PlanRequest {
    pub fn new(start: Coordinate, end: Coordinate, num_pubs: usize) -> Self {
        Self {
            start,
            end,
            num_pubs,
            uniformity_weight: 0.2,
            include_directions: false,
            seed: None,
            excluded_ids: Vec::new(),
        }
    }

    pub fn with_uniformity_weight(mut self, weight: f64) -> Self {
        self.uniformity_weight = weight;
        self
    }

    pub fn with_directions(mut self, include: bool) -> Self {
        self.include_directions = include;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn excluding<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_ids.extend(ids.into_iter().map(Into::into));
        self
    }
}

/// Input to [`RoutePlanner::suggest_alternatives`].
#[derive(Debug, Clone)]
pub struct AlternativesRequest {
    pub start: Coordinate,
    pub end: Coordinate,
    pub route: RouteIndexSequence,
    /// Position in the full marker list (`start` is 0).
    pub removed_position: usize,
    pub excluded_ids: Vec<String>,
}

impl AlternativesRequest {
    pub fn new(
        start: Coordinate,
        end: Coordinate,
        route: RouteIndexSequence,
        removed_position: usize,
    ) -> Self {
        Self {
            start,
            end,
            route,
            removed_position,
            excluded_ids: Vec::new(),
        }
    }

    pub fn excluding<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_ids.extend(ids.into_iter().map(Into::into));
        self
    }
}

/// Input to [`RoutePlanner::replace_waypoint`].
#[derive(Debug, Clone)]
pub struct ReplaceRequest<'a> {
    pub start: Coordinate,
    pub end: Coordinate,
    /// Route being edited, as returned by `plan` or `evaluate_route` for the
    /// same endpoints.
    pub current: &'a PlannedRoute,
    pub removed_position: usize,
    /// Waypoint spliced in at `removed_position`; `None` just removes.
    pub replacement_id: Option<String>,
    /// Stop count of `current`.
    pub num_pubs: usize,
    pub uniformity_weight: f64,
    pub include_directions: bool,
}

impl<'a> ReplaceRequest<'a> {
    /// Removes the stop at `removed_position` without a replacement.
    pub fn remove(
        start: Coordinate,
        end: Coordinate,
        current: &'a PlannedRoute,
        removed_position: usize,
    ) -> Self {
        Self {
            start,
            end,
            current,
            removed_position,
            replacement_id: None,
            num_pubs: current.stop_count(),
            uniformity_weight: 0.2,
            include_directions: false,
        }
    }

    pub fn with_replacement(mut self, id: impl Into<String>) -> Self {
        self.replacement_id = Some(id.into());
        self
    }

    pub fn with_uniformity_weight(mut self, weight: f64) -> Self {
        self.uniformity_weight = weight;
        self
    }

    pub fn with_directions(mut self, include: bool) -> Self {
        self.include_directions = include;
        self
    }
}

/// Why an alternative was suggested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlternativeReason {
    /// Smallest added distance of all alternatives.
    #[serde(rename = "closest detour")]
    ClosestDetour,
    /// About as far from the previous stop as the removed waypoint was.
    #[serde(rename = "similar spacing")]
    SimilarSpacing,
    /// Close to the line between the neighbouring stops.
    #[serde(rename = "on the way")]
    OnTheWay,
    #[serde(rename = "nearby")]
    Nearby,
}

impl fmt::Display for AlternativeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ClosestDetour => "closest detour",
            Self::SimilarSpacing => "similar spacing",
            Self::OnTheWay => "on the way",
            Self::Nearby => "nearby",
        })
    }
}

/// A candidate replacement for a removed stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub waypoint_index: usize,
    pub waypoint_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub coordinate: Coordinate,
    /// Extra walking distance compared to skipping the stop entirely.
    pub added_distance_m: f64,
    pub reason: AlternativeReason,
}

/// Output of [`RoutePlanner::suggest_alternatives`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternatives {
    pub alternatives: Vec<Alternative>,
    /// The route with the stop dropped and nothing in its place.
    pub route_without: RouteEstimate,
}

/// Plans and edits routes over a shared waypoint universe.
///
/// Holds no per-request state: one planner can serve concurrent callers.
#[derive(Debug, Clone)]
pub struct RoutePlanner<P> {
    universe: Arc<WaypointUniverse>,
    provider: P,
    options: PlannerOptions,
}

impl<P: DistanceProvider> RoutePlanner<P> {
    pub fn new(universe: Arc<WaypointUniverse>, provider: P) -> Self {
        Self {
            universe,
            provider,
            options: PlannerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PlannerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn universe(&self) -> &WaypointUniverse {
        &self.universe
    }

    pub fn options(&self) -> &PlannerOptions {
        &self.options
    }

    /// Plans a route visiting `num_pubs` waypoints between the endpoints.
    #[instrument(
        skip(self, request),
        fields(num_pubs = request.num_pubs, weight = request.uniformity_weight)
    )]
    pub fn plan(&self, request: &PlanRequest) -> Result<PlannedRoute, PlannerError> {
        self.validate_endpoints(request.start, request.end)?;
        validate_weight(request.uniformity_weight)?;
        if request.num_pubs == 0 || request.num_pubs > self.options.max_stops {
            return Err(PlannerError::invalid_request(format!(
                "num_pubs must be between 1 and {}, got {}",
                self.options.max_stops, request.num_pubs
            )));
        }

        let excluded = self.resolve_excluded(&request.excluded_ids);
        let pool = select_candidates(
            &self.universe,
            request.start,
            request.end,
            request.num_pubs,
            self.pool_size(request.num_pubs),
            &excluded,
        );
        if pool.len() < request.num_pubs {
            return Err(PlannerError::InsufficientCandidates {
                available: pool.len(),
                requested: request.num_pubs,
            });
        }
        debug!(pool = pool.len(), "candidate pool selected");

        // Sources are [start, pool..], destinations [pool.., end]; column
        // `node - 1` holds search node `node`.
        let mut sources = Vec::with_capacity(pool.len() + 1);
        sources.push(request.start);
        sources.extend(pool.iter().map(|c| self.universe.coordinate(c.index)));
        let mut destinations: Vec<Coordinate> = sources[1..].to_vec();
        destinations.push(request.end);
        let endpoint = self.provider.distance_matrix(&sources, &destinations)?;
        endpoint.ensure_shape(sources.len(), destinations.len())?;

        let space = self.search_space(&pool, &endpoint.distances);
        let end_node = space.end();
        let scorer = RouteScorer::new(request.uniformity_weight);
        let seed = request.seed.unwrap_or_else(rand::random);
        let solution = solve(&space, request.num_pubs, &scorer, &self.options.solve, seed).ok_or(
            PlannerError::InsufficientCandidates {
                available: pool.len(),
                requested: request.num_pubs,
            },
        )?;

        let stop = |node: usize| match node {
            SearchSpace::START => RouteStop::START,
            node if node == end_node => RouteStop::END,
            node => RouteStop::Waypoint(pool[node - 1].index),
        };
        let known: HashMap<(RouteStop, RouteStop), LegCost> = solution
            .path
            .windows(2)
            .filter(|leg| leg[0] == SearchSpace::START || leg[1] == end_node)
            .map(|leg| {
                let (from, to) = (leg[0], leg[1] - 1);
                let cost = (endpoint.distances[from][to], endpoint.durations[from][to]);
                ((stop(leg[0]), stop(leg[1])), cost)
            })
            .collect();

        let interior = &solution.path[1..solution.path.len() - 1];
        let route =
            RouteIndexSequence::new(interior.iter().map(|node| pool[node - 1].index).collect())?;
        let mut legs = self.assemble_legs(request.start, request.end, &route, &known)?;
        if request.include_directions {
            self.attach_directions(request.start, request.end, &route, &mut legs)?;
        }
        Ok(self.finish(route, legs, &scorer))
    }

    /// Builds a [`PlannedRoute`] for an index sequence the caller already
    /// holds. Only the legs touching the endpoints hit the provider, in one
    /// batched call.
    #[instrument(skip(self, route), fields(stops = route.stop_count()))]
    pub fn evaluate_route(
        &self,
        start: Coordinate,
        end: Coordinate,
        route: &RouteIndexSequence,
        uniformity_weight: f64,
    ) -> Result<PlannedRoute, PlannerError> {
        self.validate_endpoints(start, end)?;
        validate_weight(uniformity_weight)?;
        self.validate_route(route)?;

        let legs = self.assemble_legs(start, end, route, &HashMap::new())?;
        Ok(self.finish(route.clone(), legs, &RouteScorer::new(uniformity_weight)))
    }

    /// Walking directions for every leg of `route`, from a single
    /// route-service call.
    #[instrument(skip(self, route), fields(stops = route.stop_count()))]
    pub fn get_directions(
        &self,
        start: Coordinate,
        end: Coordinate,
        route: &RouteIndexSequence,
    ) -> Result<Vec<RouteLeg>, PlannerError> {
        self.validate_endpoints(start, end)?;
        self.validate_route(route)?;

        let coordinates: Vec<Coordinate> = route
            .iter()
            .map(|stop| self.stop_coordinate(stop, start, end))
            .collect();
        let directions = self.provider.route_legs(&coordinates)?;
        check_leg_count(directions.len(), coordinates.len() - 1)?;

        Ok(directions
            .into_iter()
            .enumerate()
            .map(|(position, leg)| RouteLeg {
                from_position: position,
                to_position: position + 1,
                distance_m: leg.distance_m,
                duration_s: leg.duration_s,
                geometry: Some(leg.geometry),
            })
            .collect())
    }

    /// Ranks waypoints that could stand in for the stop at
    /// `removed_position`, by the distance they add over skipping it, and
    /// estimates the route with the stop skipped. Read-only.
    #[instrument(skip(self, request), fields(position = request.removed_position))]
    pub fn suggest_alternatives(
        &self,
        request: &AlternativesRequest,
    ) -> Result<Alternatives, PlannerError> {
        self.validate_endpoints(request.start, request.end)?;
        self.validate_route(&request.route)?;
        let position = request.removed_position;
        let removed = removed_waypoint(&request.route, position)?;
        let prev = request.route.get(position - 1).unwrap_or(RouteStop::START);
        let next = request.route.get(position + 1).unwrap_or(RouteStop::END);

        let mut excluded = self.resolve_excluded(&request.excluded_ids);
        excluded.extend(request.route.waypoints().iter().copied());
        let eligible: Vec<usize> = (0..self.universe.len())
            .filter(|index| !excluded.contains(index))
            .collect();

        let costs =
            self.detour_costs(request.start, request.end, prev, next, removed, &eligible)?;
        let route_without = self.estimate_without(request, &costs)?;

        let mut ranked: Vec<(usize, f64, f64)> = costs
            .candidates
            .iter()
            .map(|&(index, from_prev, to_next)| {
                (index, from_prev + to_next - costs.prev_to_next, from_prev)
            })
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        ranked.truncate(self.options.max_alternatives);

        let prev_coordinate = self.stop_coordinate(prev, request.start, request.end);
        let next_coordinate = self.stop_coordinate(next, request.start, request.end);
        let alternatives = ranked
            .into_iter()
            .enumerate()
            .filter_map(|(rank, (index, added_distance_m, from_prev))| {
                let waypoint = self.universe.waypoint(index)?;
                let point = waypoint.coordinate;
                let spacing_gap = (from_prev - costs.prev_to_removed).abs();
                let reason = if rank == 0 {
                    AlternativeReason::ClosestDetour
                } else if spacing_gap <= SIMILAR_SPACING_TOLERANCE * costs.prev_to_removed {
                    AlternativeReason::SimilarSpacing
                } else if (0.0..=1.0)
                    .contains(&project_onto_line(point, prev_coordinate, next_coordinate))
                    && perpendicular_distance(point, prev_coordinate, next_coordinate)
                        <= ON_THE_WAY_OFFSET_M
                {
                    AlternativeReason::OnTheWay
                } else {
                    AlternativeReason::Nearby
                };
                Some(Alternative {
                    waypoint_index: index,
                    waypoint_id: waypoint.id.clone(),
                    name: waypoint.name.clone(),
                    coordinate: point,
                    added_distance_m,
                    reason,
                })
            })
            .collect();

        Ok(Alternatives {
            alternatives,
            route_without,
        })
    }

    /// Removes the stop at `removed_position`, optionally splicing a
    /// replacement into the same slot. Every other stop keeps its order and
    /// legs that did not change are reused; no re-optimization happens.
    #[instrument(
        skip(self, request),
        fields(position = request.removed_position, replacement = ?request.replacement_id)
    )]
    pub fn replace_waypoint(
        &self,
        request: &ReplaceRequest<'_>,
    ) -> Result<PlannedRoute, PlannerError> {
        self.validate_endpoints(request.start, request.end)?;
        validate_weight(request.uniformity_weight)?;
        let current = request.current.route();
        self.validate_route(current)?;
        if request.num_pubs != current.stop_count() {
            return Err(PlannerError::invalid_request(format!(
                "num_pubs is {} but the route has {} stops",
                request.num_pubs,
                current.stop_count()
            )));
        }
        let removed = removed_waypoint(current, request.removed_position)?;

        let mut waypoints = current.waypoints().to_vec();
        match &request.replacement_id {
            Some(id) => {
                let index = self.universe.index_of(id).ok_or_else(|| {
                    PlannerError::WaypointNotFound {
                        id: id.clone(),
                        reason: WaypointLookup::Unknown,
                    }
                })?;
                if index != removed && current.contains(index) {
                    return Err(PlannerError::WaypointNotFound {
                        id: id.clone(),
                        reason: WaypointLookup::AlreadyInRoute,
                    });
                }
                waypoints[request.removed_position - 1] = index;
            }
            None => {
                waypoints.remove(request.removed_position - 1);
            }
        }
        let route = RouteIndexSequence::new(waypoints)?;

        let known: HashMap<(RouteStop, RouteStop), LegCost> = current
            .to_stops()
            .windows(2)
            .zip(request.current.legs())
            .map(|(pair, leg)| ((pair[0], pair[1]), (leg.distance_m, leg.duration_s)))
            .collect();
        let mut legs = self.assemble_legs(request.start, request.end, &route, &known)?;
        if request.include_directions {
            self.attach_directions(request.start, request.end, &route, &mut legs)?;
        }
        Ok(self.finish(route, legs, &RouteScorer::new(request.uniformity_weight)))
    }

    fn pool_size(&self, num_pubs: usize) -> usize {
        num_pubs
            .saturating_mul(self.options.pool_multiplier)
            .min(self.options.max_pool_size)
            .max(num_pubs)
    }

    fn validate_endpoints(&self, start: Coordinate, end: Coordinate) -> Result<(), PlannerError> {
        for (label, point) in [("start", start), ("end", end)] {
            if !point.is_valid() {
                return Err(PlannerError::invalid_request(format!(
                    "{label} ({}, {}) is not a valid longitude/latitude",
                    point.longitude, point.latitude
                )));
            }
        }
        if planar_distance(start, end) < self.options.endpoint_tolerance_m {
            return Err(PlannerError::invalid_request("start and end are the same point"));
        }
        Ok(())
    }

    fn validate_route(&self, route: &RouteIndexSequence) -> Result<(), PlannerError> {
        match route.waypoints().iter().find(|index| **index >= self.universe.len()) {
            Some(index) => Err(PlannerError::invalid_request(format!(
                "waypoint index {index} is outside the universe of {}",
                self.universe.len()
            ))),
            None => Ok(()),
        }
    }

    fn resolve_excluded(&self, ids: &[String]) -> HashSet<usize> {
        ids.iter()
            .filter_map(|id| {
                let index = self.universe.index_of(id);
                if index.is_none() {
                    debug!(%id, "ignoring unknown excluded waypoint");
                }
                index
            })
            .collect()
    }

    /// Square matrix over `[start, pool.., end]`: endpoint legs from the
    /// provider, candidate pairs from the universe.
    fn search_space(&self, pool: &[Candidate], endpoint: &[Vec<f64>]) -> SearchSpace {
        let n = pool.len();
        let end_node = n + 1;
        let mut matrix = vec![vec![0.0; n + 2]; n + 2];
        for from in 0..=n {
            for to in 1..=end_node {
                if from == to {
                    continue;
                }
                matrix[from][to] = if from == SearchSpace::START || to == end_node {
                    endpoint[from][to - 1]
                } else {
                    self.universe.distance(pool[from - 1].index, pool[to - 1].index)
                };
            }
        }
        for node in 1..=end_node {
            matrix[node][SearchSpace::START] = matrix[SearchSpace::START][node];
        }
        for node in 0..=n {
            matrix[end_node][node] = matrix[node][end_node];
        }
        SearchSpace::new(matrix).with_progress(pool.iter().map(|c| c.progress).collect())
    }

    fn stop_coordinate(&self, stop: RouteStop, start: Coordinate, end: Coordinate) -> Coordinate {
        match stop {
            RouteStop::Anchor(Anchor::Start) => start,
            RouteStop::Anchor(Anchor::End) => end,
            RouteStop::Waypoint(index) => self.universe.coordinate(index),
        }
    }

    fn walking_leg(&self, from: usize, to: usize) -> LegCost {
        let distance = self.universe.distance(from, to);
        (distance, distance / self.options.walking_speed_m_per_min * 60.0)
    }

    /// Leg costs for `route`. Waypoint pairs come from the universe, other
    /// legs from `known` or else from one batched provider call.
    fn assemble_legs(
        &self,
        start: Coordinate,
        end: Coordinate,
        route: &RouteIndexSequence,
        known: &HashMap<(RouteStop, RouteStop), LegCost>,
    ) -> Result<Vec<RouteLeg>, PlannerError> {
        let stops = route.to_stops();
        let mut legs = Vec::with_capacity(stops.len() - 1);
        let mut missing = Vec::new();

        for (position, pair) in stops.windows(2).enumerate() {
            let cost = match (pair[0], pair[1]) {
                (RouteStop::Waypoint(from), RouteStop::Waypoint(to)) => {
                    Some(self.walking_leg(from, to))
                }
                key => known.get(&key).copied(),
            };
            if cost.is_none() {
                missing.push(position);
            }
            let (distance_m, duration_s) = cost.unwrap_or_default();
            legs.push(RouteLeg {
                from_position: position,
                to_position: position + 1,
                distance_m,
                duration_s,
                geometry: None,
            });
        }

        if !missing.is_empty() {
            let sources: Vec<Coordinate> = missing
                .iter()
                .map(|p| self.stop_coordinate(stops[*p], start, end))
                .collect();
            let destinations: Vec<Coordinate> = missing
                .iter()
                .map(|p| self.stop_coordinate(stops[p + 1], start, end))
                .collect();
            let matrix = self.provider.distance_matrix(&sources, &destinations)?;
            matrix.ensure_shape(missing.len(), missing.len())?;
            for (k, position) in missing.iter().enumerate() {
                legs[*position].distance_m = matrix.distances[k][k];
                legs[*position].duration_s = matrix.durations[k][k];
            }
            debug!(fetched = missing.len(), "fetched endpoint legs");
        }
        Ok(legs)
    }

    /// Replaces leg durations with route-service values and adds geometry.
    /// Distances stay as planned so the score keeps describing the route.
    fn attach_directions(
        &self,
        start: Coordinate,
        end: Coordinate,
        route: &RouteIndexSequence,
        legs: &mut [RouteLeg],
    ) -> Result<(), PlannerError> {
        let coordinates: Vec<Coordinate> = route
            .iter()
            .map(|stop| self.stop_coordinate(stop, start, end))
            .collect();
        let directions = self.provider.route_legs(&coordinates)?;
        check_leg_count(directions.len(), legs.len())?;
        for (leg, direction) in legs.iter_mut().zip(directions) {
            leg.duration_s = direction.duration_s;
            leg.geometry = Some(direction.geometry);
        }
        Ok(())
    }

    /// Detour distances through `eligible` waypoints, enough to rank the
    /// best `max_alternatives` of them exactly.
    ///
    /// Between two waypoints everything comes from the universe. Next to an
    /// endpoint the straight-line distance to the endpoint bounds the walk
    /// from below, so candidates are fetched in order of that bound until no
    /// unfetched one can beat the current top list.
    fn detour_costs(
        &self,
        start: Coordinate,
        end: Coordinate,
        prev: RouteStop,
        next: RouteStop,
        removed: usize,
        eligible: &[usize],
    ) -> Result<DetourCosts, PlannerError> {
        if let (RouteStop::Waypoint(p), RouteStop::Waypoint(q)) = (prev, next) {
            return Ok(DetourCosts {
                prev_to_next: self.universe.distance(p, q),
                prev_to_removed: self.universe.distance(p, removed),
                bridge: None,
                candidates: eligible
                    .iter()
                    .map(|&c| (c, self.universe.distance(p, c), self.universe.distance(c, q)))
                    .collect(),
            });
        }

        let prev_coordinate = self.stop_coordinate(prev, start, end);
        let next_coordinate = self.stop_coordinate(next, start, end);
        let side = |stop: RouteStop, at: Coordinate, c: usize| match stop {
            RouteStop::Waypoint(w) => self.universe.distance(w, c),
            RouteStop::Anchor(_) => HaversineProvider::haversine_m(at, self.universe.coordinate(c)),
        };
        let mut bounded: Vec<(f64, usize)> = eligible
            .iter()
            .map(|&c| (side(prev, prev_coordinate, c) + side(next, next_coordinate, c), c))
            .collect();
        bounded.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let batch_size = self.options.alternative_shortlist.max(1);
        let mut batches = bounded.chunks(batch_size);
        let first: Vec<usize> = batches
            .next()
            .map(|batch| batch.iter().map(|(_, c)| *c).collect())
            .unwrap_or_default();
        let mut costs =
            self.fetch_detours(prev, next, prev_coordinate, next_coordinate, removed, &first)?;
        for batch in batches {
            if kth_detour(&costs.candidates, self.options.max_alternatives) <= batch[0].0 {
                break;
            }
            let batch: Vec<usize> = batch.iter().map(|(_, c)| *c).collect();
            let more =
                self.fetch_detours(prev, next, prev_coordinate, next_coordinate, removed, &batch)?;
            costs.candidates.extend(more.candidates);
        }
        Ok(costs)
    }

    /// One provider call covering `[prev, batch..] x [batch.., removed, next]`.
    fn fetch_detours(
        &self,
        prev: RouteStop,
        next: RouteStop,
        prev_coordinate: Coordinate,
        next_coordinate: Coordinate,
        removed: usize,
        batch: &[usize],
    ) -> Result<DetourCosts, PlannerError> {
        let m = batch.len();
        let mut sources = Vec::with_capacity(m + 1);
        sources.push(prev_coordinate);
        sources.extend(batch.iter().map(|c| self.universe.coordinate(*c)));
        let mut destinations: Vec<Coordinate> = sources[1..].to_vec();
        destinations.push(self.universe.coordinate(removed));
        destinations.push(next_coordinate);
        let matrix = self.provider.distance_matrix(&sources, &destinations)?;
        matrix.ensure_shape(m + 1, m + 2)?;
        let d = &matrix.distances;
        debug!(fetched = m, "fetched detour distances");

        let prev_to = |k: usize, destination: usize| match prev {
            RouteStop::Waypoint(p) => self.universe.distance(p, destination),
            RouteStop::Anchor(_) => d[0][k],
        };
        let to_next = |k: usize, origin: usize| match next {
            RouteStop::Waypoint(q) => self.universe.distance(origin, q),
            RouteStop::Anchor(_) => d[k + 1][m + 1],
        };

        Ok(DetourCosts {
            prev_to_next: d[0][m + 1],
            prev_to_removed: prev_to(m, removed),
            bridge: Some(((prev, next), (d[0][m + 1], matrix.durations[0][m + 1]))),
            candidates: batch
                .iter()
                .enumerate()
                .map(|(k, &c)| (c, prev_to(k, c), to_next(k, c)))
                .collect(),
        })
    }

    /// Totals of `request.route` with the removed stop skipped. Legs other
    /// than the bridge come from the universe or one batched call.
    fn estimate_without(
        &self,
        request: &AlternativesRequest,
        costs: &DetourCosts,
    ) -> Result<RouteEstimate, PlannerError> {
        let mut waypoints = request.route.waypoints().to_vec();
        waypoints.remove(request.removed_position - 1);
        let route = RouteIndexSequence::new(waypoints)?;
        let known: HashMap<(RouteStop, RouteStop), LegCost> = costs.bridge.into_iter().collect();
        let legs = self.assemble_legs(request.start, request.end, &route, &known)?;
        Ok(RouteEstimate::from_distance(
            legs.iter().map(|leg| leg.distance_m).sum(),
            self.options.walking_speed_m_per_min,
        ))
    }

    fn finish(
        &self,
        route: RouteIndexSequence,
        legs: Vec<RouteLeg>,
        scorer: &RouteScorer,
    ) -> PlannedRoute {
        let waypoint_ids = route
            .waypoints()
            .iter()
            .map(|index| self.universe.waypoints()[*index].id.clone())
            .collect();
        let distances: Vec<f64> = legs.iter().map(|leg| leg.distance_m).collect();
        let score = scorer.score(&distances);
        PlannedRoute::new(route, waypoint_ids, legs, self.options.walking_speed_m_per_min, score)
    }
}

struct DetourCosts {
    prev_to_next: f64,
    prev_to_removed: f64,
    /// Provider cost of the prev -> next leg, when one of them is an anchor.
    bridge: Option<((RouteStop, RouteStop), LegCost)>,
    /// `(waypoint, prev -> waypoint, waypoint -> next)` per evaluated waypoint.
    candidates: Vec<(usize, f64, f64)>,
}

/// `prev -> c -> next` length of the `k`-th shortest evaluated detour;
/// infinite while fewer than `k` are known.
fn kth_detour(candidates: &[(usize, f64, f64)], k: usize) -> f64 {
    if k == 0 {
        return f64::NEG_INFINITY;
    }
    let mut lengths: Vec<f64> = candidates.iter().map(|(_, a, b)| a + b).collect();
    lengths.sort_by(f64::total_cmp);
    lengths.get(k - 1).copied().unwrap_or(f64::INFINITY)
}

fn validate_weight(weight: f64) -> Result<(), PlannerError> {
    if (0.0..=1.0).contains(&weight) {
        Ok(())
    } else {
        Err(PlannerError::invalid_request(format!(
            "uniformity_weight must be within [0, 1], got {weight}"
        )))
    }
}

/// Universe index at `position`, which must name an interior stop.
fn removed_waypoint(route: &RouteIndexSequence, position: usize) -> Result<usize, PlannerError> {
    match route.get(position) {
        Some(RouteStop::Waypoint(index)) => Ok(index),
        _ => Err(PlannerError::invalid_request(format!(
            "position {position} is not a waypoint of a route with {} stops",
            route.stop_count()
        ))),
    }
}

fn check_leg_count(actual: usize, expected: usize) -> Result<(), ProviderError> {
    if actual == expected {
        Ok(())
    } else {
        Err(ProviderError::MalformedResponse(format!(
            "expected {expected} legs of directions, got {actual}"
        )))
    }
}
