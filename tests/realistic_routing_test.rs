//! Realistic crawl planning over central Bristol pubs.
//!
//! The straight-line tests always run. The OSRM variant walks the real
//! street network and is ignored unless Docker is available.

mod fixtures;

use std::collections::HashSet;
use std::sync::Arc;

use crawl_planner::haversine::HaversineProvider;
use crawl_planner::model::{PlannedRoute, RouteIndexSequence};
use crawl_planner::planner::{AlternativesRequest, PlanRequest, ReplaceRequest, RoutePlanner};
use crawl_planner::universe::{DEFAULT_PRECOMPUTE_BATCH, WaypointUniverse};

use fixtures::osrm_container::osrm_container;
use fixtures::{CABOT_CIRCUS, SUSPENSION_BRIDGE, TEMPLE_MEADS, all_pubs, bristol_universe};

// ============================================================================
// Helpers
// ============================================================================

fn planner() -> RoutePlanner<HaversineProvider> {
    RoutePlanner::new(bristol_universe(), HaversineProvider::default())
}

fn assert_well_formed(planned: &PlannedRoute, num_pubs: usize) {
    let stops: HashSet<_> = planned.route().waypoints().iter().collect();
    assert_eq!(stops.len(), num_pubs, "stops must be distinct");
    assert_eq!(planned.waypoint_ids().len(), num_pubs);
    assert_eq!(planned.legs().len(), num_pubs + 1);
    assert!(planned.total_distance_m() > 0.0);

    let summed: f64 = planned.legs().iter().map(|leg| leg.distance_m).sum();
    assert!((summed - planned.total_distance_m()).abs() < 1e-6);
}

// ============================================================================
// Straight-line distances
// ============================================================================

/// Station to the bridge: a classic west-bound crawl.
#[test]
fn test_station_to_bridge_crawl() {
    let planner = planner();
    let request = PlanRequest::new(TEMPLE_MEADS.coordinate(), SUSPENSION_BRIDGE.coordinate(), 5)
        .with_seed(2024);
    let planned = planner.plan(&request).unwrap();

    assert_well_formed(&planned, 5);
    // A 3.3 km corridor should not turn into a marathon.
    assert!(planned.total_distance_m() < 6_000.0, "got {}", planned.total_distance_m());
    println!(
        "{:?} -> {:.0} m, {:.0} min",
        planned.waypoint_ids(),
        planned.total_distance_m(),
        planned.estimated_time_minutes()
    );
}

/// Longer than the sampling threshold, so the greedy optimizer runs.
#[test]
fn test_long_crawl_uses_most_of_the_city() {
    let planner = planner();
    let request = PlanRequest::new(CABOT_CIRCUS.coordinate(), SUSPENSION_BRIDGE.coordinate(), 12);
    let first = planner.plan(&request).unwrap();
    let second = planner.plan(&request).unwrap();

    assert_well_formed(&first, 12);
    assert_eq!(first.route(), second.route());
}

#[test]
fn test_asking_for_every_pub() {
    let planner = planner();
    let count = all_pubs().len();
    let request =
        PlanRequest::new(TEMPLE_MEADS.coordinate(), SUSPENSION_BRIDGE.coordinate(), count);
    let planned = planner.plan(&request).unwrap();
    assert_well_formed(&planned, count);
}

#[test]
fn test_edit_session() {
    let planner = planner();
    let start = TEMPLE_MEADS.coordinate();
    let end = SUSPENSION_BRIDGE.coordinate();
    let planned = planner
        .plan(&PlanRequest::new(start, end, 4).with_uniformity_weight(0.5).with_seed(7))
        .unwrap();

    // The API layer only keeps the index list between requests.
    let json = serde_json::to_string(planned.route()).unwrap();
    let route: RouteIndexSequence = serde_json::from_str(&json).unwrap();
    let restored = planner.evaluate_route(start, end, &route, 0.5).unwrap();
    assert!((restored.total_distance_m() - planned.total_distance_m()).abs() < 1e-6);

    let suggested = planner
        .suggest_alternatives(&AlternativesRequest::new(start, end, route.clone(), 2))
        .unwrap();
    assert!(!suggested.alternatives.is_empty());
    let pick = &suggested.alternatives[0];
    assert!(!route.contains(pick.waypoint_index));
    // Dropping a stop never makes the walk longer on straight lines.
    assert!(suggested.route_without.total_distance_m <= restored.total_distance_m() + 1e-6);

    let edited = planner
        .replace_waypoint(
            &ReplaceRequest::remove(start, end, &restored, 2)
                .with_replacement(pick.waypoint_id.clone())
                .with_uniformity_weight(0.5),
        )
        .unwrap();
    assert_well_formed(&edited, 4);
    assert_eq!(edited.route().waypoints()[1], pick.waypoint_index);
    assert_eq!(edited.route().waypoints()[0], route.waypoints()[0]);
    assert_eq!(edited.route().waypoints()[2..], route.waypoints()[2..]);

    let directions = planner.get_directions(start, end, edited.route()).unwrap();
    assert_eq!(directions.len(), 5);
}

#[test]
fn test_universe_survives_persistence() {
    let universe = bristol_universe();
    let json = serde_json::to_string(universe.as_ref()).unwrap();
    let restored: WaypointUniverse = serde_json::from_str(&json).unwrap();
    assert_eq!(restored.len(), universe.len());

    let planner = RoutePlanner::new(Arc::new(restored), HaversineProvider::default());
    let request =
        PlanRequest::new(TEMPLE_MEADS.coordinate(), CABOT_CIRCUS.coordinate(), 3).with_seed(1);
    assert_eq!(
        planner.plan(&request).unwrap().route(),
        self::planner().plan(&request).unwrap().route()
    );
}

// ============================================================================
// OSRM walking network
// ============================================================================

#[test]
#[ignore]
fn test_station_to_bridge_with_osrm() {
    let (_container, osrm) = osrm_container().expect("start OSRM container");
    let waypoints = all_pubs().iter().map(|p| p.waypoint()).collect();
    let universe = WaypointUniverse::precompute(waypoints, &osrm, DEFAULT_PRECOMPUTE_BATCH)
        .expect("precompute over OSRM");
    let planner = RoutePlanner::new(Arc::new(universe), osrm);

    let request = PlanRequest::new(TEMPLE_MEADS.coordinate(), SUSPENSION_BRIDGE.coordinate(), 5)
        .with_seed(2024)
        .with_directions(true);
    let planned = planner.plan(&request).unwrap();

    assert_well_formed(&planned, 5);
    // Streets are never shorter than the straight line.
    let straight =
        HaversineProvider::haversine_m(TEMPLE_MEADS.coordinate(), SUSPENSION_BRIDGE.coordinate());
    assert!(planned.total_distance_m() >= straight);
    assert!(
        planned
            .legs()
            .iter()
            .all(|leg| leg.geometry.as_ref().is_some_and(|g| g.len() >= 2))
    );
}
