//! Pubs and landmarks in central Bristol for realistic fixtures.
//!
//! Coordinates are approximate, taken from OpenStreetMap, and routable
//! with the foot profile on the Geofabrik Bristol extract.

use std::sync::Arc;

use crawl_planner::haversine::HaversineProvider;
use crawl_planner::model::Coordinate;
use crawl_planner::universe::{DEFAULT_PRECOMPUTE_BATCH, Waypoint, WaypointUniverse};

/// A named location. Longitude comes first, as everywhere in the crate.
#[derive(Debug, Clone)]
pub struct Location {
    pub id: &'static str,
    pub name: &'static str,
    pub longitude: f64,
    pub latitude: f64,
}

impl Location {
    pub const fn new(id: &'static str, name: &'static str, longitude: f64, latitude: f64) -> Self {
        Self {
            id,
            name,
            longitude,
            latitude,
        }
    }

    pub const fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.longitude, self.latitude)
    }

    pub fn waypoint(&self) -> Waypoint {
        Waypoint::new(self.id, self.coordinate()).with_name(self.name)
    }
}

// ============================================================================
// Landmarks (start/end points)
// ============================================================================

pub const TEMPLE_MEADS: Location =
    Location::new("temple-meads", "Bristol Temple Meads", -2.5813, 51.4491);
pub const SUSPENSION_BRIDGE: Location =
    Location::new("suspension-bridge", "Clifton Suspension Bridge", -2.6276, 51.4549);
pub const CABOT_CIRCUS: Location = Location::new("cabot-circus", "Cabot Circus", -2.5848, 51.4588);

// ============================================================================
// Old City and harbourside
// ============================================================================

pub const OLD_CITY: &[Location] = &[
    Location::new("llandoger-trow", "The Llandoger Trow", -2.5929, 51.4517),
    Location::new("old-duke", "The Old Duke", -2.5936, 51.4519),
    Location::new("royal-navy-volunteer", "The Famous Royal Navy Volunteer", -2.5933, 51.4515),
    Location::new("bank-tavern", "The Bank Tavern", -2.5931, 51.4548),
    Location::new("commercial-rooms", "The Commercial Rooms", -2.5925, 51.4544),
    Location::new("apple", "The Apple", -2.5924, 51.4503),
    Location::new("seven-stars", "The Seven Stars", -2.5886, 51.4505),
    Location::new("cornubia", "The Cornubia", -2.5870, 51.4550),
    Location::new("hatchet", "The Hatchet Inn", -2.6000, 51.4540),
];

// ============================================================================
// Hotwells and Clifton Wood
// ============================================================================

pub const HOTWELLS: &[Location] = &[
    Location::new("three-tuns", "The Three Tuns", -2.6059, 51.4536),
    Location::new("hope-and-anchor", "The Hope & Anchor", -2.6061, 51.4542),
    Location::new("bag-o-nails", "The Bag O'Nails", -2.6059, 51.4522),
    Location::new("grain-barge", "The Grain Barge", -2.6085, 51.4490),
    Location::new("orchard", "The Orchard", -2.6075, 51.4478),
    Location::new("mardyke", "The Mardyke", -2.6128, 51.4497),
];

pub fn all_pubs() -> Vec<Location> {
    OLD_CITY.iter().chain(HOTWELLS).cloned().collect()
}

/// Every fixture pub with straight-line distances.
pub fn bristol_universe() -> Arc<WaypointUniverse> {
    let waypoints = all_pubs().iter().map(Location::waypoint).collect();
    let universe = WaypointUniverse::precompute(
        waypoints,
        &HaversineProvider::default(),
        DEFAULT_PRECOMPUTE_BATCH,
    )
    .expect("haversine precompute cannot fail");
    Arc::new(universe)
}
