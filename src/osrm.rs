//! OSRM HTTP adapter for walking distances and per-leg geometry.

use std::env;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::model::Coordinate;
use crate::polyline::Polyline;
use crate::traits::{DistanceMatrix, DistanceProvider, LegGeometry};

/// Distance reported for pairs OSRM cannot route between. Large enough
/// that the optimizer never picks such a leg when any alternative exists.
pub const UNROUTABLE_DISTANCE_M: f64 = 1.0e7;

#[derive(Debug, Clone)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout_secs: u64,
    /// Largest table side the server accepts (`osrm-routed
    /// --max-table-size`). Bigger requests are split into blocks.
    pub max_table_size: usize,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5005".to_string(),
            profile: "foot".to_string(),
            timeout_secs: 10,
            max_table_size: 100,
        }
    }
}

impl OsrmConfig {
    /// Defaults overridden by `OSRM_URL`, `OSRM_PROFILE`,
    /// `OSRM_TIMEOUT_SECS` and `OSRM_MAX_TABLE_SIZE` when set. Unparsable
    /// numbers are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = env::var("OSRM_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(profile) = env::var("OSRM_PROFILE") {
            config.profile = profile;
        }
        if let Ok(timeout) = env::var("OSRM_TIMEOUT_SECS") {
            match timeout.parse() {
                Ok(secs) => config.timeout_secs = secs,
                Err(_) => warn!(value = %timeout, "ignoring invalid OSRM_TIMEOUT_SECS"),
            }
        }
        if let Ok(size) = env::var("OSRM_MAX_TABLE_SIZE") {
            match size.parse() {
                Ok(size) if size > 0 => config.max_table_size = size,
                _ => warn!(value = %size, "ignoring invalid OSRM_MAX_TABLE_SIZE"),
            }
        }
        config
    }
}

#[derive(Debug, Clone)]
pub struct OsrmClient {
    config: OsrmConfig,
    client: reqwest::blocking::Client,
}

impl OsrmClient {
    pub fn new(config: OsrmConfig) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &OsrmConfig {
        &self.config
    }

    fn service_url(&self, service: &str, coordinates: &[Coordinate]) -> String {
        format!(
            "{}/{}/v1/{}/{}",
            self.config.base_url,
            service,
            self.config.profile,
            format_coordinates(coordinates)
        )
    }

    /// One table request; both sides must fit the server limit.
    fn table(
        &self,
        sources: &[Coordinate],
        destinations: &[Coordinate],
    ) -> Result<DistanceMatrix, ProviderError> {
        let query = TableQuery::new(sources, destinations);
        let url = self.service_url("table", &query.coordinates);
        let sources_param = index_list(&query.sources);
        let destinations_param = index_list(&query.destinations);

        debug!(
            sources = sources.len(),
            destinations = destinations.len(),
            coordinates = query.coordinates.len(),
            "requesting OSRM table"
        );
        let body: OsrmTableResponse = self
            .client
            .get(url)
            .query(&[
                ("sources", sources_param.as_str()),
                ("destinations", destinations_param.as_str()),
                ("annotations", "distance,duration"),
            ])
            .send()?
            .json()?;

        let matrix = body.into_matrix()?;
        matrix.ensure_shape(sources.len(), destinations.len())?;
        Ok(matrix)
    }
}

/// Table request with every distinct coordinate listed once. A plan
/// request shares its pool between sources and destinations, so this
/// roughly halves the URL.
#[derive(Debug)]
struct TableQuery {
    coordinates: Vec<Coordinate>,
    sources: Vec<usize>,
    destinations: Vec<usize>,
}

impl TableQuery {
    fn new(sources: &[Coordinate], destinations: &[Coordinate]) -> Self {
        let mut coordinates: Vec<Coordinate> = Vec::new();
        let mut locate = |point: Coordinate| match coordinates.iter().position(|c| *c == point) {
            Some(index) => index,
            None => {
                coordinates.push(point);
                coordinates.len() - 1
            }
        };
        let sources = sources.iter().map(|point| locate(*point)).collect();
        let destinations = destinations.iter().map(|point| locate(*point)).collect();
        Self {
            coordinates,
            sources,
            destinations,
        }
    }
}

/// `(row_start, col_start, rows, cols)` blocks covering a
/// `sources x destinations` table with no side longer than `max_side`.
fn table_blocks(
    sources: usize,
    destinations: usize,
    max_side: usize,
) -> Vec<(usize, usize, usize, usize)> {
    let side = max_side.max(1);
    (0..sources)
        .step_by(side)
        .flat_map(|row| {
            (0..destinations).step_by(side).map(move |col| {
                (row, col, side.min(sources - row), side.min(destinations - col))
            })
        })
        .collect()
}

fn format_coordinates(coordinates: &[Coordinate]) -> String {
    coordinates
        .iter()
        .map(|c| format!("{:.6},{:.6}", c.longitude, c.latitude))
        .collect::<Vec<_>>()
        .join(";")
}

fn index_list(indices: &[usize]) -> String {
    indices
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(";")
}

fn check_code(code: &str, message: Option<String>) -> Result<(), ProviderError> {
    if code == "Ok" {
        Ok(())
    } else {
        Err(ProviderError::Service {
            code: code.to_string(),
            message: message.unwrap_or_default(),
        })
    }
}

impl DistanceProvider for OsrmClient {
    fn distance_matrix(
        &self,
        sources: &[Coordinate],
        destinations: &[Coordinate],
    ) -> Result<DistanceMatrix, ProviderError> {
        if sources.is_empty() || destinations.is_empty() {
            return Err(ProviderError::EmptyInput);
        }

        let blocks = table_blocks(
            sources.len(),
            destinations.len(),
            self.config.max_table_size,
        );
        if let [_] = blocks.as_slice() {
            return self.table(sources, destinations);
        }

        debug!(blocks = blocks.len(), "splitting OSRM table request");
        let mut matrix = DistanceMatrix {
            distances: vec![Vec::with_capacity(destinations.len()); sources.len()],
            durations: vec![Vec::with_capacity(destinations.len()); sources.len()],
        };
        for (row, col, rows, cols) in blocks {
            let block = self.table(&sources[row..row + rows], &destinations[col..col + cols])?;
            let rows_out = matrix.distances[row..].iter_mut().zip(&mut matrix.durations[row..]);
            for ((distances, durations), (block_distances, block_durations)) in
                rows_out.zip(block.distances.into_iter().zip(block.durations))
            {
                distances.extend(block_distances);
                durations.extend(block_durations);
            }
        }
        Ok(matrix)
    }

    fn route_legs(&self, ordered: &[Coordinate]) -> Result<Vec<LegGeometry>, ProviderError> {
        if ordered.len() < 2 {
            return Err(ProviderError::EmptyInput);
        }

        let url = self.service_url("route", ordered);
        debug!(stops = ordered.len(), "requesting OSRM route");
        let body: OsrmRouteResponse = self
            .client
            .get(url)
            .query(&[("overview", "false"), ("steps", "true"), ("geometries", "polyline")])
            .send()?
            .json()?;

        let legs = body.into_legs()?;
        if legs.len() != ordered.len() - 1 {
            return Err(ProviderError::MalformedResponse(format!(
                "expected {} legs, got {}",
                ordered.len() - 1,
                legs.len()
            )));
        }
        Ok(legs)
    }
}

#[derive(Debug, Deserialize)]
struct OsrmTableResponse {
    code: String,
    message: Option<String>,
    distances: Option<Vec<Vec<Option<f64>>>>,
    durations: Option<Vec<Vec<Option<f64>>>>,
}

impl OsrmTableResponse {
    fn into_matrix(self) -> Result<DistanceMatrix, ProviderError> {
        check_code(&self.code, self.message)?;
        let (Some(distances), Some(durations)) = (self.distances, self.durations) else {
            return Err(ProviderError::MalformedResponse(
                "table response is missing distances or durations".to_string(),
            ));
        };

        let mut unroutable = 0usize;
        let mut fill = |table: Vec<Vec<Option<f64>>>, sentinel: f64| -> Vec<Vec<f64>> {
            table
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|value| {
                            value.unwrap_or_else(|| {
                                unroutable += 1;
                                sentinel
                            })
                        })
                        .collect()
                })
                .collect()
        };
        let distances = fill(distances, UNROUTABLE_DISTANCE_M);
        // Durations are only descriptive; the sentinel keeps them finite.
        let durations = fill(durations, UNROUTABLE_DISTANCE_M);

        if unroutable > 0 {
            warn!(unroutable, "OSRM could not route some pairs, using sentinel distance");
        }
        Ok(DistanceMatrix { distances, durations })
    }
}

#[derive(Debug, Deserialize)]
struct OsrmRouteResponse {
    code: String,
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    legs: Vec<OsrmLeg>,
}

#[derive(Debug, Deserialize)]
struct OsrmLeg {
    distance: f64,
    duration: f64,
    #[serde(default)]
    steps: Vec<OsrmStep>,
}

#[derive(Debug, Deserialize)]
struct OsrmStep {
    geometry: String,
}

impl OsrmRouteResponse {
    fn into_legs(self) -> Result<Vec<LegGeometry>, ProviderError> {
        check_code(&self.code, self.message)?;
        let route = self
            .routes
            .into_iter()
            .next()
            .ok_or_else(|| {
                ProviderError::MalformedResponse("route response has no routes".to_string())
            })?;

        route
            .legs
            .into_iter()
            .map(|leg| -> Result<LegGeometry, ProviderError> {
                let mut geometry = Polyline::default();
                for step in &leg.steps {
                    geometry.join(Polyline::decode(&step.geometry)?);
                }
                Ok(LegGeometry {
                    distance_m: leg.distance,
                    duration_s: leg.duration,
                    geometry,
                })
            })
            .collect()
    }
}
