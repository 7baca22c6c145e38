//! Polyline representation for leg geometries.
//!
//! Geometry is held as decoded [`Coordinate`]s. The compact encoded form
//! (Google polyline algorithm, precision 5) is only used at the boundary:
//! when reading OSRM responses and when serialising for a frontend. The
//! encoded form orders each pair as (latitude, longitude); that swap is
//! confined to this module.

use geo::Coord;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::PolylineError;
use crate::model::Coordinate;

const PRECISION: u32 = 5;

/// A walking path as an ordered list of coordinates.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "String")]
pub struct Polyline {
    points: Vec<Coordinate>,
}

impl Polyline {
    pub fn new(points: Vec<Coordinate>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[Coordinate] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Appends `other`, dropping its first point when it repeats our last
    /// one (consecutive OSRM step geometries share their junction point).
    pub fn join(&mut self, other: Polyline) {
        let mut incoming = other.points.into_iter().peekable();
        if let (Some(last), Some(first)) = (self.points.last(), incoming.peek()) {
            if last == first {
                incoming.next();
            }
        }
        self.points.extend(incoming);
    }

    /// Encodes with precision 5. Fails on points outside the valid
    /// longitude/latitude range.
    pub fn encode(&self) -> Result<String, PolylineError> {
        let coords = self.points.iter().map(|point| Coord {
            x: point.longitude,
            y: point.latitude,
        });
        ::polyline::encode_coordinates(coords, PRECISION)
            .map_err(|err| PolylineError::Encode(err.to_string()))
    }

    /// Decodes a precision-5 encoded polyline.
    pub fn decode(encoded: &str) -> Result<Self, PolylineError> {
        let line = ::polyline::decode_polyline(encoded, PRECISION)
            .map_err(|err| PolylineError::Decode(err.to_string()))?;
        Ok(Self {
            points: line
                .into_inner()
                .into_iter()
                .map(|coord| Coordinate::new(coord.x, coord.y))
                .collect(),
        })
    }
}

impl TryFrom<String> for Polyline {
    type Error = PolylineError;

    fn try_from(encoded: String) -> Result<Self, Self::Error> {
        Self::decode(&encoded)
    }
}

impl Serialize for Polyline {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let encoded = self.encode().map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&encoded)
    }
}
