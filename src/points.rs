use geo::Coord;
use geojson::feature::Id;
use log::warn;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};
use crate::utils;

/// Identifier of a point of interest, written as the `node_id` property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PoiId {
    Number(i64),
    Name(String),
}

impl PoiId {
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Number(n) => n.as_i64().map(PoiId::Number),
            JsonValue::String(s) => Some(PoiId::Name(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            PoiId::Number(n) => JsonValue::from(*n),
            PoiId::Name(s) => JsonValue::from(s.clone()),
        }
    }
}

impl fmt::Display for PoiId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoiId::Number(n) => write!(f, "{}", n),
            PoiId::Name(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointOfInterest {
    pub id: PoiId,
    /// WGS84, x = longitude, y = latitude.
    pub location: Coord<f64>,
}

pub fn is_valid_wgs84(coord: Coord<f64>) -> bool {
    coord.x.is_finite()
        && coord.y.is_finite()
        && (-180.0..=180.0).contains(&coord.x)
        && (-90.0..=90.0).contains(&coord.y)
}

/// Reads point features from a GeoJSON file, keeping their file order.
///
/// The id comes from `id_property` when given and present, then the feature
/// id, then the position of the feature in the file. Features without a
/// point geometry or with coordinates outside WGS84 bounds are skipped with a
/// warning. Ids must be unique across the kept points, since resuming a run
/// locates the last persisted id among them.
pub fn load_points(path: &Path, id_property: Option<&str>) -> Result<Vec<PointOfInterest>> {
    let collection = utils::read_feature_collection(path)?;
    let mut points = Vec::with_capacity(collection.features.len());
    let mut seen: HashMap<PoiId, usize> = HashMap::new();

    for (index, feature) in collection.features.iter().enumerate() {
        let id = id_property
            .and_then(|key| feature.property(key))
            .and_then(PoiId::from_json)
            .or_else(|| match &feature.id {
                Some(Id::Number(n)) => n.as_i64().map(PoiId::Number),
                Some(Id::String(s)) => Some(PoiId::Name(s.clone())),
                None => None,
            })
            .unwrap_or(PoiId::Number(index as i64));

        let location = match feature.geometry.as_ref().map(|g| &g.value) {
            Some(geojson::Value::Point(position)) if position.len() >= 2 => Coord {
                x: position[0],
                y: position[1],
            },
            _ => {
                warn!("Skipping point {}: geometry is not a point", id);
                continue;
            }
        };

        if !is_valid_wgs84(location) {
            warn!(
                "Skipping point {}: ({}, {}) is outside WGS84 bounds",
                id, location.x, location.y
            );
            continue;
        }

        if let Some(first) = seen.insert(id.clone(), index) {
            return Err(Error::InvalidData(format!(
                "{}: point id {} is used by features {} and {}",
                path.display(),
                id,
                first,
                index
            )));
        }
        points.push(PointOfInterest { id, location });
    }

    Ok(points)
}
