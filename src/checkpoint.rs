//! Isochrone record files.
//!
//! The raw isochrone output doubles as the checkpoint: it is rewritten in
//! full at every flush and read back on the next run to resume.

use geo::MultiPolygon;
use geojson::{Feature, JsonObject};
use log::{info, warn};
use std::path::Path;

use crate::error::{Error, Result};
use crate::geometry;
use crate::points::{PoiId, PointOfInterest};
use crate::utils;

pub const ID_PROPERTY: &str = "node_id";

#[derive(Debug, Clone, PartialEq)]
pub struct IsochroneRecord {
    pub id: PoiId,
    pub geometry: MultiPolygon<f64>,
}

pub fn record_to_feature(record: &IsochroneRecord) -> Feature {
    let mut properties = JsonObject::new();
    properties.insert(ID_PROPERTY.to_string(), record.id.to_json());
    Feature {
        bbox: None,
        geometry: Some(utils::multipolygon_to_geojson(&record.geometry)),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

pub fn feature_to_record(feature: Feature) -> Result<IsochroneRecord> {
    let id = feature
        .property(ID_PROPERTY)
        .and_then(PoiId::from_json)
        .ok_or_else(|| Error::InvalidData(format!("record without `{}`", ID_PROPERTY)))?;

    let geometry = feature
        .geometry
        .ok_or_else(|| Error::InvalidData(format!("record {} has no geometry", id)))?;
    let geometry = geo::Geometry::<f64>::try_from(geometry)?;
    let geometry = geometry::to_multipolygon(geometry)
        .ok_or_else(|| Error::InvalidData(format!("record {} is not polygonal", id)))?;

    Ok(IsochroneRecord { id, geometry })
}

/// Records persisted at `path`, or none if the file does not exist yet.
pub fn load_records(path: &Path) -> Result<Vec<IsochroneRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    utils::read_feature_collection(path)?
        .features
        .into_iter()
        .map(feature_to_record)
        .collect()
}

pub fn save_records(path: &Path, records: &[IsochroneRecord]) -> Result<()> {
    let features = records.iter().map(record_to_feature).collect();
    utils::write_feature_collection(path, &utils::feature_collection(features))
}

/// Index of the first point not yet covered by `records`: the one right
/// after the point of the last persisted record.
pub fn resume_index(points: &[PointOfInterest], records: &[IsochroneRecord]) -> usize {
    let Some(last) = records.last() else {
        return 0;
    };

    match points.iter().position(|point| point.id == last.id) {
        Some(position) => position + 1,
        None => {
            warn!(
                "Last persisted id {} is not among the input points, resuming after {} records",
                last.id,
                records.len()
            );
            records.len().min(points.len())
        }
    }
}

pub fn log_resume(records: &[IsochroneRecord], start: usize) {
    if !records.is_empty() {
        info!(
            "Found checkpoint with {} records, starting processing from index {}",
            records.len(),
            start
        );
    }
}
