use geo::MultiPolygon;
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, Value};
use serde_json::json;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

pub const CRS84: &str = "urn:ogc:def:crs:OGC:1.3:CRS84";

pub fn multipolygon_to_geojson(multi: &MultiPolygon<f64>) -> Geometry {
    Geometry::new(Value::from(multi))
}

/// Named CRS member declaring WGS84 longitude/latitude.
pub fn crs_member() -> JsonObject {
    let mut members = JsonObject::new();
    members.insert(
        "crs".to_string(),
        json!({"type": "name", "properties": {"name": CRS84}}),
    );
    members
}

pub fn feature_collection(features: Vec<Feature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(crs_member()),
    }
}

pub fn read_feature_collection(path: &Path) -> Result<FeatureCollection> {
    let raw = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    match raw.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(collection) => Ok(collection),
        GeoJson::Feature(feature) => Ok(feature_collection(vec![feature])),
        GeoJson::Geometry(_) => Err(Error::InvalidData(format!(
            "{} holds a bare geometry, expected a feature collection",
            path.display()
        ))),
    }
}

/// Writes the collection next to `path` first and renames it into place, so
/// an interrupted write never leaves a truncated file behind.
pub fn write_feature_collection(path: &Path, collection: &FeatureCollection) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);

    fs::write(tmp, collection.to_string()).map_err(|e| Error::io(tmp, e))?;
    fs::rename(tmp, path).map_err(|e| Error::io(path, e))
}
