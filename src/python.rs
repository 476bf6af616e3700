use geojson::{FeatureCollection, GeoJson};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use std::collections::HashMap;

use crate::classify;
use crate::geometry;
use crate::osm::Tags;
use crate::overlap;
use crate::utils;

fn value_error(message: impl ToString) -> PyErr {
    PyErr::new::<PyValueError, _>(message.to_string())
}

/// Removes overlaps from a GeoJSON feature collection of polygons, keeping
/// feature order and properties
#[pyfunction]
fn remove_overlaps(geojson: &str) -> PyResult<String> {
    let mut collection = match geojson.parse::<GeoJson>().map_err(value_error)? {
        GeoJson::FeatureCollection(collection) => collection,
        _ => return Err(value_error("Expected a FeatureCollection")),
    };

    let polygons = collection
        .features
        .iter()
        .map(|feature| {
            feature
                .geometry
                .clone()
                .and_then(|g| geo::Geometry::<f64>::try_from(g).ok())
                .and_then(geometry::to_multipolygon)
                .ok_or_else(|| value_error("Every feature needs a polygonal geometry"))
        })
        .collect::<PyResult<Vec<_>>>()?;

    for (feature, cleaned) in collection
        .features
        .iter_mut()
        .zip(overlap::remove_overlaps(polygons))
    {
        feature.geometry = Some(utils::multipolygon_to_geojson(&cleaned));
    }

    Ok(FeatureCollection {
        foreign_members: Some(utils::crs_member()),
        ..collection
    }
    .to_string())
}

/// Category ("water" or "green") of an OSM tag set, None when unclassified
#[pyfunction]
fn classify_tags(tags: HashMap<String, String>) -> Option<&'static str> {
    let tags: Tags = tags.into_iter().collect();
    classify::classify(&tags).map(|category| category.as_str())
}

/// Python module for daycare catchment analysis
#[pymodule]
fn catchment(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(remove_overlaps, m)?)?;
    m.add_function(wrap_pyfunction!(classify_tags, m)?)?;
    Ok(())
}
