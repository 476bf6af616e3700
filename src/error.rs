use thiserror::Error;

use crate::routing::RoutingError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
    #[error("OSM PBF error: {0}")]
    Pbf(#[from] osmpbf::Error),
    #[error("OSM XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl Error {
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
