//! Pipeline configuration.
//!
//! Every stage receives its settings through [`PipelineConfig`]. Values come
//! from [`PipelineConfig::default`], optionally overlaid by a TOML file and
//! finally by command line flags.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::routing::{RangeType, RoutingProfile};

pub const API_KEY_ENV: &str = "OPENROUTESERVICE_API_KEY";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub routing: RoutingConfig,
    pub limits: LimitsConfig,
}

impl PipelineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml_str(&raw)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// GeoJSON point collection of daycare centres.
    pub points: PathBuf,
    /// OSM extract, `.osm.pbf` or `.osm`.
    pub osm: PathBuf,
    pub results_dir: PathBuf,
    /// Property holding the point identifier. Falls back to the feature id,
    /// then to the position in the file.
    pub id_property: Option<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            points: PathBuf::from("data/processed/daycare_centers_processed.geojson"),
            osm: PathBuf::from("data/raw/berlin-latest.osm.pbf"),
            results_dir: PathBuf::from("data/results"),
            id_property: None,
        }
    }
}

impl PathsConfig {
    pub fn isochrones(&self) -> PathBuf {
        self.results_dir.join("isochrones.geojson")
    }

    pub fn isochrones_clean(&self) -> PathBuf {
        self.results_dir.join("isochrones_overlapping.geojson")
    }

    pub fn green_areas(&self) -> PathBuf {
        self.results_dir.join("green_areas.geojson")
    }

    pub fn water_areas(&self) -> PathBuf {
        self.results_dir.join("water_areas.geojson")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub base_url: String,
    pub profile: RoutingProfile,
    pub range_type: RangeType,
    /// Metres for [`RangeType::Distance`], seconds for [`RangeType::Time`].
    pub range: f64,
    pub attributes: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openrouteservice.org".to_string(),
            profile: RoutingProfile::FootWalking,
            range_type: RangeType::Distance,
            range: 500.0,
            attributes: vec!["area".to_string()],
            timeout_secs: 30,
        }
    }
}

impl RoutingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum number of requests issued in one run.
    pub session_budget: usize,
    pub calls_per_window: u32,
    pub window_secs: u64,
    /// Flush the checkpoint file after this many successful calls.
    pub flush_every: usize,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub cache_capacity: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            session_budget: 450,
            calls_per_window: 11,
            window_secs: 60,
            flush_every: 10,
            max_retries: 2,
            backoff_base_ms: 1_000,
            cache_capacity: 1_024,
        }
    }
}

impl LimitsConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Delay before retry number `attempt` (1-based): base, 2 * base, 4 * base, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

/// Resolves the API key from an explicit value or the environment.
/// Empty strings and the `-` placeholder count as missing.
pub fn resolve_api_key(explicit: Option<String>) -> Option<String> {
    explicit
        .or_else(|| std::env::var(API_KEY_ENV).ok())
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty() && key != "-")
}
