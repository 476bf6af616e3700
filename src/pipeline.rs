//! Stage entry points used by the binary and the bindings.

use geojson::Feature;
use log::{info, warn};
use std::future::Future;
use std::path::Path;

use crate::checkpoint::{self, IsochroneRecord};
use crate::classify::Category;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::extract::{self, UnifiedAreas};
use crate::isochrone::{GeneratorReport, IsochroneGenerator, StopReason};
use crate::osm_reader;
use crate::overlap::{self, CoverageSummary};
use crate::points;
use crate::progress::ProgressObserver;
use crate::routing::{IsochroneRequest, IsochroneService, OpenRouteService};
use crate::utils;

fn write_layer(path: &Path, category: Category, layer: &geo::MultiPolygon<f64>) -> Result<()> {
    let mut feature = Feature::from(utils::multipolygon_to_geojson(layer));
    feature.set_property("category", category.as_str());
    utils::write_feature_collection(path, &utils::feature_collection(vec![feature]))?;
    info!("{} areas saved: {}", category.as_str(), path.display());
    Ok(())
}

/// Extracts and unifies green and water areas, writing one file per layer.
/// Layers without any area are not written.
pub fn run_osm_extraction(
    config: &PipelineConfig,
    progress: &dyn ProgressObserver,
) -> Result<UnifiedAreas> {
    info!("Extracting OSM areas from {}", config.paths.osm.display());
    let source = osm_reader::open_source(&config.paths.osm)?;
    let unified = extract::extract_areas(source.as_ref(), progress)?.unify();
    if unified.lines_dropped > 0 {
        info!(
            "{} line features carry no area and were left out",
            unified.lines_dropped
        );
    }

    for (category, path) in [
        (Category::Green, config.paths.green_areas()),
        (Category::Water, config.paths.water_areas()),
    ] {
        match unified.layer(category) {
            Some(layer) => write_layer(&path, category, layer)?,
            None => warn!("No {} areas found, {} not written", category.as_str(), path.display()),
        }
    }

    Ok(unified)
}

/// Runs the generator over the configured points with any routing service.
pub async fn generate_isochrones<S, F>(
    service: S,
    config: &PipelineConfig,
    progress: &dyn ProgressObserver,
    shutdown: F,
) -> Result<GeneratorReport>
where
    S: IsochroneService,
    F: Future<Output = ()>,
{
    let points = points::load_points(&config.paths.points, config.paths.id_property.as_deref())?;
    info!(
        "Loaded {} points from {}",
        points.len(),
        config.paths.points.display()
    );

    let mut generator = IsochroneGenerator::new(
        service,
        IsochroneRequest::from(&config.routing),
        config.limits.clone(),
        config.paths.isochrones(),
    );
    generator.run_until(&points, progress, shutdown).await
}

/// Isochrone stage against OpenRouteService. Without an API key the stage is
/// skipped and `None` returned.
pub async fn run_isochrones<F>(
    config: &PipelineConfig,
    api_key: Option<&str>,
    progress: &dyn ProgressObserver,
    shutdown: F,
) -> Result<Option<GeneratorReport>>
where
    F: Future<Output = ()>,
{
    let Some(api_key) = api_key else {
        warn!("No API key provided, skipping isochrones");
        return Ok(None);
    };
    let service = OpenRouteService::new(api_key, &config.routing)?;
    Ok(Some(
        generate_isochrones(service, config, progress, shutdown).await?,
    ))
}

/// Reads the raw isochrone file and writes the overlap-free one with the same
/// identifiers. `None` when there is no raw file yet.
pub fn run_overlap_removal(config: &PipelineConfig) -> Result<Option<CoverageSummary>> {
    let input = config.paths.isochrones();
    if !input.exists() {
        warn!("{} not found, skipping overlap removal", input.display());
        return Ok(None);
    }

    let records = checkpoint::load_records(&input)?;
    info!("Removing overlaps among {} isochrones", records.len());
    let (ids, geometries): (Vec<_>, Vec<_>) = records
        .into_iter()
        .map(|record| (record.id, record.geometry))
        .unzip();

    let cleaned = overlap::remove_overlaps(geometries);
    let summary = overlap::coverage_summary(&cleaned);

    let output = config.paths.isochrones_clean();
    let records = ids
        .into_iter()
        .zip(cleaned)
        .map(|(id, geometry)| IsochroneRecord { id, geometry })
        .collect::<Vec<_>>();
    checkpoint::save_records(&output, &records)?;

    info!(
        "Overlap-free isochrones saved: {} ({} polygons, {} fully covered, {:.3} km²)",
        output.display(),
        summary.polygons,
        summary.consumed,
        summary.total_area_m2 / 1e6
    );
    Ok(Some(summary))
}

#[derive(Debug)]
pub struct PipelineReport {
    pub areas: UnifiedAreas,
    pub isochrones: Option<GeneratorReport>,
    pub coverage: Option<CoverageSummary>,
}

/// OSM extraction, then isochrones, then overlap removal. Overlap removal
/// only runs when the isochrone stage ran to completion.
pub async fn run_full<F>(
    config: &PipelineConfig,
    api_key: Option<&str>,
    osm_progress: &dyn ProgressObserver,
    isochrone_progress: &dyn ProgressObserver,
    shutdown: F,
) -> Result<PipelineReport>
where
    F: Future<Output = ()>,
{
    let areas = run_osm_extraction(config, osm_progress)?;
    let isochrones = run_isochrones(config, api_key, isochrone_progress, shutdown).await?;

    let coverage = match &isochrones {
        Some(report) if report.stop == StopReason::Completed => {
            run_overlap_removal(config)?
        }
        Some(report) => {
            info!(
                "Isochrones incomplete ({:?}), overlap removal deferred",
                report.stop
            );
            None
        }
        None => None,
    };

    info!(
        "Analysis complete, results in {}",
        config.paths.results_dir.display()
    );
    Ok(PipelineReport {
        areas,
        isochrones,
        coverage,
    })
}
