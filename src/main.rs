use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::watch;

use catchment::config::{self, PipelineConfig, API_KEY_ENV};
use catchment::isochrone::{GeneratorReport, StopReason};
use catchment::pipeline;
use catchment::progress::LogProgress;

#[derive(Parser, Debug)]
#[command(name = "catchment", version, about = "Walking catchment areas of daycare centres")]
struct Cli {
    /// TOML configuration file; defaults apply to everything it leaves out.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// OpenRouteService API key.
    #[arg(long, global = true, env = API_KEY_ENV, hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, global = true)]
    results_dir: Option<PathBuf>,

    /// GeoJSON file with the daycare centre points.
    #[arg(long, global = true)]
    points: Option<PathBuf>,

    /// OSM extract, `.osm.pbf` or `.osm`.
    #[arg(long, global = true)]
    osm: Option<PathBuf>,

    /// Maximum number of routing requests in this run.
    #[arg(long, global = true)]
    session_budget: Option<usize>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// OSM extraction, isochrones and overlap removal (default).
    Run,
    /// Only extract green and water areas.
    Osm,
    /// Only fetch isochrones.
    Isochrones,
    /// Only remove overlaps from an existing isochrone file.
    Overlaps,
}

impl Cli {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        if let Some(dir) = &self.results_dir {
            config.paths.results_dir = dir.clone();
        }
        if let Some(points) = &self.points {
            config.paths.points = points.clone();
        }
        if let Some(osm) = &self.osm {
            config.paths.osm = osm.clone();
        }
        if let Some(budget) = self.session_budget {
            config.limits.session_budget = budget;
        }
        Ok(config)
    }
}

/// Forwards the first interrupt to `stop` so the isochrone stage can wind
/// down. Returns `true` once the process should exit right away: on a second
/// interrupt, or when nothing listens on `stop` any more. Returns `false` if
/// interrupts cannot be received.
async fn relay_interrupts<F, Fut>(mut next_signal: F, stop: watch::Sender<()>) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    let mut forwarded = false;
    loop {
        if let Err(err) = next_signal().await {
            warn!("Cannot listen for Ctrl-C: {err}");
            return false;
        }
        if forwarded || stop.send(()).is_err() {
            return true;
        }
        forwarded = true;
        warn!("Interrupt received, stopping after the current request (Ctrl-C again to exit now)");
    }
}

/// Installs the Ctrl-C handler and returns the future the isochrone stage
/// stops on. Only called by commands that fetch isochrones, the others keep
/// the default signal behaviour.
fn shutdown_signal() -> impl Future<Output = ()> {
    let (stop, mut stopped) = watch::channel(());
    tokio::spawn(async move {
        if relay_interrupts(tokio::signal::ctrl_c, stop).await {
            std::process::exit(130);
        }
    });
    async move {
        if stopped.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn exit_code(report: Option<&GeneratorReport>) -> ExitCode {
    match report.map(|r| &r.stop) {
        Some(StopReason::Interrupted) => ExitCode::from(130),
        Some(StopReason::BudgetExhausted) => {
            info!("Session budget used up, run again to continue");
            ExitCode::SUCCESS
        }
        _ => ExitCode::SUCCESS,
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = cli.pipeline_config()?;
    let api_key = config::resolve_api_key(cli.api_key.clone());
    let osm_progress = LogProgress::new(1_000_000);
    let isochrone_progress = LogProgress::new(10);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let report = pipeline::run_full(
                &config,
                api_key.as_deref(),
                &osm_progress,
                &isochrone_progress,
                shutdown_signal(),
            )
            .await
            .context("running the full analysis")?;
            Ok(exit_code(report.isochrones.as_ref()))
        }
        Command::Osm => {
            pipeline::run_osm_extraction(&config, &osm_progress)
                .with_context(|| format!("extracting areas from {}", config.paths.osm.display()))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Isochrones => {
            let report = pipeline::run_isochrones(
                &config,
                api_key.as_deref(),
                &isochrone_progress,
                shutdown_signal(),
            )
            .await
            .context("generating isochrones")?;
            Ok(exit_code(report.as_ref()))
        }
        Command::Overlaps => {
            pipeline::run_overlap_removal(&config).context("removing overlaps")?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
