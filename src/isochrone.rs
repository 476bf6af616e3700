use geo::MultiPolygon;
use log::{debug, error, info, warn};
use std::future::Future;
use std::path::PathBuf;

use crate::cache::IsochroneCache;
use crate::checkpoint::{self, IsochroneRecord};
use crate::config::LimitsConfig;
use crate::error::Result;
use crate::points::{PoiId, PointOfInterest};
use crate::progress::ProgressObserver;
use crate::rate_limit::RateLimiter;
use crate::routing::{IsochroneRequest, IsochroneService, RoutingError};

#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// Every remaining point was handled.
    Completed,
    /// The per-run request budget ran out with points remaining.
    BudgetExhausted,
    /// The service refused further requests (quota or credentials).
    ServiceRefused(String),
    /// Shutdown was requested from outside.
    Interrupted,
}

#[derive(Debug)]
pub struct GeneratorReport {
    /// Preloaded and newly fetched records, in point order.
    pub records: Vec<IsochroneRecord>,
    pub resumed_from: usize,
    pub requests: usize,
    pub fetched: usize,
    pub cached: usize,
    pub skipped: Vec<PoiId>,
    pub stop: StopReason,
}

/// Drives the routing service over a list of points, one location per call.
///
/// Results are appended to the record file at `output`, which is also read
/// back at the start of a run to resume after the last persisted record.
/// Points whose request fails are logged and skipped.
pub struct IsochroneGenerator<S> {
    service: S,
    request: IsochroneRequest,
    limits: LimitsConfig,
    output: PathBuf,
    limiter: RateLimiter,
    cache: IsochroneCache,
}

enum Step {
    Fetched(std::result::Result<MultiPolygon<f64>, RoutingError>),
    Interrupted,
}

impl<S: IsochroneService> IsochroneGenerator<S> {
    pub fn new(
        service: S,
        request: IsochroneRequest,
        limits: LimitsConfig,
        output: impl Into<PathBuf>,
    ) -> Self {
        let limiter = RateLimiter::new(limits.calls_per_window, limits.window());
        let cache = IsochroneCache::new(limits.cache_capacity);
        Self {
            service,
            request,
            limits,
            output: output.into(),
            limiter,
            cache,
        }
    }

    pub async fn run(
        &mut self,
        points: &[PointOfInterest],
        progress: &dyn ProgressObserver,
    ) -> Result<GeneratorReport> {
        self.run_until(points, progress, std::future::pending::<()>())
            .await
    }

    /// Like [`run`](Self::run), stopping early once `shutdown` resolves. The
    /// records gathered so far are flushed before returning.
    pub async fn run_until<F>(
        &mut self,
        points: &[PointOfInterest],
        progress: &dyn ProgressObserver,
        shutdown: F,
    ) -> Result<GeneratorReport>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut records = checkpoint::load_records(&self.output)?;
        let start = checkpoint::resume_index(points, &records);
        checkpoint::log_resume(&records, start);
        info!("Starting processing from index {}", start);

        let mut report = GeneratorReport {
            records: Vec::new(),
            resumed_from: start,
            requests: 0,
            fetched: 0,
            cached: 0,
            skipped: Vec::new(),
            stop: StopReason::Completed,
        };
        let mut unflushed = 0usize;

        progress.start("Isochrones", Some(points.len() as u64));
        progress.advance(start.min(points.len()) as u64);

        for point in points.iter().skip(start) {
            if let Some(geometry) = self.cache.check_cache(point.location) {
                debug!("Point {} shares its location with a fetched point", point.id);
                records.push(IsochroneRecord {
                    id: point.id.clone(),
                    geometry,
                });
                report.cached += 1;
                progress.advance(1);
                continue;
            }

            if report.requests >= self.limits.session_budget {
                info!("Session limit ({}) reached", self.limits.session_budget);
                report.stop = StopReason::BudgetExhausted;
                break;
            }

            let step = tokio::select! {
                biased;
                _ = &mut shutdown => Step::Interrupted,
                result = self.fetch(point, &mut report.requests) => Step::Fetched(result),
            };

            match step {
                Step::Interrupted => {
                    warn!("Interrupted before point {}", point.id);
                    report.stop = StopReason::Interrupted;
                    break;
                }
                Step::Fetched(Ok(geometry)) => {
                    self.cache.insert_into_cache(point.location, geometry.clone());
                    records.push(IsochroneRecord {
                        id: point.id.clone(),
                        geometry,
                    });
                    report.fetched += 1;
                    unflushed += 1;
                }
                Step::Fetched(Err(err)) if err.stops_run() => {
                    error!("Error processing node {}: {}", point.id, err);
                    report.stop = StopReason::ServiceRefused(err.to_string());
                    break;
                }
                Step::Fetched(Err(err)) => {
                    error!("Error processing node {}, skipping it: {}", point.id, err);
                    report.skipped.push(point.id.clone());
                }
            }
            progress.advance(1);

            if unflushed >= self.limits.flush_every.max(1) {
                checkpoint::save_records(&self.output, &records)?;
                debug!("Checkpoint with {} records written", records.len());
                unflushed = 0;
            }
        }
        progress.finish();

        checkpoint::save_records(&self.output, &records)?;
        info!(
            "Processing stopped ({:?}). Processed {} nodes with {} requests, {} from cache, {} skipped; {} records in {}",
            report.stop,
            report.fetched,
            report.requests,
            report.cached,
            report.skipped.len(),
            records.len(),
            self.output.display()
        );

        report.records = records;
        Ok(report)
    }

    /// One point, retrying retryable failures with exponential backoff while
    /// the session budget allows.
    async fn fetch(
        &mut self,
        point: &PointOfInterest,
        requests: &mut usize,
    ) -> std::result::Result<MultiPolygon<f64>, RoutingError> {
        let mut attempt = 0;
        loop {
            self.limiter.wait().await;
            *requests += 1;

            match self.service.isochrone(point.location, &self.request).await {
                Ok(geometry) => return Ok(geometry),
                Err(err)
                    if err.is_retryable()
                        && attempt < self.limits.max_retries
                        && *requests < self.limits.session_budget =>
                {
                    attempt += 1;
                    let delay = self.limits.backoff(attempt);
                    warn!(
                        "Request for node {} failed ({}), retry {}/{} in {:?}",
                        point.id, err, attempt, self.limits.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::routing::{RangeType, RoutingProfile};
    use geo::{polygon, Coord};
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::task::{Context, Poll};
    use std::time::Duration;

    /// Square around the location, after returning any queued failures.
    struct FakeService {
        calls: Cell<usize>,
        failures: RefCell<VecDeque<RoutingError>>,
    }

    impl FakeService {
        fn new() -> Self {
            Self {
                calls: Cell::new(0),
                failures: RefCell::new(VecDeque::new()),
            }
        }

        fn failing(failures: Vec<RoutingError>) -> Self {
            Self {
                calls: Cell::new(0),
                failures: RefCell::new(failures.into()),
            }
        }
    }

    impl IsochroneService for FakeService {
        async fn isochrone(
            &self,
            location: Coord<f64>,
            _request: &IsochroneRequest,
        ) -> std::result::Result<MultiPolygon<f64>, RoutingError> {
            self.calls.set(self.calls.get() + 1);
            if let Some(failure) = self.failures.borrow_mut().pop_front() {
                return Err(failure);
            }
            let (x, y, d) = (location.x, location.y, 0.001);
            Ok(MultiPolygon::new(vec![polygon![
                (x: x - d, y: y - d),
                (x: x + d, y: y - d),
                (x: x + d, y: y + d),
                (x: x - d, y: y + d),
                (x: x - d, y: y - d),
            ]]))
        }
    }

    /// Notes how many records are persisted at `path` before every call.
    struct CheckpointWatcher {
        inner: FakeService,
        path: PathBuf,
        on_disk: RefCell<Vec<usize>>,
    }

    impl IsochroneService for CheckpointWatcher {
        async fn isochrone(
            &self,
            location: Coord<f64>,
            request: &IsochroneRequest,
        ) -> std::result::Result<MultiPolygon<f64>, RoutingError> {
            let persisted = checkpoint::load_records(&self.path).unwrap().len();
            self.on_disk.borrow_mut().push(persisted);
            self.inner.isochrone(location, request).await
        }
    }

    fn server_error() -> RoutingError {
        RoutingError::Server { status: 502, body: String::new() }
    }

    fn rejected() -> RoutingError {
        RoutingError::Rejected { status: 404, body: String::new() }
    }

    fn quota() -> RoutingError {
        RoutingError::QuotaExceeded { status: 403, body: String::new() }
    }

    fn request() -> IsochroneRequest {
        IsochroneRequest {
            profile: RoutingProfile::FootWalking,
            range_type: RangeType::Distance,
            range: 500.0,
            attributes: vec![],
        }
    }

    fn limits(budget: usize) -> LimitsConfig {
        LimitsConfig {
            session_budget: budget,
            calls_per_window: 1_000,
            window_secs: 60,
            flush_every: 2,
            max_retries: 2,
            backoff_base_ms: 10,
            cache_capacity: 16,
        }
    }

    fn points(n: usize) -> Vec<PointOfInterest> {
        (0..n)
            .map(|i| PointOfInterest {
                id: PoiId::Number(i as i64),
                location: Coord { x: 13.0 + i as f64 * 0.01, y: 52.5 },
            })
            .collect()
    }

    #[tokio::test]
    async fn budget_stops_at_exactly_the_limit() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("iso.geojson");
        let mut generator =
            IsochroneGenerator::new(FakeService::new(), request(), limits(3), &output);

        let report = generator.run(&points(5), &NoProgress).await.unwrap();

        assert_eq!(generator.service.calls.get(), 3);
        assert_eq!(report.requests, 3);
        assert_eq!(report.records.len(), 3);
        assert_eq!(report.stop, StopReason::BudgetExhausted);
        assert_eq!(checkpoint::load_records(&output).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn resume_preloads_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("iso.geojson");
        let all = points(5);

        let mut first = IsochroneGenerator::new(FakeService::new(), request(), limits(2), &output);
        first.run(&all, &NoProgress).await.unwrap();
        let persisted = std::fs::read_to_string(&output).unwrap();

        let mut second = IsochroneGenerator::new(FakeService::new(), request(), limits(10), &output);
        let report = second.run(&all, &NoProgress).await.unwrap();

        assert_eq!(report.resumed_from, 2);
        assert_eq!(second.service.calls.get(), 3);
        assert_eq!(report.stop, StopReason::Completed);
        let ids = report.records.iter().map(|r| r.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids, all.iter().map(|p| p.id.clone()).collect::<Vec<_>>());

        let before: serde_json::Value = serde_json::from_str(&persisted).unwrap();
        let after: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        for i in 0..2 {
            assert_eq!(
                before["features"][i].to_string(),
                after["features"][i].to_string()
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_errors_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let service = FakeService::failing(vec![server_error(), server_error()]);
        let mut generator =
            IsochroneGenerator::new(service, request(), limits(10), dir.path().join("iso.geojson"));

        let report = generator.run(&points(1), &NoProgress).await.unwrap();

        assert_eq!(report.requests, 3);
        assert_eq!(report.fetched, 1);
        assert!(report.skipped.is_empty());
    }

    #[tokio::test]
    async fn failed_point_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let service = FakeService::failing(vec![rejected()]);
        let mut generator =
            IsochroneGenerator::new(service, request(), limits(10), dir.path().join("iso.geojson"));

        let report = generator.run(&points(3), &NoProgress).await.unwrap();

        assert_eq!(report.skipped, vec![PoiId::Number(0)]);
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.stop, StopReason::Completed);
    }

    #[tokio::test]
    async fn quota_refusal_stops_and_keeps_results() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("iso.geojson");
        let service = FakeService::failing(vec![]);
        let mut generator = IsochroneGenerator::new(service, request(), limits(10), &output);
        generator.run(&points(1), &NoProgress).await.unwrap();

        generator.service.failures.borrow_mut().push_back(quota());
        let report = generator.run(&points(4), &NoProgress).await.unwrap();

        assert!(matches!(report.stop, StopReason::ServiceRefused(_)));
        assert_eq!(report.records.len(), 1);
        assert_eq!(checkpoint::load_records(&output).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_locations_use_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut all = points(2);
        all.push(PointOfInterest {
            id: PoiId::Name("twin".into()),
            location: all[0].location,
        });
        let mut generator =
            IsochroneGenerator::new(FakeService::new(), request(), limits(10), dir.path().join("iso.geojson"));

        let report = generator.run(&all, &NoProgress).await.unwrap();

        assert_eq!(generator.service.calls.get(), 2);
        assert_eq!(report.cached, 1);
        assert_eq!(report.records[2].geometry, report.records[0].geometry);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_spreads_calls_over_windows() {
        let dir = tempfile::tempdir().unwrap();
        let mut limits = limits(10);
        limits.calls_per_window = 2;
        let mut generator =
            IsochroneGenerator::new(FakeService::new(), request(), limits, dir.path().join("iso.geojson"));

        let started = tokio::time::Instant::now();
        generator.run(&points(5), &NoProgress).await.unwrap();

        // Windows of two calls at t = 0, 60 and 120 seconds
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(120), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(180), "{elapsed:?}");
    }

    #[tokio::test]
    async fn checkpoint_is_flushed_every_n_successes() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("iso.geojson");
        let watcher = CheckpointWatcher {
            inner: FakeService::new(),
            path: output.clone(),
            on_disk: RefCell::new(Vec::new()),
        };
        let mut generator = IsochroneGenerator::new(&watcher, request(), limits(10), &output);

        generator.run(&points(5), &NoProgress).await.unwrap();

        // flush_every = 2: before call k the file holds floor(k / 2) * 2 records
        assert_eq!(*watcher.on_disk.borrow(), vec![0, 0, 2, 2, 4]);
        assert_eq!(checkpoint::load_records(&output).unwrap().len(), 5);
    }

    #[tokio::test]
    async fn interrupt_keeps_preloaded_and_fetched_records() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("iso.geojson");
        let all = points(6);

        let mut first = IsochroneGenerator::new(FakeService::new(), request(), limits(2), &output);
        first.run(&all, &NoProgress).await.unwrap();
        let preloaded = checkpoint::load_records(&output).unwrap();
        assert_eq!(preloaded.len(), 2);

        let service = FakeService::new();
        let mut rare_flush = limits(10);
        rare_flush.flush_every = 100;
        let mut second = IsochroneGenerator::new(&service, request(), rare_flush, &output);
        let after_two_calls = std::future::poll_fn(|_cx: &mut Context<'_>| {
            if service.calls.get() >= 2 {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        });
        let report = second
            .run_until(&all, &NoProgress, after_two_calls)
            .await
            .unwrap();

        assert_eq!(report.stop, StopReason::Interrupted);
        assert_eq!(service.calls.get(), 2);
        let persisted = checkpoint::load_records(&output).unwrap();
        assert_eq!(persisted.len(), 4);
        assert_eq!(&persisted[..2], &preloaded[..]);

        let mut third = IsochroneGenerator::new(FakeService::new(), request(), limits(10), &output);
        let report = third.run(&all, &NoProgress).await.unwrap();
        assert_eq!(report.resumed_from, 4);
        assert_eq!(third.service.calls.get(), 2);
        assert_eq!(report.records.len(), 6);
    }

    #[tokio::test]
    async fn immediate_shutdown_makes_no_calls() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("iso.geojson");
        let mut generator =
            IsochroneGenerator::new(FakeService::new(), request(), limits(10), &output);

        let report = generator
            .run_until(&points(3), &NoProgress, async {})
            .await
            .unwrap();

        assert_eq!(report.stop, StopReason::Interrupted);
        assert_eq!(generator.service.calls.get(), 0);
        assert!(output.exists());
    }
}
