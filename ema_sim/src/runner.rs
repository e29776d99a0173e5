//! Scenario runner - samples scenarios and executes them against backends.

use crate::backend::BackendHandle;
use crate::config::RunnerConfig;
use crate::results::{ExperimentResult, ResultSet};
use crate::sampler::{sample_scenarios, SamplingPolicy};

use ema_env::{validate_parameters, EmaError, OutcomeSeries, Parameter, Scenario, SimulationBackend};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinError;
use tracing::{debug, info, warn};

/// Runs scenarios against backends on a bounded worker pool.
///
/// The public API is synchronous; each call spins up its own runtime, so it
/// must not be invoked from inside another tokio runtime.
pub struct ScenarioRunner {
    config: RunnerConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Sets the sampling seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Sets the worker pool size.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.workers = workers.max(1);
        self
    }

    /// Sets the per-run timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Lets runs take as long as they need.
    pub fn without_timeout(mut self) -> Self {
        self.config.timeout = None;
        self
    }

    /// Sets the sampling policy.
    pub fn with_sampling(mut self, sampling: SamplingPolicy) -> Self {
        self.config.sampling = sampling;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Draws `count` scenarios from the declared parameters.
    ///
    /// Every parameter is validated before anything is sampled.
    pub fn generate_scenarios(
        &self,
        parameters: &[Parameter],
        count: usize,
    ) -> Result<Vec<Scenario>, EmaError> {
        validate_parameters(parameters)?;

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let sampler = self.config.sampling.sampler();
        let scenarios = sample_scenarios(sampler.as_ref(), parameters, count, &mut rng);

        info!(
            "Generated {} scenarios over {} parameters ({} sampling, seed={})",
            scenarios.len(),
            parameters.len(),
            sampler.name(),
            self.config.seed
        );
        Ok(scenarios)
    }

    /// Runs one scenario on one backend, honoring the configured timeout.
    pub fn run(&self, scenario: &Scenario, backend: &BackendHandle) -> Result<OutcomeSeries, EmaError> {
        let runtime = self.build_runtime()?;
        let (outcome, elapsed) = runtime.block_on(execute_pair(
            Arc::new(scenario.clone()),
            backend.model(),
            None,
            None,
            self.config.timeout,
        ));
        runtime.shutdown_background();

        debug!(
            "Scenario {} on {} finished in {:.1}ms",
            scenario.id(),
            backend.name(),
            elapsed.as_secs_f64() * 1000.0
        );
        outcome
    }

    /// Runs the cross product `scenarios x backends`.
    ///
    /// Every pair gets exactly one result, failures included. Only a failure
    /// to start the worker runtime, duplicate backend names or duplicate
    /// scenario ids are returned as a top-level error.
    pub fn run_all(
        &self,
        scenarios: &[Scenario],
        backends: &[BackendHandle],
    ) -> Result<ResultSet, EmaError> {
        let mut names = HashSet::new();
        for backend in backends {
            if !names.insert(backend.name()) {
                return Err(EmaError::config(format!(
                    "backend name '{}' registered twice",
                    backend.name()
                )));
            }
        }
        let mut ids = HashSet::new();
        for scenario in scenarios {
            if !ids.insert(scenario.id()) {
                return Err(EmaError::config(format!(
                    "scenario id {} appears twice in the batch",
                    scenario.id()
                )));
            }
        }

        let total = scenarios.len() * backends.len();
        info!(
            "Running {} scenarios x {} backends = {} pairs ({} workers, timeout={})",
            scenarios.len(),
            backends.len(),
            total,
            self.config.workers,
            self.config
                .timeout
                .map(|t| format!("{:.1}s", t.as_secs_f64()))
                .unwrap_or_else(|| "none".to_string())
        );

        let runtime = self.build_runtime()?;
        let worker_slots = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let backend_slots: Vec<Option<Arc<Semaphore>>> = backends
            .iter()
            .map(|b| b.max_concurrency().map(|n| Arc::new(Semaphore::new(n))))
            .collect();
        let shared: Vec<Arc<Scenario>> = scenarios.iter().cloned().map(Arc::new).collect();
        let timeout = self.config.timeout;

        let settled = runtime.block_on(async {
            let mut handles = Vec::with_capacity(total);
            for scenario in &shared {
                for (backend, slots) in backends.iter().zip(&backend_slots) {
                    handles.push(tokio::spawn(execute_pair(
                        Arc::clone(scenario),
                        backend.model(),
                        slots.clone(),
                        Some(Arc::clone(&worker_slots)),
                        timeout,
                    )));
                }
            }

            let mut settled = Vec::with_capacity(total);
            for handle in handles {
                settled.push(handle.await.unwrap_or_else(|e| {
                    (Err(EmaError::backend(format!("pair task failed: {}", e))), Duration::ZERO)
                }));
            }
            settled
        });
        // Timed-out runs may still be executing; never wait on them.
        runtime.shutdown_background();

        let mut settled = settled.into_iter();
        let mut results = Vec::with_capacity(total);
        for scenario in scenarios {
            let mut row: Vec<ExperimentResult> = backends
                .iter()
                .zip(settled.by_ref())
                .map(|(backend, (outcome, elapsed))| {
                    ExperimentResult::new(scenario.clone(), backend.name(), outcome, elapsed)
                })
                .collect();
            enforce_shapes(&mut row);

            for r in &row {
                match &r.outcome {
                    Ok(_) => debug!("  scenario {} on {}: ok", r.scenario.id(), r.backend),
                    Err(e) => warn!("  scenario {} on {}: {}", r.scenario.id(), r.backend, e),
                }
            }
            results.extend(row);
        }

        let set = ResultSet::new(results);
        info!(
            "Batch complete: {}/{} pairs succeeded",
            set.completed_count(),
            set.len()
        );
        Ok(set)
    }

    fn build_runtime(&self) -> Result<Runtime, EmaError> {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.workers.max(1))
            .thread_name("ema-runner")
            .enable_time()
            .build()
            .map_err(|e| EmaError::config(format!("cannot start worker runtime: {}", e)))
    }
}

impl Default for ScenarioRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

/// Runs the backend and checks the series is well-formed.
fn simulate_checked(model: &dyn SimulationBackend, scenario: &Scenario) -> Result<OutcomeSeries, EmaError> {
    let series = model.simulate(scenario)?;
    series.validate()?;
    Ok(series)
}

async fn acquire(slots: Option<Arc<Semaphore>>) -> Result<Option<OwnedSemaphorePermit>, EmaError> {
    match slots {
        Some(slots) => slots
            .acquire_owned()
            .await
            .map(Some)
            .map_err(|_| EmaError::backend("worker pool closed")),
        None => Ok(None),
    }
}

/// Executes one pair: backend slot first, then a worker slot, then the run.
///
/// Permits move into the blocking task and are released only when the
/// backend returns. A timed-out pair settles immediately, but its slots stay
/// taken until the abandoned run actually finishes.
async fn execute_pair(
    scenario: Arc<Scenario>,
    model: Arc<dyn SimulationBackend>,
    backend_slots: Option<Arc<Semaphore>>,
    worker_slots: Option<Arc<Semaphore>>,
    timeout: Option<Duration>,
) -> (Result<OutcomeSeries, EmaError>, Duration) {
    let backend_permit = match acquire(backend_slots).await {
        Ok(permit) => permit,
        Err(e) => return (Err(e), Duration::ZERO),
    };
    let worker_permit = match acquire(worker_slots).await {
        Ok(permit) => permit,
        Err(e) => return (Err(e), Duration::ZERO),
    };

    let started = Instant::now();
    let task = tokio::task::spawn_blocking(move || {
        let _permits = (backend_permit, worker_permit);
        simulate_checked(model.as_ref(), &scenario)
    });

    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(joined) => flatten(joined),
            Err(_) => Err(EmaError::Timeout(limit.as_millis() as u64)),
        },
        None => flatten(task.await),
    };
    (outcome, started.elapsed())
}

fn flatten(joined: Result<Result<OutcomeSeries, EmaError>, JoinError>) -> Result<OutcomeSeries, EmaError> {
    joined.unwrap_or_else(|e| {
        if e.is_panic() {
            let payload = e.into_panic();
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(EmaError::backend(format!("backend panicked: {}", msg)))
        } else {
            Err(EmaError::backend("run cancelled"))
        }
    })
}

/// Replaces completed pairs whose shape differs from the reference backend.
///
/// The reference is the first backend (registration order) that completed
/// for this scenario. Nothing is truncated or interpolated.
fn enforce_shapes(row: &mut [ExperimentResult]) {
    let reference = row
        .iter()
        .find_map(|r| r.series().map(|s| (r.backend.clone(), s.shape())));
    let Some((reference, expected)) = reference else {
        return;
    };

    for r in row.iter_mut() {
        let actual = match &r.outcome {
            Ok(series) => series.shape(),
            Err(_) => continue,
        };
        if actual != expected {
            r.outcome = Err(EmaError::ShapeMismatch {
                reference: reference.clone(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ema_core::{predator_prey_parameters, PredatorPrey};
    use ema_env::FnBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn series_of_len(len: usize) -> OutcomeSeries {
        OutcomeSeries::new()
            .with("TIME", (0..len).map(|t| t as f64).collect())
            .with("prey", vec![1.0; len])
    }

    fn fixed_len(name: &str, len: usize) -> BackendHandle {
        BackendHandle::new(name, FnBackend::new(move |_: &Scenario| Ok(series_of_len(len))))
    }

    fn runner() -> ScenarioRunner {
        ScenarioRunner::default().with_workers(4).with_seed(42)
    }

    #[test]
    fn test_generate_scenarios_count_and_bounds() {
        let params = predator_prey_parameters();
        let scenarios = runner().generate_scenarios(&params, 50).unwrap();

        assert_eq!(scenarios.len(), 50);
        for s in &scenarios {
            let v = s.get("prey_birth_rate").unwrap();
            assert!((0.015..=0.035).contains(&v));
            for p in &params {
                assert!(p.contains(s.get(&p.name).unwrap()));
            }
        }
    }

    #[test]
    fn test_generate_scenarios_rejects_inverted_bounds() {
        let params = vec![
            Parameter::new("prey_birth_rate", 0.015, 0.035),
            Parameter::new("predation_rate", 0.003, 0.0005),
        ];
        let err = runner().generate_scenarios(&params, 10).unwrap_err();
        assert!(matches!(err, EmaError::InvalidParameter { ref name, .. } if name == "predation_rate"));
    }

    #[test]
    fn test_generate_scenarios_seeded() {
        let params = predator_prey_parameters();
        let a = runner().generate_scenarios(&params, 10).unwrap();
        let b = runner().generate_scenarios(&params, 10).unwrap();
        let c = runner().with_seed(7).generate_scenarios(&params, 10).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_run_is_idempotent() {
        let backend = BackendHandle::new("euler", PredatorPrey::euler());
        let scenario = Scenario::new(0, [("prey_birth_rate", 0.02)]);

        let r = runner();
        let first = r.run(&scenario, &backend).unwrap();
        let second = r.run(&scenario, &backend).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.steps(), Some(1461));
    }

    #[test]
    fn test_run_rejects_malformed_output() {
        let backend = BackendHandle::new(
            "ragged",
            FnBackend::new(|_: &Scenario| {
                Ok(OutcomeSeries::new().with("TIME", vec![0.0, 1.0]).with("prey", vec![1.0]))
            }),
        );
        let err = runner().run(&Scenario::new(0, [("x", 1.0)]), &backend).unwrap_err();
        assert!(matches!(err, EmaError::BackendExecution(_)));
    }

    #[test]
    fn test_run_catches_panics() {
        let backend = BackendHandle::new(
            "crashy",
            FnBackend::new(|_: &Scenario| -> Result<OutcomeSeries, EmaError> {
                panic!("sheet not found")
            }),
        );
        let err = runner().run(&Scenario::new(0, [("x", 1.0)]), &backend).unwrap_err();
        assert!(err.to_string().contains("sheet not found"));
    }

    #[test]
    fn test_run_all_full_cross_product() {
        let r = runner();
        let scenarios = r.generate_scenarios(&predator_prey_parameters(), 50).unwrap();
        let backends = vec![
            BackendHandle::new("euler", PredatorPrey::euler()),
            BackendHandle::new("rk4", PredatorPrey::runge_kutta()),
        ];

        let results = r.run_all(&scenarios, &backends).unwrap();
        assert_eq!(results.len(), 100);
        assert_eq!(results.failed_count(), 0);

        // Ordered scenario-major, then backend order
        assert_eq!(results.results()[0].backend, "euler");
        assert_eq!(results.results()[1].backend, "rk4");
        assert_eq!(results.results()[2].scenario.id(), 1);

        let err = results.max_abs_error(0, "euler", "rk4", "prey").unwrap();
        assert!(err.is_finite());
    }

    #[test]
    fn test_shape_mismatch_isolated_to_pair() {
        let scenarios = vec![Scenario::new(0, [("x", 1.0)]), Scenario::new(1, [("x", 2.0)])];
        let backends = vec![fixed_len("a", 10), fixed_len("b", 10), fixed_len("short", 9)];

        let results = runner().run_all(&scenarios, &backends).unwrap();
        assert_eq!(results.len(), 6);

        for id in 0..2 {
            assert!(results.get(id, "a").unwrap().is_success());
            assert!(results.get(id, "b").unwrap().is_success());
            let err = results.get(id, "short").unwrap().error().unwrap();
            assert!(matches!(err, EmaError::ShapeMismatch { ref reference, .. } if reference == "a"));
        }
    }

    #[test]
    fn test_reference_skips_failed_backend() {
        let failing = BackendHandle::new(
            "offline",
            FnBackend::new(|_: &Scenario| Err(EmaError::backend("model file missing"))),
        );
        let backends = vec![failing, fixed_len("a", 5), fixed_len("b", 5)];
        let results = runner()
            .run_all(&[Scenario::new(0, [("x", 1.0)])], &backends)
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results.get(0, "offline").unwrap().error().unwrap().kind(), "backend_execution");
        assert!(results.get(0, "a").unwrap().is_success());
        assert!(results.get(0, "b").unwrap().is_success());
    }

    #[test]
    fn test_partial_failure_recorded_not_dropped() {
        let flaky = BackendHandle::new(
            "flaky",
            FnBackend::new(|s: &Scenario| {
                if s.id() % 2 == 0 {
                    Ok(series_of_len(3))
                } else {
                    Err(EmaError::backend("non-numeric output"))
                }
            }),
        );
        let scenarios: Vec<Scenario> = (0..4).map(|i| Scenario::new(i, [("x", i as f64)])).collect();
        let results = runner().run_all(&scenarios, &[flaky, fixed_len("steady", 3)]).unwrap();

        assert_eq!(results.len(), 8);
        assert_eq!(results.failed_count(), 2);
        assert_eq!(results.summary().failures_by_kind.get("backend_execution"), Some(&2));
    }

    #[test]
    fn test_timeout_marks_pair_and_batch_continues() {
        let slow = BackendHandle::new(
            "slow",
            FnBackend::new(|s: &Scenario| {
                if s.id() == 0 {
                    std::thread::sleep(Duration::from_secs(2));
                }
                Ok(series_of_len(3))
            }),
        );
        let scenarios: Vec<Scenario> = (0..3).map(|i| Scenario::new(i, [("x", 1.0)])).collect();
        let r = runner().with_timeout(Duration::from_millis(200));

        let started = Instant::now();
        let results = r.run_all(&scenarios, &[slow, fixed_len("fast", 3)]).unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));

        assert_eq!(results.len(), 6);
        assert!(matches!(results.get(0, "slow").unwrap().error(), Some(EmaError::Timeout(200))));
        assert!(results.get(1, "slow").unwrap().is_success());
        assert!(results.get(0, "fast").unwrap().is_success());
    }

    #[test]
    fn test_backend_concurrency_bound() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (Arc::clone(&active), Arc::clone(&peak));

        let single = BackendHandle::new(
            "single_instance",
            FnBackend::new(move |_: &Scenario| {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                a.fetch_sub(1, Ordering::SeqCst);
                Ok(series_of_len(2))
            }),
        )
        .with_max_concurrency(1);

        let scenarios: Vec<Scenario> = (0..8).map(|i| Scenario::new(i, [("x", 1.0)])).collect();
        let results = runner().with_workers(8).run_all(&scenarios, &[single]).unwrap();

        assert_eq!(results.completed_count(), 8);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_timed_out_run_keeps_backend_slot() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (Arc::clone(&active), Arc::clone(&peak));

        let single = BackendHandle::new(
            "single_instance",
            FnBackend::new(move |s: &Scenario| {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                let nap = if s.id() == 0 { 600 } else { 10 };
                std::thread::sleep(Duration::from_millis(nap));
                a.fetch_sub(1, Ordering::SeqCst);
                Ok(series_of_len(2))
            }),
        )
        .with_max_concurrency(1);

        let scenarios: Vec<Scenario> = (0..4).map(|i| Scenario::new(i, [("x", 1.0)])).collect();
        let results = runner()
            .with_workers(4)
            .with_timeout(Duration::from_millis(100))
            .run_all(&scenarios, &[single])
            .unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(matches!(results.get(0, "single_instance").unwrap().error(), Some(EmaError::Timeout(100))));
        for id in 1..4 {
            assert!(results.get(id, "single_instance").unwrap().is_success());
        }
    }

    #[test]
    fn test_duplicate_scenario_ids_rejected() {
        let first = runner().generate_scenarios(&predator_prey_parameters(), 2).unwrap();
        let second = runner().with_seed(7).generate_scenarios(&predator_prey_parameters(), 2).unwrap();
        let combined: Vec<Scenario> = first.into_iter().chain(second).collect();

        let err = runner()
            .run_all(&combined, &[BackendHandle::new("euler", PredatorPrey::euler())])
            .unwrap_err();
        assert_eq!(err.kind(), "config");
        assert!(err.to_string().contains("scenario id 0"));
    }

    #[cfg(unix)]
    #[test]
    fn test_native_and_script_backends_agree() {
        let script = concat!(env!("CARGO_MANIFEST_DIR"), "/../scripts/predprey.sh");
        let work = std::env::temp_dir().join(format!("ema_sim_runs_{}", std::process::id()));
        let external = BackendHandle::new(
            "awk_script",
            ema_env::CommandBackend::new("/bin/sh")
                .with_args([script])
                .with_working_dir(&work),
        )
        .with_max_concurrency(1);

        let r = runner();
        let scenarios = r.generate_scenarios(&predator_prey_parameters(), 3).unwrap();
        let backends = vec![BackendHandle::new("native", PredatorPrey::euler()), external];
        let results = r.run_all(&scenarios, &backends).unwrap();

        assert_eq!(results.failed_count(), 0, "{:?}", results.failures().collect::<Vec<_>>());
        for s in &scenarios {
            let err = results.max_abs_error(s.id(), "native", "awk_script", "prey").unwrap();
            assert!(err < 1e-9, "prey diverged by {}", err);
        }
        let _ = std::fs::remove_dir_all(&work);
    }

    #[test]
    fn test_duplicate_backend_names_rejected() {
        let err = runner()
            .run_all(&[Scenario::new(0, [("x", 1.0)])], &[fixed_len("a", 2), fixed_len("a", 2)])
            .unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_empty_batch() {
        let results = runner().run_all(&[], &[fixed_len("a", 2)]).unwrap();
        assert!(results.is_empty());
    }
}
