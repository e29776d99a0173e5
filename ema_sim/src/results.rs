//! Experiment results collected by the runner.

use ema_core::metrics::{compare_variable, VariableComparison};
use ema_env::{EmaError, OutcomeSeries, Scenario};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

/// Outcome of one (scenario, backend) pair.
#[derive(Debug, Clone)]
pub struct ExperimentResult {
    /// Scenario that was run
    pub scenario: Scenario,

    /// Backend name
    pub backend: String,

    /// Series on success, the pair's error otherwise
    pub outcome: Result<OutcomeSeries, EmaError>,

    /// Wall-clock time spent executing (excludes queueing)
    pub elapsed: Duration,
}

impl ExperimentResult {
    pub fn new(
        scenario: Scenario,
        backend: impl Into<String>,
        outcome: Result<OutcomeSeries, EmaError>,
        elapsed: Duration,
    ) -> Self {
        Self {
            scenario,
            backend: backend.into(),
            outcome,
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn series(&self) -> Option<&OutcomeSeries> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&EmaError> {
        self.outcome.as_ref().err()
    }
}

/// Per-backend counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendSummary {
    pub completed: usize,
    pub failed: usize,
    pub mean_elapsed_ms: f64,
}

/// Aggregate counts over a result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Failure counts keyed by `EmaError::kind()`
    pub failures_by_kind: BTreeMap<&'static str, usize>,
    pub per_backend: BTreeMap<String, BackendSummary>,
}

/// All results of a batch, one entry per (scenario, backend) pair.
///
/// Ordered scenario-major, then by backend registration order.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    results: Vec<ExperimentResult>,
}

impl ResultSet {
    pub fn new(results: Vec<ExperimentResult>) -> Self {
        Self { results }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExperimentResult> {
        self.results.iter()
    }

    pub fn results(&self) -> &[ExperimentResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<ExperimentResult> {
        self.results
    }

    /// Looks up the pair for `scenario_id` on `backend`.
    pub fn get(&self, scenario_id: usize, backend: &str) -> Option<&ExperimentResult> {
        self.results
            .iter()
            .find(|r| r.scenario.id() == scenario_id && r.backend == backend)
    }

    /// All pairs of one backend.
    pub fn for_backend<'a>(&'a self, backend: &'a str) -> impl Iterator<Item = &'a ExperimentResult> + 'a {
        self.results.iter().filter(move |r| r.backend == backend)
    }

    /// Failed pairs, in order.
    pub fn failures(&self) -> impl Iterator<Item = &ExperimentResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn completed_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.len() - self.completed_count()
    }

    /// Backend names in first-seen order.
    pub fn backend_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for r in &self.results {
            if !names.contains(&r.backend.as_str()) {
                names.push(&r.backend);
            }
        }
        names
    }

    /// Distinct scenario ids in first-seen order.
    pub fn scenario_ids(&self) -> Vec<usize> {
        let mut seen = HashSet::new();
        self.results
            .iter()
            .map(|r| r.scenario.id())
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Compares `variable` between two backends for one scenario.
    ///
    /// `None` if either pair is missing, failed, or lacks the variable.
    pub fn compare(
        &self,
        scenario_id: usize,
        a: &str,
        b: &str,
        variable: &str,
    ) -> Option<VariableComparison> {
        let xs = self.get(scenario_id, a)?.series()?;
        let ys = self.get(scenario_id, b)?.series()?;
        compare_variable(xs, ys, variable)
    }

    /// Maximum absolute error of `variable` between two backends.
    pub fn max_abs_error(&self, scenario_id: usize, a: &str, b: &str, variable: &str) -> Option<f64> {
        self.compare(scenario_id, a, b, variable).map(|c| c.max_abs_error)
    }

    /// Aggregates counts per error kind and per backend.
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            total: self.len(),
            ..Default::default()
        };
        let mut elapsed_ms: BTreeMap<String, f64> = BTreeMap::new();

        for r in &self.results {
            let entry = summary.per_backend.entry(r.backend.clone()).or_default();
            match &r.outcome {
                Ok(_) => {
                    summary.completed += 1;
                    entry.completed += 1;
                }
                Err(e) => {
                    summary.failed += 1;
                    entry.failed += 1;
                    *summary.failures_by_kind.entry(e.kind()).or_insert(0) += 1;
                }
            }
            *elapsed_ms.entry(r.backend.clone()).or_insert(0.0) += r.elapsed.as_secs_f64() * 1000.0;
        }

        for (name, entry) in summary.per_backend.iter_mut() {
            let runs = entry.completed + entry.failed;
            if runs > 0 {
                entry.mean_elapsed_ms = elapsed_ms.get(name).copied().unwrap_or(0.0) / runs as f64;
            }
        }
        summary
    }
}

impl IntoIterator for ResultSet {
    type Item = ExperimentResult;
    type IntoIter = std::vec::IntoIter<ExperimentResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a ExperimentResult;
    type IntoIter = std::slice::Iter<'a, ExperimentResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}
