//! Core backend trait for EMA scenario runs.

use crate::error::EmaError;
use crate::types::{OutcomeSeries, Scenario};
use std::sync::Arc;

/// The single capability every simulation engine exposes.
///
/// This trait abstracts the engine so that the runner can execute the same
/// scenario against native Rust models and external programs alike.
///
/// # Implementations
///
/// - **Native**: `ema_core::PredatorPrey` - in-process ODE integration
/// - **External**: `CommandBackend` - drives an executable per run
///
/// # Contract
///
/// - Backend-specific setup (paths, run length, integrator) happens at
///   construction; `simulate` only sees the scenario.
/// - A run must not observe or mutate any other run's state. Backends that
///   touch shared resources must isolate them per call.
/// - Any failure to complete is reported as `EmaError::BackendExecution`.
pub trait SimulationBackend: Send + Sync + 'static {
    /// Runs one scenario and returns its named time series.
    fn simulate(&self, scenario: &Scenario) -> Result<OutcomeSeries, EmaError>;
}

impl<B: SimulationBackend + ?Sized> SimulationBackend for Arc<B> {
    fn simulate(&self, scenario: &Scenario) -> Result<OutcomeSeries, EmaError> {
        (**self).simulate(scenario)
    }
}

impl<B: SimulationBackend + ?Sized> SimulationBackend for Box<B> {
    fn simulate(&self, scenario: &Scenario) -> Result<OutcomeSeries, EmaError> {
        (**self).simulate(scenario)
    }
}

/// Adapts a plain function or closure into a backend.
///
/// Handy for analytic models and tests.
pub struct FnBackend<F> {
    f: F,
}

impl<F> FnBackend<F>
where
    F: Fn(&Scenario) -> Result<OutcomeSeries, EmaError> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> SimulationBackend for FnBackend<F>
where
    F: Fn(&Scenario) -> Result<OutcomeSeries, EmaError> + Send + Sync + 'static,
{
    fn simulate(&self, scenario: &Scenario) -> Result<OutcomeSeries, EmaError> {
        (self.f)(scenario)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_backend_simulates() {
        let backend = FnBackend::new(|s: &Scenario| {
            let x = s.get("x").unwrap_or(0.0);
            Ok(OutcomeSeries::new().with("y", vec![x, 2.0 * x]))
        });

        let scenario = Scenario::new(0, [("x", 3.0)]);
        let out = backend.simulate(&scenario).unwrap();
        assert_eq!(out.get("y"), Some(&[3.0, 6.0][..]));
    }

    #[test]
    fn test_arc_dyn_backend() {
        let backend: Arc<dyn SimulationBackend> =
            Arc::new(FnBackend::new(|_: &Scenario| Err(EmaError::backend("offline"))));

        let err = backend.simulate(&Scenario::new(0, [("x", 1.0)])).unwrap_err();
        assert_eq!(err.kind(), "backend_execution");
    }
}
