//! Backend registration for the runner.

use ema_env::SimulationBackend;
use std::fmt;
use std::sync::Arc;

/// A named backend plus its concurrency bound.
///
/// The name and bound are runner-side configuration; the model itself only
/// exposes `simulate`.
#[derive(Clone)]
pub struct BackendHandle {
    /// Display name, unique within a batch
    name: String,

    /// The engine
    model: Arc<dyn SimulationBackend>,

    /// Maximum simultaneous runs (None = limited only by the worker pool)
    max_concurrency: Option<usize>,
}

impl BackendHandle {
    /// Wraps a backend under `name`.
    pub fn new(name: impl Into<String>, model: impl SimulationBackend) -> Self {
        Self {
            name: name.into(),
            model: Arc::new(model),
            max_concurrency: None,
        }
    }

    /// Wraps an already shared backend.
    pub fn from_shared(name: impl Into<String>, model: Arc<dyn SimulationBackend>) -> Self {
        Self {
            name: name.into(),
            model,
            max_concurrency: None,
        }
    }

    /// Bounds simultaneous runs; single-instance engines use 1.
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_concurrency(&self) -> Option<usize> {
        self.max_concurrency
    }

    pub(crate) fn model(&self) -> Arc<dyn SimulationBackend> {
        Arc::clone(&self.model)
    }
}

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendHandle")
            .field("name", &self.name)
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}
