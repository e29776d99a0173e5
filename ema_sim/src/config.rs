//! Runner and experiment configuration.

use crate::backend::BackendHandle;
use crate::sampler::SamplingPolicy;

use ema_core::{predator_prey_parameters, Integrator, PredatorPrey, PredatorPreyConfig};
use ema_env::{validate_parameters, CommandBackend, EmaError, Parameter};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default per-run timeout
pub const DEFAULT_TIMEOUT_SECS: f64 = 300.0;

/// Configuration for a scenario runner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Master seed for sampling
    pub seed: u64,

    /// Worker pool size
    pub workers: usize,

    /// Per-run timeout (None = wait for every run)
    pub timeout: Option<Duration>,

    /// Sampling policy for `generate_scenarios`
    pub sampling: SamplingPolicy,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            workers: default_workers(),
            timeout: Some(Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS)),
            sampling: SamplingPolicy::Uniform,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn timeout_from_secs(secs: f64) -> Result<Duration, EmaError> {
    if !(secs.is_finite() && secs > 0.0) {
        return Err(EmaError::config(format!("timeout_secs must be positive, got {}", secs)));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| EmaError::config(format!("timeout_secs {} is out of range: {}", secs, e)))
}

fn default_seed() -> u64 {
    42
}

fn default_timeout_secs() -> Option<f64> {
    Some(DEFAULT_TIMEOUT_SECS)
}

fn default_dt() -> f64 {
    PredatorPreyConfig::default().dt
}

fn default_final_time() -> f64 {
    PredatorPreyConfig::default().final_time
}

/// One backend entry of an experiment file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendSpec {
    /// Native predator-prey model
    PredatorPrey {
        name: String,
        #[serde(default)]
        integrator: Integrator,
        #[serde(default = "default_dt")]
        dt: f64,
        #[serde(default = "default_final_time")]
        final_time: f64,
        #[serde(default)]
        max_concurrency: Option<usize>,
    },

    /// External executable
    Command {
        name: String,
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        working_dir: Option<PathBuf>,
        #[serde(default)]
        reentrant: bool,
        #[serde(default)]
        max_concurrency: Option<usize>,
    },
}

impl BackendSpec {
    pub fn name(&self) -> &str {
        match self {
            BackendSpec::PredatorPrey { name, .. } | BackendSpec::Command { name, .. } => name,
        }
    }

    /// Constructs the backend this entry describes.
    ///
    /// `timeout` bounds each external program run; native models ignore it.
    pub fn build(&self, timeout: Option<Duration>) -> Result<BackendHandle, EmaError> {
        let (handle, limit) = match self {
            BackendSpec::PredatorPrey {
                name,
                integrator,
                dt,
                final_time,
                max_concurrency,
            } => {
                let model = PredatorPrey::new(PredatorPreyConfig {
                    dt: *dt,
                    final_time: *final_time,
                    integrator: *integrator,
                })
                .map_err(|e| {
                    let reason = match e {
                        EmaError::Config(msg) => msg,
                        other => other.to_string(),
                    };
                    EmaError::config(format!("backend '{}': {}", name, reason))
                })?;
                (BackendHandle::new(name.clone(), model), *max_concurrency)
            }
            BackendSpec::Command {
                name,
                program,
                args,
                working_dir,
                reentrant,
                max_concurrency,
            } => {
                let mut backend = CommandBackend::new(program.clone())
                    .with_args(args.iter().cloned())
                    .with_reentrant(*reentrant);
                if let Some(dir) = working_dir {
                    backend = backend.with_working_dir(dir.clone());
                }
                if let Some(limit) = timeout {
                    backend = backend.with_timeout(limit);
                }
                (BackendHandle::new(name.clone(), backend), *max_concurrency)
            }
        };
        Ok(match limit {
            Some(n) => handle.with_max_concurrency(n),
            None => handle,
        })
    }
}

/// An experiment: parameters, sample count, backends and runner settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub parameters: Vec<Parameter>,

    pub samples: usize,

    #[serde(default = "default_seed")]
    pub seed: u64,

    #[serde(default)]
    pub sampling: SamplingPolicy,

    /// Worker pool size (defaults to available parallelism)
    #[serde(default)]
    pub workers: Option<usize>,

    /// Per-run timeout in seconds; `null` disables it
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: Option<f64>,

    pub backends: Vec<BackendSpec>,
}

impl ExperimentConfig {
    /// Built-in predator-prey experiment: Euler vs RK4.
    pub fn predator_prey_default() -> Self {
        Self {
            parameters: predator_prey_parameters(),
            samples: 50,
            seed: default_seed(),
            sampling: SamplingPolicy::Uniform,
            workers: None,
            timeout_secs: default_timeout_secs(),
            backends: vec![
                BackendSpec::PredatorPrey {
                    name: "euler".to_string(),
                    integrator: Integrator::Euler,
                    dt: default_dt(),
                    final_time: default_final_time(),
                    max_concurrency: None,
                },
                BackendSpec::PredatorPrey {
                    name: "rk4".to_string(),
                    integrator: Integrator::RungeKutta4,
                    dt: default_dt(),
                    final_time: default_final_time(),
                    max_concurrency: None,
                },
            ],
        }
    }

    /// Loads and validates a JSON experiment file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EmaError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EmaError::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    /// Parses and validates a JSON experiment.
    pub fn from_json(text: &str) -> Result<Self, EmaError> {
        let config: Self = serde_json::from_str(text).map_err(EmaError::config)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks parameters, backends and runner settings.
    pub fn validate(&self) -> Result<(), EmaError> {
        validate_parameters(&self.parameters)?;

        if self.backends.is_empty() {
            return Err(EmaError::config("at least one backend is required"));
        }
        let mut names = HashSet::new();
        for backend in &self.backends {
            if !names.insert(backend.name()) {
                return Err(EmaError::config(format!(
                    "backend name '{}' used twice",
                    backend.name()
                )));
            }
        }
        if self.workers == Some(0) {
            return Err(EmaError::config("workers must be at least 1"));
        }
        if let Some(secs) = self.timeout_secs {
            timeout_from_secs(secs)?;
        }
        Ok(())
    }

    /// Runner settings derived from this experiment.
    ///
    /// Call after `validate`; an unrepresentable timeout is dropped here.
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            seed: self.seed,
            workers: self.workers.unwrap_or_else(default_workers),
            timeout: self.timeout_secs.and_then(|secs| timeout_from_secs(secs).ok()),
            sampling: self.sampling,
        }
    }

    /// Constructs every configured backend.
    ///
    /// Command backends inherit the per-run timeout so hung programs are
    /// killed rather than left running.
    pub fn build_backends(&self) -> Result<Vec<BackendHandle>, EmaError> {
        let timeout = self.runner_config().timeout;
        self.backends.iter().map(|spec| spec.build(timeout)).collect()
    }
}
