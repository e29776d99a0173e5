//! EMA Multi-Backend Scenario Runner
//!
//! This crate runs the same parameterised scenarios against several
//! interchangeable simulation backends and collects comparable time-series
//! outcomes.
//!
//! # Core Principle: Every Pair Accounted For
//!
//! A batch is the cross product scenarios x backends. Each pair runs
//! independently and yields exactly one result:
//! - **Success**: a well-formed outcome series
//! - **Failure**: the pair's error (backend crash, timeout, shape mismatch)
//!
//! Only malformed parameter declarations abort before anything runs.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ScenarioRunner                         │
//! │  ┌──────────────┐      ┌────────────────────────────────┐   │
//! │  │   Sampler    │─────►│  scenarios x backends          │   │
//! │  │ (seeded RNG) │      └───────────────┬────────────────┘   │
//! │  └──────────────┘                      │                    │
//! │                      ┌─────────────────▼─────────────────┐  │
//! │                      │ worker pool (global + per-backend │  │
//! │                      │ semaphores, per-run timeout)      │  │
//! │                      └─────────────────┬─────────────────┘  │
//! │       ┌──────────────┐   ┌─────────────▼┐  ┌─────────────┐  │
//! │       │ PredatorPrey │   │ CommandBackend│  │    ...      │  │
//! │       └──────────────┘   └──────────────┘  └─────────────┘  │
//! │                      shape check per scenario               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use ema_sim::{BackendHandle, RunnerConfig, ScenarioRunner};
//! use ema_core::{predator_prey_parameters, PredatorPrey};
//!
//! let runner = ScenarioRunner::new(RunnerConfig::default()).with_seed(42);
//! let scenarios = runner.generate_scenarios(&predator_prey_parameters(), 50)?;
//! let backends = vec![
//!     BackendHandle::new("euler", PredatorPrey::euler()),
//!     BackendHandle::new("rk4", PredatorPrey::runge_kutta()),
//! ];
//! let results = runner.run_all(&scenarios, &backends)?;
//! println!("{:?}", results.max_abs_error(0, "euler", "rk4", "prey"));
//! ```

mod backend;
mod config;
mod exporter;
mod logging;
mod results;
mod runner;
pub mod sampler;

pub use backend::BackendHandle;
pub use config::{BackendSpec, ExperimentConfig, RunnerConfig, DEFAULT_TIMEOUT_SECS};
pub use exporter::{RecordExport, ResultExport};
pub use logging::LogConfig;
pub use results::{BackendSummary, ExperimentResult, ResultSet, RunSummary};
pub use runner::ScenarioRunner;
pub use sampler::SamplingPolicy;
