//! EMA Backend Abstraction Layer
//!
//! This crate provides the seam that lets one scenario run against many
//! interchangeable simulation engines: native Rust models and external
//! programs alike.
//!
//! # Core Concept: One Capability
//!
//! Every engine exposes exactly `simulate(scenario) -> OutcomeSeries`.
//! Engine-specific setup (paths, run length, integrators) happens when the
//! backend is constructed, never at call time.
//!
//! # Example
//!
//! ```ignore
//! use ema_env::{Scenario, SimulationBackend, CommandBackend};
//!
//! let backend = CommandBackend::new("./models/predprey.sh")
//!     .with_working_dir("/tmp/ema");
//!
//! let scenario = Scenario::new(0, [("prey_birth_rate", 0.025)]);
//! let outcomes = backend.simulate(&scenario)?;
//! println!("{} steps", outcomes.steps().unwrap_or(0));
//! ```

mod backend;
mod command;
mod error;
mod types;

pub use backend::{FnBackend, SimulationBackend};
pub use command::{env_key, parse_outcomes, CommandBackend, SCENARIO_FILE};
pub use error::EmaError;
pub use types::{validate_parameters, OutcomeSeries, Parameter, Scenario, SeriesShape};
