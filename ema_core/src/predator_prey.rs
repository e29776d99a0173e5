//! Predator-prey (Lotka-Volterra) native model
//! ============================================
//!
//! Classic two-species system integrated on a fixed time grid:
//!
//! ```text
//! d(prey)/dt      = prey_birth_rate * prey - predation_rate * prey * predators
//! d(predators)/dt = predator_efficiency * predators * prey - predator_loss_rate * predators
//! ```
//!
//! Populations are clamped at zero after every step. Outputs are `TIME`,
//! `prey` and `predators`, each with `final_time / dt + 1` samples.

use ema_env::{EmaError, OutcomeSeries, Parameter, Scenario, SimulationBackend};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Output variable: simulation time
pub const TIME: &str = "TIME";
/// Output variable: prey population
pub const PREY: &str = "prey";
/// Output variable: predator population
pub const PREDATORS: &str = "predators";

/// Longest run `PredatorPrey::new` accepts, in integration steps.
pub const MAX_STEPS: usize = 10_000_000;

// =============================================================================
// INPUTS
// =============================================================================

/// Rate constants and initial populations for one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredatorPreyInputs {
    pub prey_birth_rate: f64,
    pub predation_rate: f64,
    pub predator_efficiency: f64,
    pub predator_loss_rate: f64,
    pub initial_prey: f64,
    pub initial_predators: f64,
}

impl Default for PredatorPreyInputs {
    fn default() -> Self {
        Self {
            prey_birth_rate: 0.025,
            predation_rate: 0.0015,
            predator_efficiency: 0.002,
            predator_loss_rate: 0.06,
            initial_prey: 50.0,
            initial_predators: 20.0,
        }
    }
}

impl PredatorPreyInputs {
    /// Overlays scenario values on the defaults.
    ///
    /// Inputs the scenario does not name keep their default; names the model
    /// does not know are rejected.
    pub fn from_scenario(scenario: &Scenario) -> Result<Self, EmaError> {
        let mut inputs = Self::default();
        for (name, value) in scenario.iter() {
            let slot = match name {
                "prey_birth_rate" => &mut inputs.prey_birth_rate,
                "predation_rate" => &mut inputs.predation_rate,
                "predator_efficiency" => &mut inputs.predator_efficiency,
                "predator_loss_rate" => &mut inputs.predator_loss_rate,
                "initial_prey" => &mut inputs.initial_prey,
                "initial_predators" => &mut inputs.initial_predators,
                other => {
                    return Err(EmaError::backend(format!(
                        "predator-prey model has no input named '{}'",
                        other
                    )))
                }
            };
            *slot = value;
        }
        Ok(inputs)
    }

    fn derivative(&self, state: &Vector2<f64>) -> Vector2<f64> {
        let prey = state.x;
        let predators = state.y;
        Vector2::new(
            self.prey_birth_rate * prey - self.predation_rate * prey * predators,
            self.predator_efficiency * predators * prey - self.predator_loss_rate * predators,
        )
    }
}

/// The standard uncertainty ranges for the predator-prey experiment.
pub fn predator_prey_parameters() -> Vec<Parameter> {
    vec![
        Parameter::new("prey_birth_rate", 0.015, 0.035),
        Parameter::new("predation_rate", 0.0005, 0.003),
        Parameter::new("predator_efficiency", 0.001, 0.004),
        Parameter::new("predator_loss_rate", 0.04, 0.08),
    ]
}

// =============================================================================
// INTEGRATION
// =============================================================================

/// Numerical integration scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Integrator {
    /// Explicit Euler (what spreadsheet and SD tools typically do)
    #[default]
    Euler,
    /// Classic fourth-order Runge-Kutta
    RungeKutta4,
}

impl Integrator {
    fn step(&self, inputs: &PredatorPreyInputs, state: &Vector2<f64>, dt: f64) -> Vector2<f64> {
        let next = match self {
            Integrator::Euler => state + inputs.derivative(state) * dt,
            Integrator::RungeKutta4 => {
                let k1 = inputs.derivative(state);
                let k2 = inputs.derivative(&(state + k1 * (dt / 2.0)));
                let k3 = inputs.derivative(&(state + k2 * (dt / 2.0)));
                let k4 = inputs.derivative(&(state + k3 * dt));
                state + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0)
            }
        };
        next.map(|v| v.max(0.0))
    }
}

/// Run-length configuration for the model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredatorPreyConfig {
    /// Integration step (time units)
    pub dt: f64,
    /// Simulation horizon (time units)
    pub final_time: f64,
    /// Integration scheme
    pub integrator: Integrator,
}

impl Default for PredatorPreyConfig {
    fn default() -> Self {
        Self {
            dt: 0.25,
            final_time: 365.0,
            integrator: Integrator::Euler,
        }
    }
}

/// Native predator-prey backend.
#[derive(Debug, Clone)]
pub struct PredatorPrey {
    config: PredatorPreyConfig,
    steps: usize,
}

impl PredatorPrey {
    /// Creates a model, rejecting non-positive or non-finite run lengths.
    pub fn new(config: PredatorPreyConfig) -> Result<Self, EmaError> {
        if !(config.dt.is_finite() && config.dt > 0.0) {
            return Err(EmaError::config(format!("dt must be positive, got {}", config.dt)));
        }
        if !(config.final_time.is_finite() && config.final_time >= config.dt) {
            return Err(EmaError::config(format!(
                "final_time must be at least dt ({}), got {}",
                config.dt, config.final_time
            )));
        }
        let ratio = (config.final_time / config.dt).round();
        if ratio > MAX_STEPS as f64 {
            return Err(EmaError::config(format!(
                "final_time / dt = {} exceeds the {} step limit",
                ratio, MAX_STEPS
            )));
        }
        let steps = ratio as usize;
        Ok(Self { config, steps })
    }

    /// Euler model with the default run length.
    pub fn euler() -> Self {
        Self {
            config: PredatorPreyConfig::default(),
            steps: 1460,
        }
    }

    /// RK4 model with the default run length.
    pub fn runge_kutta() -> Self {
        Self {
            config: PredatorPreyConfig {
                integrator: Integrator::RungeKutta4,
                ..PredatorPreyConfig::default()
            },
            steps: 1460,
        }
    }

    pub fn config(&self) -> &PredatorPreyConfig {
        &self.config
    }

    /// Number of samples per output variable.
    pub fn output_len(&self) -> usize {
        self.steps + 1
    }

    /// Integrates the system for the given inputs.
    pub fn integrate(&self, inputs: &PredatorPreyInputs) -> OutcomeSeries {
        let dt = self.config.dt;
        let len = self.output_len();

        let mut time = Vec::with_capacity(len);
        let mut prey = Vec::with_capacity(len);
        let mut predators = Vec::with_capacity(len);

        let mut state = Vector2::new(inputs.initial_prey, inputs.initial_predators);
        time.push(0.0);
        prey.push(state.x);
        predators.push(state.y);

        for t in 1..len {
            state = self.config.integrator.step(inputs, &state, dt);
            time.push(t as f64 * dt);
            prey.push(state.x);
            predators.push(state.y);
        }

        OutcomeSeries::new()
            .with(TIME, time)
            .with(PREY, prey)
            .with(PREDATORS, predators)
    }
}

impl SimulationBackend for PredatorPrey {
    fn simulate(&self, scenario: &Scenario) -> Result<OutcomeSeries, EmaError> {
        let inputs = PredatorPreyInputs::from_scenario(scenario)?;
        Ok(self.integrate(&inputs))
    }
}
