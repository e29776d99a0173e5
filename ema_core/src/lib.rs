//! EMA Core - native simulation models and outcome metrics
//!
//! This library holds the in-process backends used alongside external
//! engines:
//! 1. **Predator-prey**: Lotka-Volterra system with Euler and RK4 integrators
//! 2. **Metrics**: max absolute error and RMSE between backends' series

pub mod metrics;
pub mod predator_prey;

// Re-export key types for convenience
pub use metrics::{compare_variable, max_abs_error, rmse, VariableComparison};
pub use predator_prey::{
    predator_prey_parameters, Integrator, PredatorPrey, PredatorPreyConfig, PredatorPreyInputs,
    MAX_STEPS,
};
