//! Common types shared by samplers, backends and the runner.

use crate::error::EmaError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// An uncertain input with its sampling range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Input name as understood by every backend
    pub name: String,

    /// Inclusive lower bound
    pub lower: f64,

    /// Inclusive upper bound
    pub upper: f64,
}

impl Parameter {
    /// Creates a new parameter declaration.
    pub fn new(name: impl Into<String>, lower: f64, upper: f64) -> Self {
        Self {
            name: name.into(),
            lower,
            upper,
        }
    }

    /// Checks the declaration can be sampled.
    pub fn validate(&self) -> Result<(), EmaError> {
        if self.name.trim().is_empty() {
            return Err(EmaError::invalid_parameter(&self.name, "name is empty"));
        }
        if !self.lower.is_finite() || !self.upper.is_finite() {
            return Err(EmaError::invalid_parameter(&self.name, "bounds must be finite"));
        }
        if self.lower > self.upper {
            return Err(EmaError::invalid_parameter(
                &self.name,
                format!(
                    "lower bound {} exceeds upper bound {}",
                    self.lower, self.upper
                ),
            ));
        }
        Ok(())
    }

    /// Returns the width of the range.
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    /// Returns true if `value` lies within `[lower, upper]`.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

/// Validates a full parameter set, including name uniqueness.
pub fn validate_parameters(parameters: &[Parameter]) -> Result<(), EmaError> {
    let mut seen = HashSet::new();
    for parameter in parameters {
        parameter.validate()?;
        if !seen.insert(parameter.name.as_str()) {
            return Err(EmaError::invalid_parameter(&parameter.name, "declared more than once"));
        }
    }
    Ok(())
}

/// One concrete assignment of values to all declared parameters.
///
/// Immutable once generated: fields are private and only readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    id: usize,
    values: BTreeMap<String, f64>,
}

impl Scenario {
    /// Creates a scenario from name/value pairs.
    pub fn new<I, S>(id: usize, values: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            id,
            values: values.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Index of this scenario within its batch.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Returns the value assigned to `name`.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Iterates over (name, value) in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Borrowed view of the value map.
    pub fn values(&self) -> &BTreeMap<String, f64> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Shape of an outcome series: variable names and number of time steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesShape {
    pub variables: Vec<String>,
    pub steps: usize,
}

impl std::fmt::Display for SeriesShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] x {} steps", self.variables.join(", "), self.steps)
    }
}

/// Named time-series outputs of one simulation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutcomeSeries {
    variables: BTreeMap<String, Vec<f64>>,
}

impl OutcomeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts (or replaces) a variable.
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) {
        self.variables.insert(name.into(), values);
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.insert(name, values);
        self
    }

    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.variables.get(name).map(Vec::as_slice)
    }

    /// Variable names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.variables.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    /// Number of time steps, or `None` if variables disagree or there are none.
    pub fn steps(&self) -> Option<usize> {
        let mut lengths = self.variables.values().map(Vec::len);
        let first = lengths.next()?;
        lengths.all(|len| len == first).then_some(first)
    }

    /// Checks the series is rectangular, non-empty and finite, returning its shape.
    pub fn validate(&self) -> Result<SeriesShape, EmaError> {
        if self.variables.is_empty() {
            return Err(EmaError::backend("outcome series has no variables"));
        }
        let steps = self.steps().ok_or_else(|| {
            let lengths: Vec<String> = self
                .variables
                .iter()
                .map(|(k, v)| format!("{}={}", k, v.len()))
                .collect();
            EmaError::backend(format!("ragged outcome series ({})", lengths.join(", ")))
        })?;
        if steps == 0 {
            return Err(EmaError::backend("outcome series has zero time steps"));
        }
        for (name, values) in &self.variables {
            if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
                return Err(EmaError::backend(format!(
                    "non-numeric value in '{}' at step {}",
                    name, idx
                )));
            }
        }
        Ok(self.shape_unchecked(steps))
    }

    fn shape_unchecked(&self, steps: usize) -> SeriesShape {
        SeriesShape {
            variables: self.variables.keys().cloned().collect(),
            steps,
        }
    }

    /// Shape of the series; steps is 0 when the series is ragged.
    pub fn shape(&self) -> SeriesShape {
        self.shape_unchecked(self.steps().unwrap_or(0))
    }
}

impl FromIterator<(String, Vec<f64>)> for OutcomeSeries {
    fn from_iter<T: IntoIterator<Item = (String, Vec<f64>)>>(iter: T) -> Self {
        Self {
            variables: iter.into_iter().collect(),
        }
    }
}
