//! Scenario samplers.
//!
//! Samplers draw points in the unit hypercube; `sample_scenarios` maps them
//! onto the declared parameter ranges.

use ema_env::{Parameter, Scenario};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Draws `count` points in `[0, 1)^dims`.
pub trait Sampler: Send + Sync {
    /// Short name for logs and exports.
    fn name(&self) -> &'static str;

    /// Returns `count` rows of `dims` unit-interval values.
    fn unit_samples(&self, dims: usize, count: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f64>>;
}

/// Independent uniform draws.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformSampler;

impl Sampler for UniformSampler {
    fn name(&self) -> &'static str {
        "uniform"
    }

    fn unit_samples(&self, dims: usize, count: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f64>> {
        (0..count)
            .map(|_| (0..dims).map(|_| rng.gen::<f64>()).collect())
            .collect()
    }
}

/// Latin hypercube: each dimension is cut into `count` equal strata and every
/// stratum receives exactly one sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatinHypercubeSampler;

impl Sampler for LatinHypercubeSampler {
    fn name(&self) -> &'static str {
        "latin_hypercube"
    }

    fn unit_samples(&self, dims: usize, count: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f64>> {
        let mut rows = vec![Vec::with_capacity(dims); count];
        let width = 1.0 / count.max(1) as f64;

        for _ in 0..dims {
            let mut strata: Vec<usize> = (0..count).collect();
            strata.shuffle(rng);
            for (row, stratum) in rows.iter_mut().zip(strata) {
                let u = (stratum as f64 + rng.gen::<f64>()) * width;
                // Guard against rounding up into the next stratum at the top end.
                row.push(u.min(1.0 - f64::EPSILON));
            }
        }
        rows
    }
}

/// Sampling policy selectable from config and CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SamplingPolicy {
    #[default]
    Uniform,
    LatinHypercube,
}

impl SamplingPolicy {
    /// Returns the sampler implementing this policy.
    pub fn sampler(&self) -> Box<dyn Sampler> {
        match self {
            SamplingPolicy::Uniform => Box::new(UniformSampler),
            SamplingPolicy::LatinHypercube => Box::new(LatinHypercubeSampler),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SamplingPolicy::Uniform => "uniform",
            SamplingPolicy::LatinHypercube => "latin_hypercube",
        }
    }
}

impl std::fmt::Display for SamplingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Maps unit samples onto parameter ranges.
///
/// Parameters must already be validated. Values are clamped to
/// `[lower, upper]` to absorb floating-point rounding.
pub fn sample_scenarios(
    sampler: &dyn Sampler,
    parameters: &[Parameter],
    count: usize,
    rng: &mut ChaCha8Rng,
) -> Vec<Scenario> {
    sampler
        .unit_samples(parameters.len(), count, rng)
        .into_iter()
        .enumerate()
        .map(|(id, row)| {
            let values = parameters.iter().zip(row).map(|(p, u)| {
                let value = (p.lower + u * p.width()).clamp(p.lower, p.upper);
                (p.name.clone(), value)
            });
            Scenario::new(id, values)
        })
        .collect()
}
