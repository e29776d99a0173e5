//! JSON exporter for experiment results.
//!
//! Writes one record per (scenario, backend) pair for downstream analysis
//! and plotting tools.

use crate::config::RunnerConfig;
use crate::results::{ExperimentResult, ResultSet};

use ema_env::{OutcomeSeries, Parameter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;

/// One exported pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordExport {
    pub scenario_id: usize,
    pub backend: String,
    pub inputs: BTreeMap<String, f64>,
    /// "ok" or "failed"
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcomes: Option<OutcomeSeries>,
    pub elapsed_ms: f64,
}

impl RecordExport {
    fn from_result(result: &ExperimentResult, include_outcomes: bool) -> Self {
        let (status, error_kind, error, outcomes) = match &result.outcome {
            Ok(series) => (
                "ok",
                None,
                None,
                include_outcomes.then(|| series.clone()),
            ),
            Err(e) => ("failed", Some(e.kind().to_string()), Some(e.to_string()), None),
        };
        Self {
            scenario_id: result.scenario.id(),
            backend: result.backend.clone(),
            inputs: result.scenario.values().clone(),
            status: status.to_string(),
            error_kind,
            error,
            outcomes,
            elapsed_ms: result.elapsed.as_secs_f64() * 1000.0,
        }
    }
}

/// Complete experiment export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultExport {
    /// Sampling seed
    pub seed: u64,

    /// Sampling policy name
    pub sampling: String,

    /// Declared parameters
    pub parameters: Vec<Parameter>,

    /// Total / completed / failed counts
    pub total: usize,
    pub completed: usize,
    pub failed: usize,

    /// All pairs
    pub records: Vec<RecordExport>,
}

impl ResultExport {
    /// Builds an export from a finished batch.
    pub fn new(
        config: &RunnerConfig,
        parameters: &[Parameter],
        results: &ResultSet,
        include_outcomes: bool,
    ) -> Self {
        Self {
            seed: config.seed,
            sampling: config.sampling.name().to_string(),
            parameters: parameters.to_vec(),
            total: results.len(),
            completed: results.completed_count(),
            failed: results.failed_count(),
            records: results
                .iter()
                .map(|r| RecordExport::from_result(r, include_outcomes))
                .collect(),
        }
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
