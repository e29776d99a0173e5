//! EMA scenario runner CLI
//!
//! Sample scenarios, run them against every configured backend, and report
//! how the backends compare.

use clap::Parser;
use ema_env::EmaError;
use ema_sim::{
    ExperimentConfig, LogConfig, ResultExport, ResultSet, SamplingPolicy, ScenarioRunner,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// EMA multi-backend scenario runner
#[derive(Parser, Debug)]
#[command(name = "ema-run")]
#[command(about = "Run sampled scenarios against interchangeable simulation backends", long_about = None)]
struct Args {
    /// Experiment file (JSON); defaults to the built-in predator-prey experiment
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of scenarios to sample (overrides the config)
    #[arg(short = 'n', long)]
    samples: Option<usize>,

    /// Sampling seed (0 = random from time)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Sampling policy
    #[arg(long, value_enum)]
    sampling: Option<SamplingPolicy>,

    /// Worker pool size
    #[arg(short, long)]
    workers: Option<usize>,

    /// Per-run timeout in seconds
    #[arg(short, long)]
    timeout_secs: Option<f64>,

    /// Disable the per-run timeout
    #[arg(long, conflicts_with = "timeout_secs")]
    no_timeout: bool,

    /// Outcome variable compared between the first two backends
    #[arg(long, default_value = "prey")]
    compare: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export all results to a JSON file
    #[arg(long)]
    export: Option<String>,

    /// Include outcome series in the export
    #[arg(long, requires = "export")]
    include_outcomes: bool,
}

/// Max-abs-error statistics of one variable between two backends.
struct Comparison {
    left: String,
    right: String,
    compared: usize,
    worst: f64,
    mean: f64,
}

fn compare_first_two(results: &ResultSet, variable: &str) -> Option<Comparison> {
    let names = results.backend_names();
    let (left, right) = (names.first()?, names.get(1)?);

    let errors: Vec<f64> = results
        .scenario_ids()
        .into_iter()
        .filter_map(|id| results.max_abs_error(id, left, right, variable))
        .collect();
    if errors.is_empty() {
        return None;
    }

    Some(Comparison {
        left: left.to_string(),
        right: right.to_string(),
        compared: errors.len(),
        worst: errors.iter().copied().fold(0.0, f64::max),
        mean: errors.iter().sum::<f64>() / errors.len() as f64,
    })
}

fn load_experiment(args: &Args) -> Result<ExperimentConfig, EmaError> {
    let mut experiment = match &args.config {
        Some(path) => ExperimentConfig::load(path)?,
        None => ExperimentConfig::predator_prey_default(),
    };

    if let Some(samples) = args.samples {
        experiment.samples = samples;
    }
    if let Some(seed) = args.seed {
        experiment.seed = if seed == 0 {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(42)
        } else {
            seed
        };
    }
    if let Some(sampling) = args.sampling {
        experiment.sampling = sampling;
    }
    if let Some(workers) = args.workers {
        experiment.workers = Some(workers);
    }
    if let Some(secs) = args.timeout_secs {
        experiment.timeout_secs = Some(secs);
    }
    if args.no_timeout {
        experiment.timeout_secs = None;
    }

    experiment.validate()?;
    Ok(experiment)
}

fn print_json(results: &ResultSet, comparison: Option<&Comparison>, variable: &str) {
    let summary = results.summary();
    let report = serde_json::json!({
        "total": summary.total,
        "completed": summary.completed,
        "failed": summary.failed,
        "failures_by_kind": summary.failures_by_kind,
        "backends": summary.per_backend.iter().map(|(name, b)| {
            serde_json::json!({
                "name": name,
                "completed": b.completed,
                "failed": b.failed,
                "mean_elapsed_ms": b.mean_elapsed_ms,
            })
        }).collect::<Vec<_>>(),
        "comparison": comparison.map(|c| serde_json::json!({
            "variable": variable,
            "left": c.left,
            "right": c.right,
            "scenarios": c.compared,
            "max_abs_error": c.worst,
            "mean_max_abs_error": c.mean,
        })),
        "failures": results.failures().map(|r| {
            serde_json::json!({
                "scenario": r.scenario.id(),
                "backend": r.backend,
                "kind": r.error().map(EmaError::kind),
                "error": r.error().map(ToString::to_string),
            })
        }).collect::<Vec<_>>(),
    });
    match serde_json::to_string_pretty(&report) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Error: cannot encode report: {}", e),
    }
}

fn print_human(results: &ResultSet, comparison: Option<&Comparison>, variable: &str) {
    let summary = results.summary();

    info!("");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for (name, b) in &summary.per_backend {
        info!(
            "  {:<16} {:>5} ok  {:>5} failed  {:>9.2}ms/run",
            name, b.completed, b.failed, b.mean_elapsed_ms
        );
    }

    if let Some(c) = comparison {
        info!(
            "  {} vs {} on '{}': max |err| {:.6} (mean {:.6}) over {} scenarios",
            c.left, c.right, variable, c.worst, c.mean, c.compared
        );
    }

    if summary.failed == 0 {
        info!("All {} scenario runs completed", summary.total);
    } else {
        error!("{}/{} scenario runs failed", summary.failed, summary.total);
        for r in results.failures() {
            error!(
                "  - scenario {} on {}: {}",
                r.scenario.id(),
                r.backend,
                r.error().map(ToString::to_string).unwrap_or_default()
            );
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let log = LogConfig {
        verbose: args.verbose,
        quiet: args.json,
        filter: None,
    };
    if let Err(e) = log.init() {
        eprintln!("Error: {}", e);
        return ExitCode::from(2);
    }

    let experiment = match load_experiment(&args) {
        Ok(experiment) => experiment,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    };

    info!("EMA scenario runner v{}", env!("CARGO_PKG_VERSION"));

    let runner = ScenarioRunner::new(experiment.runner_config());
    let prepared = runner
        .generate_scenarios(&experiment.parameters, experiment.samples)
        .and_then(|scenarios| Ok((scenarios, experiment.build_backends()?)));
    let (scenarios, backends) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    };

    let results = match runner.run_all(&scenarios, &backends) {
        Ok(results) => results,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    };

    let comparison = compare_first_two(&results, &args.compare);
    if args.json {
        print_json(&results, comparison.as_ref(), &args.compare);
    } else {
        print_human(&results, comparison.as_ref(), &args.compare);
    }

    if let Some(path) = &args.export {
        let export = ResultExport::new(
            runner.config(),
            &experiment.parameters,
            &results,
            args.include_outcomes,
        );
        match export.write_to_file(path) {
            Ok(()) => info!("Exported {} records to {}", export.records.len(), path),
            Err(e) => error!("Failed to write export: {:?}", e),
        }
    }

    if results.failed_count() > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use ema_env::{OutcomeSeries, Scenario};
    use ema_sim::ExperimentResult;
    use std::time::Duration;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_overrides_apply() {
        let args = Args::parse_from([
            "ema-run", "--samples", "7", "--seed", "9", "--sampling", "latin-hypercube", "--no-timeout",
        ]);
        let experiment = load_experiment(&args).unwrap();

        assert_eq!(experiment.samples, 7);
        assert_eq!(experiment.seed, 9);
        assert_eq!(experiment.sampling, SamplingPolicy::LatinHypercube);
        assert_eq!(experiment.timeout_secs, None);
    }

    #[test]
    fn test_compare_first_two() {
        let s = Scenario::new(0, [("x", 1.0)]);
        let results = ResultSet::new(vec![
            ExperimentResult::new(s.clone(), "a", Ok(OutcomeSeries::new().with("prey", vec![1.0, 2.0])), Duration::ZERO),
            ExperimentResult::new(s, "b", Ok(OutcomeSeries::new().with("prey", vec![1.5, 2.0])), Duration::ZERO),
        ]);

        let c = compare_first_two(&results, "prey").unwrap();
        assert_eq!(c.compared, 1);
        assert_eq!(c.worst, 0.5);
        assert!(compare_first_two(&results, "predators").is_none());
    }
}
