//! External-program backend: runs an executable once per scenario.

use crate::backend::SimulationBackend;
use crate::error::EmaError;
use crate::types::{OutcomeSeries, Scenario};
use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// File the scenario is written to inside the run directory.
pub const SCENARIO_FILE: &str = "scenario.json";

/// How often a running child is checked against its deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Backend that drives an external executable.
///
/// Protocol per run:
/// - scenario JSON (`{"name": value, ...}`) on stdin and in `scenario.json`
/// - each value also exported as `EMA_<NAME>`
/// - the program prints `{"variable": [numbers...], ...}` on stdout, exits 0
///
/// Unless marked reentrant, every run gets its own `run-<uuid>` directory
/// under `working_dir`, removed again once the run is over. With a timeout
/// set, a child still running at the deadline is killed and the run fails
/// with `EmaError::Timeout`.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    /// Program to execute
    program: PathBuf,

    /// Arguments passed to every invocation
    args: Vec<String>,

    /// Base working directory
    working_dir: PathBuf,

    /// Whether concurrent runs may share `working_dir`
    reentrant: bool,

    /// Keep per-run directories after completion (debugging)
    keep_run_dirs: bool,

    /// Kill the child after this long (None = wait indefinitely)
    timeout: Option<Duration>,
}

impl CommandBackend {
    /// Creates a backend for `program`, working under the system temp dir.
    ///
    /// Relative paths with a directory part are anchored to the current
    /// directory, since every run executes inside its own run directory.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: resolve_program(program.into()),
            args: Vec::new(),
            working_dir: std::env::temp_dir().join("ema_runs"),
            reentrant: false,
            keep_run_dirs: false,
            timeout: None,
        }
    }

    /// Sets the arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the base working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Declares that concurrent runs may share the working directory.
    pub fn with_reentrant(mut self, reentrant: bool) -> Self {
        self.reentrant = reentrant;
        self
    }

    /// Keeps per-run directories instead of removing them.
    pub fn keep_run_dirs(mut self, keep: bool) -> Self {
        self.keep_run_dirs = keep;
        self
    }

    /// Kills a child that is still running after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn prepare_run_dir(&self) -> Result<PathBuf, EmaError> {
        let dir = if self.reentrant {
            self.working_dir.clone()
        } else {
            self.working_dir.join(format!("run-{}", Uuid::new_v4()))
        };
        fs::create_dir_all(&dir).map_err(|e| {
            EmaError::backend(format!("cannot create run directory {}: {}", dir.display(), e))
        })?;
        Ok(dir)
    }

    fn cleanup(&self, dir: &Path) {
        if self.reentrant || self.keep_run_dirs {
            return;
        }
        if let Err(e) = fs::remove_dir_all(dir) {
            warn!("Failed to remove run directory {}: {}", dir.display(), e);
        }
    }

    fn execute(&self, scenario: &Scenario, dir: &Path) -> Result<OutcomeSeries, EmaError> {
        let payload = serde_json::to_vec(scenario.values())
            .map_err(|e| EmaError::backend(format!("cannot encode scenario: {}", e)))?;
        fs::write(dir.join(SCENARIO_FILE), &payload)
            .map_err(|e| EmaError::backend(format!("cannot write {}: {}", SCENARIO_FILE, e)))?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (name, value) in scenario.iter() {
            command.env(env_key(name), value.to_string());
        }

        debug!(
            "Launching {} for scenario {} in {}",
            self.program.display(),
            scenario.id(),
            dir.display()
        );

        let mut child = command.spawn().map_err(|e| {
            EmaError::backend(format!("failed to launch {}: {}", self.program.display(), e))
        })?;

        // Drain both pipes on their own threads so a chatty child cannot
        // block on a full pipe while we watch the deadline.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        if let Some(mut stdin) = child.stdin.take() {
            // Programs that never read stdin close the pipe early; that is fine.
            if let Err(e) = stdin.write_all(&payload) {
                debug!("stdin not consumed by {}: {}", self.program.display(), e);
            }
        }

        // On timeout the drain threads are left behind: a grandchild may
        // still hold the pipes open.
        let status = self.wait(&mut child)?;
        let stdout = finish_drain(stdout);
        let stderr = finish_drain(stderr);

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(EmaError::backend(format!(
                "{} exited with {}: {}",
                self.program.display(),
                status,
                stderr.trim()
            )));
        }

        parse_outcomes(&stdout)
    }

    fn wait(&self, child: &mut Child) -> Result<ExitStatus, EmaError> {
        let waited = |e: std::io::Error| {
            EmaError::backend(format!("failed waiting for {}: {}", self.program.display(), e))
        };

        let Some(limit) = self.timeout else {
            return child.wait().map_err(waited);
        };

        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait().map_err(waited)? {
                return Ok(status);
            }
            if started.elapsed() >= limit {
                warn!(
                    "Killing {} (pid {}) after {:.1}s",
                    self.program.display(),
                    child.id(),
                    limit.as_secs_f64()
                );
                if let Err(e) = child.kill() {
                    warn!("Failed to kill pid {}: {}", child.id(), e);
                }
                // Reap so no zombie is left behind.
                let _ = child.wait();
                return Err(EmaError::Timeout(limit.as_millis() as u64));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl SimulationBackend for CommandBackend {
    fn simulate(&self, scenario: &Scenario) -> Result<OutcomeSeries, EmaError> {
        let dir = self.prepare_run_dir()?;
        let result = self.execute(scenario, &dir);
        self.cleanup(&dir);
        result
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn finish_drain(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn resolve_program(program: PathBuf) -> PathBuf {
    if program.is_relative() && program.components().count() > 1 {
        if let Ok(cwd) = std::env::current_dir() {
            return cwd.join(program);
        }
    }
    program
}

/// Environment variable name for a scenario input.
pub fn env_key(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("EMA_{}", sanitized)
}

/// Parses program output into an outcome series.
///
/// Anything other than an object of numeric arrays is rejected.
pub fn parse_outcomes(stdout: &[u8]) -> Result<OutcomeSeries, EmaError> {
    let raw: BTreeMap<String, Vec<serde_json::Value>> = serde_json::from_slice(stdout)
        .map_err(|e| EmaError::backend(format!("output is not an outcome object: {}", e)))?;

    raw.into_iter()
        .map(|(name, values)| -> Result<(String, Vec<f64>), EmaError> {
            let numbers = values
                .iter()
                .enumerate()
                .map(|(idx, v)| {
                    v.as_f64().ok_or_else(|| {
                        EmaError::backend(format!(
                            "non-numeric value {} in '{}' at step {}",
                            v, name, idx
                        ))
                    })
                })
                .collect::<Result<Vec<f64>, EmaError>>()?;
            Ok((name, numbers))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ema_env_{}_{}", tag, Uuid::new_v4()))
    }

    #[test]
    fn test_env_key() {
        assert_eq!(env_key("prey_birth_rate"), "EMA_PREY_BIRTH_RATE");
        assert_eq!(env_key("a-b c"), "EMA_A_B_C");
    }

    #[test]
    fn test_relative_program_anchored() {
        let backend = CommandBackend::new("scripts/model.sh");
        assert!(backend.program().is_absolute());
        assert!(backend.program().ends_with("scripts/model.sh"));

        // Bare names stay on PATH lookup
        assert_eq!(CommandBackend::new("python3").program(), Path::new("python3"));
    }

    #[test]
    fn test_parse_outcomes() {
        let series = parse_outcomes(br#"{"TIME":[0,1],"prey":[50.0,49.5]}"#).unwrap();
        assert_eq!(series.get("TIME"), Some(&[0.0, 1.0][..]));
        assert_eq!(series.steps(), Some(2));
    }

    #[test]
    fn test_parse_outcomes_rejects_strings() {
        let err = parse_outcomes(br#"{"prey":[1.0,"many"]}"#).unwrap_err();
        assert!(matches!(err, EmaError::BackendExecution(_)));
        assert!(err.to_string().contains("step 1"));
    }

    #[test]
    fn test_parse_outcomes_rejects_garbage() {
        assert!(parse_outcomes(b"Traceback (most recent call last)").is_err());
    }

    #[test]
    fn test_missing_program_is_backend_error() {
        let backend = CommandBackend::new("/nonexistent/ema/model")
            .with_working_dir(scratch_dir("missing"));
        let err = backend.simulate(&Scenario::new(0, [("x", 1.0)])).unwrap_err();
        assert!(err.to_string().contains("failed to launch"));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_reads_env_and_writes_outcomes() {
        let dir = scratch_dir("env");
        let backend = CommandBackend::new("/bin/sh")
            .with_args(["-c", r#"echo "{\"x\": [$EMA_X, $EMA_X]}""#])
            .with_working_dir(&dir);

        let out = backend.simulate(&Scenario::new(0, [("x", 2.5)])).unwrap();
        assert_eq!(out.get("x"), Some(&[2.5, 2.5][..]));

        // Per-run directory removed, base directory left in place
        let leftovers = fs::read_dir(&dir).unwrap().count();
        assert_eq!(leftovers, 0);
        let _ = fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_sees_scenario_file() {
        let dir = scratch_dir("file");
        let backend = CommandBackend::new("/bin/sh")
            .with_args(["-c", r#"test -f scenario.json && echo '{"ok": [1]}'"#])
            .with_working_dir(&dir);

        let out = backend.simulate(&Scenario::new(0, [("x", 1.0)])).unwrap();
        assert_eq!(out.get("ok"), Some(&[1.0][..]));
        let _ = fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_failure_carries_stderr() {
        let dir = scratch_dir("fail");
        let backend = CommandBackend::new("/bin/sh")
            .with_args(["-c", "echo 'license server unreachable' >&2; exit 3"])
            .with_working_dir(&dir);

        let err = backend.simulate(&Scenario::new(0, [("x", 1.0)])).unwrap_err();
        assert!(err.to_string().contains("license server unreachable"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_child_killed_at_deadline() {
        let dir = scratch_dir("hung");
        let backend = CommandBackend::new("/bin/sh")
            .with_args(["-c", "echo $$ > ../child.pid; exec sleep 10"])
            .with_working_dir(&dir)
            .with_timeout(Duration::from_millis(300));

        let started = Instant::now();
        let err = backend.simulate(&Scenario::new(0, [("x", 1.0)])).unwrap_err();
        assert_eq!(err, EmaError::Timeout(300));
        assert!(started.elapsed() < Duration::from_secs(5));

        let pid = fs::read_to_string(dir.join("child.pid")).unwrap();
        let check = format!("kill -0 {}", pid.trim());
        let alive = Command::new("/bin/sh")
            .args(["-c", check.as_str()])
            .stderr(Stdio::null())
            .status()
            .unwrap();
        assert!(!alive.success(), "child {} still running", pid.trim());
        let _ = fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_leaves_fast_child_alone() {
        let dir = scratch_dir("fast");
        let backend = CommandBackend::new("/bin/sh")
            .with_args(["-c", r#"echo '{"ok": [1, 2]}'"#])
            .with_working_dir(&dir)
            .with_timeout(Duration::from_secs(5));

        let out = backend.simulate(&Scenario::new(0, [("x", 1.0)])).unwrap();
        assert_eq!(out.get("ok"), Some(&[1.0, 2.0][..]));
        let _ = fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[test]
    fn test_reentrant_shares_working_dir() {
        let dir = scratch_dir("shared");
        let backend = CommandBackend::new("/bin/sh")
            .with_args(["-c", r#"pwd > where.txt; echo '{"ok": [1]}'"#])
            .with_working_dir(&dir)
            .with_reentrant(true);

        backend.simulate(&Scenario::new(0, [("x", 1.0)])).unwrap();
        assert!(dir.join("where.txt").exists());
        assert!(dir.join(SCENARIO_FILE).exists());
        let _ = fs::remove_dir_all(&dir);
    }
}
