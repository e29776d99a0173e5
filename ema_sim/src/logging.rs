//! Logging setup.
//!
//! Libraries in this workspace only emit `tracing` events. Installing a
//! subscriber is an explicit step taken by the binary with a `LogConfig`.

use ema_env::EmaError;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// How much the process should log, and where.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Debug-level output
    pub verbose: bool,

    /// Warnings and errors only (machine-readable stdout modes)
    pub quiet: bool,

    /// Explicit filter directive; `RUST_LOG` wins over both flags when set
    pub filter: Option<String>,
}

impl LogConfig {
    /// Filter directive derived from the flags.
    pub fn directive(&self) -> String {
        if let Some(filter) = &self.filter {
            return filter.clone();
        }
        let level = if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        };
        level.to_string()
    }

    /// Installs a global fmt subscriber writing to stderr.
    pub fn init(&self) -> Result<(), EmaError> {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(self.directive()))
            .map_err(|e| EmaError::config(format!("invalid log filter: {}", e)))?;

        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| EmaError::config(format!("failed to set tracing subscriber: {}", e)))
    }
}
