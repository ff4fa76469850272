use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Console subscriber. `RUST_LOG` wins over the verbosity flag.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Per-run log file mirroring the operator-facing messages that also go to
/// the console, so a finished workspace documents its own run.
pub struct RunLog {
    file: File,
}

impl RunLog {
    pub fn create(path: &Path) -> Result<RunLog> {
        let file = File::create(path)
            .with_context(|| format!("create run log {}", path.display()))?;
        Ok(RunLog { file })
    }

    /// Record a message in the log file and on the console at info level.
    pub fn note(&mut self, message: &str) -> Result<()> {
        info!("{message}");
        writeln!(self.file, "{message}")?;
        Ok(())
    }

    pub fn warn(&mut self, message: &str) -> Result<()> {
        warn!("{message}");
        writeln!(self.file, "{message}")?;
        Ok(())
    }
}
