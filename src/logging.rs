//! Diagnostic logging setup.
//!
//! Logs go to a timestamped file rather than the terminal so the interactive
//! prompt stays clean. Filtering follows `RUST_LOG` when set.

use chrono::Local;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "bavard=debug";

/// Initializes the global subscriber writing to `<log_dir>/bavard_<ts>.log`
/// and returns the log file path.
pub fn init(log_dir: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    fs::create_dir_all(log_dir)?;
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let log_path = log_dir.join(format!("bavard_{timestamp}.log"));
    let file = Arc::new(File::create(&log_path)?);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .with_writer(file)
        .with_ansi(false)
        .init();

    Ok(log_path)
}
