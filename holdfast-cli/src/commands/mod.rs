//! CLI command implementations.

pub mod countdown;
pub mod counter;
pub mod todos;

pub use countdown::{run_countdown, CountdownOptions};
pub use counter::run_counter;
pub use todos::run_todos;

use anyhow::{Context, Result};
use holdfast::{Diagnostic, Severity, StoreConfig};
use std::path::Path;

/// Load the store configuration, falling back to defaults if the file is absent
pub fn load_config(path: &Path) -> Result<StoreConfig> {
    if !path.exists() {
        tracing::debug!("No config at {:?}; using defaults", path);
        return Ok(StoreConfig::default());
    }
    tracing::info!("Loading config from {:?}", path);
    StoreConfig::from_file(path).context("Failed to load configuration")
}

/// Print recorded diagnostics after a demo run
fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        let label = match diagnostic.severity() {
            Severity::Info => "info",
            Severity::Warning => "warning",
        };
        println!("{label}: {diagnostic}");
    }
}
