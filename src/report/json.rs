//! `results.json`: the saved form of a run, read back by the `report` command.

use super::types::TestResults;
use crate::error::Result;
use std::path::{Path, PathBuf};

pub const RESULTS_FILE: &str = "results.json";

pub fn render(results: &TestResults) -> Result<String> {
    Ok(serde_json::to_string_pretty(results)?)
}

/// Read results saved by an earlier run
pub fn load(path: &Path) -> Result<TestResults> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Save `results` as `results.json` in `output_dir` and return its path
pub fn write_report(results: &TestResults, output_dir: &Path) -> Result<PathBuf> {
    let path = output_dir.join(RESULTS_FILE);
    std::fs::write(&path, render(results)?)?;
    log::debug!("Wrote {} steps to {}", results.steps.len(), path.display());
    Ok(path)
}
