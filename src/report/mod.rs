pub mod json;
pub mod junit;
pub mod types;

use crate::runner::state::SelfTestReport;
use anyhow::Result;
use std::path::Path;

/// Generate report from saved self test results
pub fn generate_report(results_path: &Path, format: &str, output: Option<&Path>) -> Result<()> {
    let test_results = json::load(results_path)?;

    let (label, text) = match format {
        "json" => ("JSON", json::render(&test_results)?),
        "junit" => ("JUnit", junit::generate_junit_xml(&test_results)?),
        _ => anyhow::bail!("Unknown format: {}", format),
    };

    match output {
        Some(path) => {
            std::fs::write(path, text)?;
            println!("{} report saved to: {}", label, path.display());
        }
        None => println!("{}", text),
    }
    Ok(())
}

/// Write `results.json` and `junit.xml` for a finished run into `output_dir`
pub fn write_reports(report: &SelfTestReport, output_dir: &Path) -> crate::error::Result<()> {
    std::fs::create_dir_all(output_dir)?;
    let results = types::TestResults::from_report(report);

    let json_path = json::write_report(&results, output_dir)?;
    println!("JSON report saved to: {}", json_path.display());

    junit::write_report(&results, output_dir)
        .map_err(|e| crate::error::SelfTestError::Report(e.to_string()))
}
