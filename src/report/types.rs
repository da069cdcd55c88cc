use crate::runner::state::{SelfTestReport, SelfTestSummary, StepStateReport};
use serde::{Deserialize, Serialize};

/// Self test results for report generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResults {
    pub session_id: String,
    pub helper_url: String,
    pub player_id: String,
    pub steps: Vec<StepStateReport>,
    pub summary: SelfTestSummary,
    pub generated_at: String,
}

impl TestResults {
    pub fn from_report(report: &SelfTestReport) -> Self {
        Self {
            session_id: report.session_id.clone(),
            helper_url: report.helper_url.clone(),
            player_id: report.player_id.clone(),
            steps: report.steps.clone(),
            summary: report.summary.clone(),
            generated_at: chrono::Local::now().to_rfc3339(),
        }
    }
}
