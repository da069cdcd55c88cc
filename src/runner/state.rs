use serde::{Deserialize, Serialize};
use std::time::Instant;

/// The five checks, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    Connect,
    Metadata,
    Login,
    StreamLocal,
    StreamPlayer,
}

impl Step {
    pub const ALL: [Step; 5] = [
        Step::Connect,
        Step::Metadata,
        Step::Login,
        Step::StreamLocal,
        Step::StreamPlayer,
    ];

    /// Row on the progress display. Login is shown above metadata although it
    /// runs after it.
    pub fn row(self) -> usize {
        match self {
            Step::Connect => 0,
            Step::Login => 1,
            Step::Metadata => 2,
            Step::StreamLocal => 3,
            Step::StreamPlayer => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Step::Connect => "Helper app",
            Step::Metadata => "Metadata",
            Step::Login => "Login",
            Step::StreamLocal => "Streaming from Spotify",
            Step::StreamPlayer => "Streaming to player",
        }
    }
}

/// Step execution status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Passed,
    Failed { reason: String },
    Skipped { reason: String },
    /// Session ended during this step without a verdict
    Aborted,
}

impl StepStatus {
    /// Short verdict shown next to the progress bar
    pub fn verdict(&self) -> &'static str {
        match self {
            StepStatus::Passed => "PASS",
            StepStatus::Failed { .. } => "FAIL",
            _ => "",
        }
    }
}

/// State for a single step
#[derive(Debug, Clone)]
pub struct StepState {
    pub step: Step,
    pub status: StepStatus,
    /// Last text shown on the step's progress bar
    pub detail: Option<String>,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    pub duration_ms: Option<u64>,
}

impl StepState {
    pub fn new(step: Step) -> Self {
        Self {
            step,
            status: StepStatus::Pending,
            detail: None,
            started_at: None,
            finished_at: None,
            duration_ms: None,
        }
    }

    pub fn start(&mut self) {
        self.status = StepStatus::Running;
        self.started_at = Some(Instant::now());
    }

    pub fn pass(&mut self) {
        self.finish(StepStatus::Passed);
    }

    pub fn fail(&mut self, reason: String) {
        self.finish(StepStatus::Failed { reason });
    }

    pub fn skip(&mut self, reason: String) {
        self.finish(StepStatus::Skipped { reason });
    }

    pub fn abort(&mut self) {
        self.finish(StepStatus::Aborted);
    }

    fn finish(&mut self, status: StepStatus) {
        self.status = status;
        self.finished_at = Some(Instant::now());
        if let Some(start) = self.started_at {
            self.duration_ms = Some(start.elapsed().as_millis() as u64);
        }
    }

    /// Serialize state for reporting (without Instant which isn't serializable)
    pub fn to_report(&self) -> StepStateReport {
        StepStateReport {
            step: self.step,
            label: self.step.label().to_string(),
            status: self.status.clone(),
            detail: self.detail.clone(),
            duration_ms: self.duration_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepStateReport {
    pub step: Step,
    pub label: String,
    pub status: StepStatus,
    pub detail: Option<String>,
    pub duration_ms: Option<u64>,
}

/// State of a whole self test run
#[derive(Debug, Clone)]
pub struct SelfTestState {
    pub session_id: String,
    pub helper_url: String,
    pub player_id: String,
    pub steps: Vec<StepState>,
    pub message: Option<String>,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
}

impl SelfTestState {
    pub fn new(session_id: &str, helper_url: &str, player_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            helper_url: helper_url.to_string(),
            player_id: player_id.to_string(),
            steps: Step::ALL.iter().map(|s| StepState::new(*s)).collect(),
            message: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    pub fn step_mut(&mut self, step: Step) -> &mut StepState {
        let index = Step::ALL
            .iter()
            .position(|s| *s == step)
            .unwrap_or_default();
        &mut self.steps[index]
    }

    pub fn step(&self, step: Step) -> &StepState {
        let index = Step::ALL
            .iter()
            .position(|s| *s == step)
            .unwrap_or_default();
        &self.steps[index]
    }

    /// Close the run. A step still running is marked aborted.
    pub fn finish(&mut self, message: Option<String>) {
        for step in &mut self.steps {
            if step.status == StepStatus::Running {
                step.abort();
            }
        }
        self.message = message;
        self.finished_at = Some(Instant::now());
    }

    pub fn summary(&self) -> SelfTestSummary {
        let mut passed = 0;
        let mut failed = 0;
        let mut skipped = 0;
        let mut aborted = 0;

        for step in &self.steps {
            match step.status {
                StepStatus::Passed => passed += 1,
                StepStatus::Failed { .. } => failed += 1,
                StepStatus::Skipped { .. } => skipped += 1,
                StepStatus::Aborted => aborted += 1,
                _ => {}
            }
        }

        let total_duration_ms = self.started_at.map(|start| {
            self.finished_at
                .unwrap_or_else(Instant::now)
                .duration_since(start)
                .as_millis() as u64
        });

        SelfTestSummary {
            session_id: self.session_id.clone(),
            total_steps: self.steps.len() as u32,
            passed,
            failed,
            skipped,
            aborted,
            message: self.message.clone(),
            total_duration_ms,
        }
    }

    /// Serialize state for reporting
    pub fn to_report(&self) -> SelfTestReport {
        SelfTestReport {
            session_id: self.session_id.clone(),
            helper_url: self.helper_url.clone(),
            player_id: self.player_id.clone(),
            steps: self.steps.iter().map(|s| s.to_report()).collect(),
            summary: self.summary(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelfTestSummary {
    pub session_id: String,
    pub total_steps: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub aborted: u32,
    pub message: Option<String>,
    pub total_duration_ms: Option<u64>,
}

impl SelfTestSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.aborted == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfTestReport {
    pub session_id: String,
    pub helper_url: String,
    pub player_id: String,
    pub steps: Vec<StepStateReport>,
    pub summary: SelfTestSummary,
}

impl SelfTestReport {
    pub fn step(&self, step: Step) -> Option<&StepStateReport> {
        self.steps.iter().find(|s| s.step == step)
    }
}
