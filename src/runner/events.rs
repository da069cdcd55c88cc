use super::state::{SelfTestSummary, Step, StepStatus};
use tokio::sync::broadcast;

/// Title shown while the test runs
pub const TITLE_RUNNING: &str = "Self Test - Running";
/// Title shown once the test ended, whatever the outcome
pub const TITLE_COMPLETE: &str = "Self Test - Complete";

/// Self test events for real-time updates
#[derive(Debug, Clone)]
pub enum SelfTestEvent {
    SessionStarted {
        session_id: String,
        helper_url: String,
        player_id: String,
    },

    StepStarted {
        step: Step,
    },
    /// New text for a step's progress bar, with a new fill level when given
    StepProgress {
        step: Step,
        fraction: Option<f64>,
        text: String,
    },
    StepFinished {
        step: Step,
        status: StepStatus,
    },

    SessionFinished {
        title: String,
        message: Option<String>,
        summary: SelfTestSummary,
    },
}

/// Event emitter for broadcasting self test events
pub struct EventEmitter {
    sender: broadcast::Sender<SelfTestEvent>,
}

impl EventEmitter {
    pub fn emit(&self, event: SelfTestEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SelfTestEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }
}

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Progress bar resolution
const BAR_LENGTH: u64 = 1000;

/// Console event listener drawing one progress bar per step
pub struct ConsoleEventListener;

impl ConsoleEventListener {
    pub async fn listen(mut receiver: broadcast::Receiver<SelfTestEvent>) {
        use colored::Colorize;
        use indicatif::ProgressDrawTarget;
        use std::io::IsTerminal;

        let interactive = std::io::stdout().is_terminal();
        let multi = if interactive {
            MultiProgress::new()
        } else {
            // Piped output: no escape codes, verdicts are printed as plain lines
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        let style = ProgressStyle::with_template("{prefix:>4} [{bar:40.cyan/blue}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");

        let mut bars: Vec<ProgressBar> = Vec::new();

        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    log::debug!("Console listener skipped {} events", missed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match event {
                SelfTestEvent::SessionStarted {
                    session_id,
                    helper_url,
                    player_id,
                } => {
                    println!("\n{} {}", "▶".green().bold(), TITLE_RUNNING.bold());
                    println!("  Session: {}", session_id.dimmed());
                    println!("  Helper: {}", helper_url.cyan());
                    if player_id.is_empty() {
                        println!("  Player: {}", "none".yellow());
                    } else {
                        println!("  Player: {}", player_id.cyan());
                    }

                    // Rows follow the display order, not the execution order
                    let mut rows: Vec<Step> = Step::ALL.to_vec();
                    rows.sort_by_key(|s| s.row());
                    bars = rows
                        .into_iter()
                        .map(|step| {
                            let pb = multi.add(ProgressBar::new(BAR_LENGTH));
                            pb.set_style(style.clone());
                            pb.set_message(step.label().dimmed().to_string());
                            pb
                        })
                        .collect();
                }

                SelfTestEvent::StepStarted { step } => {
                    log::info!("Starting step: {}", step.label());
                }

                SelfTestEvent::StepProgress {
                    step,
                    fraction,
                    text,
                } => {
                    if let Some(pb) = bars.get(step.row()) {
                        if let Some(fraction) = fraction {
                            let clamped = fraction.clamp(0.0, 1.0);
                            pb.set_position((clamped * BAR_LENGTH as f64).round() as u64);
                        }
                        pb.set_message(text);
                    }
                }

                SelfTestEvent::StepFinished { step, status } => {
                    let verdict = match status.verdict() {
                        "PASS" => "PASS".green().bold(),
                        "FAIL" => "FAIL".red().bold(),
                        other => other.normal(),
                    };
                    if let Some(pb) = bars.get(step.row()) {
                        pb.set_prefix(verdict.to_string());
                        if !interactive {
                            let detail = match &status {
                                StepStatus::Failed { reason } | StepStatus::Skipped { reason } => {
                                    reason.clone()
                                }
                                _ => String::new(),
                            };
                            println!("{:>4} {} {}", verdict, step.label(), detail.dimmed());
                        }
                    }
                }

                SelfTestEvent::SessionFinished {
                    title,
                    message,
                    summary,
                } => {
                    for pb in bars.drain(..) {
                        pb.abandon();
                    }

                    println!("\n{} {}", "■".blue().bold(), title.bold());
                    if let Some(message) = message {
                        if summary.is_success() {
                            println!("  {}", message.green());
                        } else {
                            println!("  {}", message.yellow());
                        }
                    }
                    println!(
                        "  {} passed, {} failed, {} skipped",
                        summary.passed.to_string().green(),
                        summary.failed.to_string().red(),
                        summary.skipped.to_string().yellow()
                    );
                    if let Some(duration) = summary.total_duration_ms {
                        println!("  Duration: {}ms", duration);
                    }
                }
            }
        }
    }
}
