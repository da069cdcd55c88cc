pub mod events;
pub mod executor;
pub mod session;
pub mod state;

use crate::client::HttpTransport;
use crate::error::Result;
use crate::utils::Config;
use std::path::Path;
use std::sync::Arc;

pub use events::*;
pub use executor::{Outcome, SelfTestRunner};
pub use session::TestSession;
pub use state::*;

/// Run the self test against a real helper app, rendering progress on the
/// console, and optionally write reports to `output`.
pub async fn run_selftest(config: Config, output: Option<&Path>) -> Result<SelfTestReport> {
    let helper_url = config.helper_base()?;
    let server_url = config.server_base()?;
    let player_id = config.player_id.clone();

    let transport = Arc::new(HttpTransport::new(&server_url)?);
    let runner = SelfTestRunner::new(transport, config, &helper_url, &player_id);

    let listener = tokio::spawn(ConsoleEventListener::listen(runner.subscribe()));
    let report = runner.run().await;
    // The runner owned the only sender, so the listener drains and stops
    if let Err(e) = listener.await {
        log::warn!("Console listener failed: {}", e);
    }

    if let Some(dir) = output {
        crate::report::write_reports(&report, dir)?;
    }

    Ok(report)
}
