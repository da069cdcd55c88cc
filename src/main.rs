use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;

use spotify_selftest::client::{HelperTransport, HttpTransport};
use spotify_selftest::protocol::{LoginState, StatusResponse};
use spotify_selftest::utils::config::{normalize_base_url, Config};
use spotify_selftest::{report, runner};

#[derive(Parser)]
#[command(name = "spotify-selftest")]
#[command(version)]
#[command(about = "Self test for the Spotify helper app and its players", long_about = None)]
struct Cli {
    /// Show debug logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the self test
    Run {
        /// Base URL of the helper app (e.g. http://127.0.0.1:24879/)
        helper: Option<String>,

        /// Player to stream to; the player step is skipped without one
        #[arg(short, long)]
        player: Option<String>,

        /// Base URL of the playback server
        #[arg(short, long)]
        server: Option<String>,

        /// YAML config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write results.json and junit.xml
        #[arg(long, default_value = "false")]
        report: bool,

        /// Output directory for reports
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,
    },

    /// Show the helper app's login status
    Status {
        /// Base URL of the helper app
        helper: String,

        /// Seconds to wait for an answer
        #[arg(short, long, default_value = "5")]
        timeout: u64,
    },

    /// Generate report from saved self test results
    Report {
        /// Path to results.json
        results: PathBuf,

        /// Output format (json, junit)
        #[arg(short, long, default_value = "junit")]
        format: String,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Commands::Run {
            helper,
            player,
            server,
            config,
            report,
            output,
        } => {
            let mut settings = match config {
                Some(path) => Config::load(&path)?,
                None => Config::default(),
            };
            if helper.is_some() {
                settings.helper_url = helper;
            }
            if let Some(player) = player {
                settings.player_id = player;
            }
            if let Some(server) = server {
                settings.server_url = server;
            }

            let output_dir = if report { Some(output.as_path()) } else { None };

            let result = tokio::select! {
                result = runner::run_selftest(settings, output_dir) => result?,
                _ = tokio::signal::ctrl_c() => {
                    println!("\n{} Self test interrupted", "⏹".yellow());
                    std::process::exit(130);
                }
            };

            if !result.summary.is_success() {
                std::process::exit(1);
            }
        }

        Commands::Status { helper, timeout } => {
            let base = normalize_base_url(&helper)?;
            let transport = HttpTransport::new(&Config::default().server_base()?)?;
            let url = format!("{}status.json", base);

            let reply =
                tokio::time::timeout(Duration::from_secs(timeout), transport.fetch_json(&url))
                    .await
                    .ok()
                    .flatten();

            let Some(value) = reply else {
                println!("{} Helper app not reachable at {}", "✗".red(), base.cyan());
                std::process::exit(1);
            };

            println!("{} Helper app running at {}", "✓".green(), base.cyan());
            match StatusResponse::from_value(value).login_state() {
                LoginState::LoggedIn => println!("  Login: {}", "logged in".green()),
                LoginState::NotLoggedIn { error } => {
                    println!("  Login: {}", "not logged in".red());
                    if let Some(error) = error {
                        println!("  Error: {}", error);
                    }
                }
            }
        }

        Commands::Report {
            results,
            format,
            output,
        } => {
            println!(
                "{} Generating {} report from: {}",
                "📊".to_string().blue(),
                format.cyan(),
                results.display()
            );
            report::generate_report(&results, &format, output.as_deref())?;
        }
    }

    Ok(())
}
