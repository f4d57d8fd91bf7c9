use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use vitalwatch::config::{Config, Mode};
use vitalwatch::engine::DashboardView;
use vitalwatch::error::ConfigError;
use vitalwatch::events::Metric;
use vitalwatch::location::Location;
use vitalwatch::session::Session;
use vitalwatch::store;

/// Command-line arguments for the vitals dashboard
#[derive(Parser)]
#[command(
    name = "vitalwatch",
    about = "Real-time vitals and air quality dashboard with threshold alerts",
    long_about = "Merges readings from a live insert subscription, a periodic poll of the \
                  backend store and a local generator into one rolling window, and raises \
                  alerts when heart rate, SpO2, air quality or temperature cross thresholds. \
                  Type 'clear' to clear alerts, 'status' to print the dashboard, 'quit' to exit."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// Operating mode
    #[arg(short, long, value_enum, help = "Operating mode (overrides the config file)")]
    mode: Option<Mode>,

    /// User whose readings are shown and persisted
    #[arg(
        short,
        long,
        value_name = "ID",
        help = "User id (defaults to VITALWATCH_USER_ID)"
    )]
    user_id: Option<String>,
}

impl Cli {
    /// Validate the CLI arguments
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // Missing files fall back to defaults in load_config
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        if let Some(ref user_id) = self.user_id {
            if user_id.trim().is_empty() {
                return Err("User id must not be empty".to_string());
            }
        }

        Ok(())
    }

    /// User id from the flag, else from the environment
    fn resolved_user_id(&self) -> Option<String> {
        self.user_id
            .as_ref()
            .map(|id| id.trim().to_string())
            .or_else(store::user_id_from_env)
    }
}

/// Load configuration from file or use defaults
///
/// An unreadable file falls back to defaults with a warning. A file that
/// parses but fails validation is an error.
fn load_config(config_path: Option<&Path>) -> Result<Config, ConfigError> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            match Config::from_file(path) {
                Ok(config) => Ok(config),
                Err(ConfigError::ReadError(e)) => {
                    warn!("Configuration file unreadable ({}), using defaults", e);
                    Ok(Config::default())
                }
                Err(e) => Err(e),
            }
        }
        None => {
            info!("Using default configuration");
            Ok(Config::default())
        }
    }
}

/// One-screen text rendering of the dashboard
fn render_status(view: &DashboardView, location: Option<Location>) -> String {
    let mut lines = Vec::new();

    let values: Vec<String> = Metric::ALL
        .iter()
        .map(|metric| {
            let value = view.display_value(*metric);
            if value == vitalwatch::engine::NO_DATA {
                format!("{} {}", metric.label(), value)
            } else {
                format!("{} {} {}", metric.label(), value, metric.unit())
            }
        })
        .collect();
    let mut header = values.join(" | ");
    if let Some(category) = view.air_quality_category() {
        header.push_str(&format!(" | Air: {}", category));
    }
    lines.push(header);

    let location = match location {
        Some(location) => location.to_string(),
        None => "Loading...".to_string(),
    };
    lines.push(format!(
        "Location: {} | Buffer {}/{}",
        location,
        view.readings.len(),
        view.buffer_capacity
    ));

    if view.alerts.is_empty() {
        lines.push("No alerts".to_string());
    } else {
        for alert in &view.alerts {
            lines.push(format!("  [{:?}] {}", alert.severity, alert.message));
        }
    }

    lines.join("\n")
}

async fn run(config: Config, mode: Mode, user_id: Option<String>) -> anyhow::Result<()> {
    let session = Session::start(&config, mode, user_id).context("Failed to start session")?;
    let cancel = session.cancellation_token();

    let signal_token = cancel.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        signal_token.cancel();
    })
    .context("Error setting SIGINT handler")?;

    info!("vitalwatch is running. Press Ctrl+C to stop.");

    let mut status_ticker =
        tokio::time::interval(Duration::from_secs(config.display.status_interval_secs));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = status_ticker.tick() => {
                println!("{}\n", render_status(&session.handle().view(), session.location()));
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(command)) => match command.trim() {
                    "clear" => {
                        if session.handle().clear_alerts().await {
                            println!("Alerts cleared");
                        }
                    }
                    "status" => {
                        println!("{}\n", render_status(&session.handle().view(), session.location()));
                    }
                    "quit" | "exit" => cancel.cancel(),
                    "" => {}
                    other => println!("Unknown command '{}' (try clear, status, quit)", other),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    let stats = session.shutdown().await;
    info!(
        "Session summary: {} readings accepted, {} alerts, {} persisted",
        stats.accepted, stats.alerts_emitted, stats.persistence_written
    );
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    // Load .env before the logger so RUST_LOG from the file applies
    let dotenv = dotenvy::dotenv();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    if let Err(e) = dotenv {
        if !e.not_found() {
            warn!("Failed to load .env file: {}", e);
        }
    }

    info!("Starting vitalwatch");

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    let mode = config.resolve_mode(cli.mode);
    let user_id = cli.resolved_user_id();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(run(config, mode, user_id));
    // Stdin reads run on a blocking thread that never returns on its own
    runtime.shutdown_timeout(Duration::from_secs(1));

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }

    info!("vitalwatch shutdown complete");
}
