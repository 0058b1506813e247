//! Tourmate CLI - drive the sync core from a terminal.
//!
//! Works fully offline: without a configured backend every command runs
//! against the local store and an in-process backend.

mod app;
mod commands;
mod config;

use std::io;
use std::path::Path;

use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::App;
use config::Config;

/// Subdirectory of the data dir for rolling log files
const LOG_DIR: &str = "logs";

/// Log file name prefix; the appender adds the date
const LOG_FILE: &str = "tourmate.log";

/// Initialize the tracing subscriber for logging.
///
/// `RUST_LOG` controls the level (default `warn`). Events go to stderr and,
/// when a data directory is known, to a daily rolling file. The returned
/// guard must live until exit so buffered lines are flushed.
fn init_tracing(data_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match data_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir.join(LOG_DIR), LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = Config::load()?;
    let _log_guard = init_tracing(config.data_dir().ok().as_deref());

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = commands::parse(&args)?;
    if command == commands::Command::Help {
        println!("{}", commands::USAGE);
        return Ok(());
    }

    info!(?command, "Tourmate CLI starting");
    let mut app = App::new(config).await?;
    let result = commands::run(&mut app, command).await;
    app.core.shutdown().await;

    result
}
