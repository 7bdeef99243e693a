// SPDX-License-Identifier: Apache-2.0

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::{EnvFilter, Layer, Registry};

use logscan::init::BoxError;
use logscan::init::agent::Agent;
use logscan::init::args::ScanRun;
use logscan::init::wait;

/// Upper bound on shutdown once a signal arrived
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "logscan", bin_name = "logscan")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Format of logscan's own logs, written to stderr
    #[arg(
        value_enum,
        long,
        global = true,
        env = "LOGSCAN_LOG_FORMAT",
        default_value = "text"
    )]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Tail log files and print their lines to stdout as JSON
    Start(Box<ScanRun>),

    /// Print the version and exit
    Version,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let run = match cli.command {
        Command::Version => {
            println!("{}", version());
            return ExitCode::SUCCESS;
        }
        Command::Start(run) => run,
    };

    // Dropping the guard flushes buffered log lines, keep it until exit
    let _guard = match init_logging(cli.log_format) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ERROR: unable to set up logging: {e}");
            return ExitCode::from(1);
        }
    };

    match start(run) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = e, "logscan exited with an error");
            ExitCode::from(1)
        }
    }
}

#[tokio::main]
async fn start(run: Box<ScanRun>) -> Result<(), BoxError> {
    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();
    tasks.spawn(Agent::new(run).run(cancel.clone()));

    tokio::select! {
        signal = shutdown_signal() => {
            info!(signal, "Received shutdown signal");
            cancel.cancel();
        }
        res = wait::wait_for_any_task(&mut tasks) => {
            res?;
            warn!("Agent stopped on its own");
        }
    }

    wait::wait_for_tasks_with_timeout(&mut tasks, SHUTDOWN_TIMEOUT).await
}

fn init_logging(format: LogFormat) -> Result<WorkerGuard, BoxError> {
    LogTracer::init()?;

    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    let subscriber = Registry::default()
        .with(filter)
        .with(output_layer(format, writer));
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(guard)
}

type Filtered = Layered<EnvFilter, Registry>;

fn output_layer(format: LogFormat, writer: NonBlocking) -> Box<dyn Layer<Filtered> + Send + Sync> {
    match format {
        LogFormat::Json => {
            let name = format!("{}-{}", env!("CARGO_PKG_NAME"), version());
            JsonStorageLayer
                .and_then(BunyanFormattingLayer::new(name, writer))
                .boxed()
        }
        LogFormat::Text => {
            use std::io::IsTerminal;

            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(std::io::stderr().is_terminal())
                .with_target(false)
                .compact()
                .boxed()
        }
    }
}

fn version() -> String {
    let build = option_env!("BUILD_SHORT_SHA").unwrap_or("dev");
    format!("{}-{build}", env!("CARGO_PKG_VERSION"))
}

/// Resolves with the name of the first shutdown signal received.
#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Unable to listen for SIGTERM, only ctrl-c stops logscan");
            return ctrl_c().await;
        }
    };

    tokio::select! {
        _ = term.recv() => "SIGTERM",
        name = ctrl_c() => name,
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Unable to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
