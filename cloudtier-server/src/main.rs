//! # cloudtierd
//!
//! Storage-tiering daemon. Demotes cold files of the governed tree to the
//! remote tier and promotes them back when they are needed again.
//!
//! Startup is strictly ordered: configuration, logging, queues, storage
//! backend, then worker threads. Any failure before the workers run exits
//! non-zero with everything acquired so far released. SIGINT and SIGTERM
//! trigger a graceful shutdown.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cloudtier_config::{Config, ConfigLoad, ConfigLoader, ConfigWarnings};
use cloudtier_core::{
    backend::LocalDirBackend, layout::TierLayout, orchestration::Daemon,
    policy::AccessAgePolicy,
};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "cloudtierd", version)]
#[command(about = "Storage-tiering daemon for a local and a remote tier")]
struct Cli {
    /// Path to the TOML configuration file
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = ConfigLoader::new(&cli.config).load().with_context(|| {
        format!("failed to load configuration from {}", cli.config.display())
    });
    let ConfigLoad { config, warnings } = match loaded {
        Ok(load) => load,
        Err(err) => {
            eprintln!("cloudtierd: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    if cli.check {
        for warning in &warnings.items {
            eprintln!("warning: {}", warning.message);
        }
        println!("configuration OK: {}", config.metadata.source.display());
        return ExitCode::SUCCESS;
    }

    init_tracing(&config);
    report_warnings(&config, &warnings);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(
                target: "cloudtier::startup",
                error = %format!("{err:#}"),
                "cloudtierd exiting"
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(config: &Config) {
    let fallback = config.logging.filter.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn report_warnings(config: &Config, warnings: &ConfigWarnings) {
    info!(
        target: "cloudtier::startup",
        config = %config.metadata.source.display(),
        env_overrides = ?config.metadata.env_overrides,
        "configuration loaded"
    );
    for warning in warnings.iter() {
        match &warning.hint {
            Some(hint) => warn!(
                target: "cloudtier::startup",
                message = %warning.message,
                hint = %hint,
                "configuration warning"
            ),
            None => warn!(
                target: "cloudtier::startup",
                message = %warning.message,
                "configuration warning"
            ),
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let tiering = config.tiering;
    let layout =
        TierLayout::new(&tiering.scan.root, &tiering.storage.remote_root);
    let backend = Arc::new(LocalDirBackend::new(layout.clone()));
    let policy = Arc::new(AccessAgePolicy::new(tiering.policy, layout));

    info!(
        target: "cloudtier::startup",
        scan_root = %tiering.scan.root.display(),
        remote_root = %tiering.storage.remote_root.display(),
        segment_dir = %tiering.queues.segment_dir.display(),
        path_max = tiering.queues.path_max,
        promote_into = ?tiering.scan.promote_into,
        "starting cloudtierd"
    );

    let shutdown = shutdown_signal()?;
    let daemon = Daemon::new(tiering, backend, policy);
    let topology = daemon
        .init_data()
        .context("failed to initialise queues and storage backend")?;
    let mut running = daemon
        .start_routines(topology)
        .context("failed to start worker routines")?;

    let supervised = running.supervise(shutdown).await;
    running.shutdown();
    supervised.context("worker supervision aborted")
}

/// Completes on SIGINT or SIGTERM. Handlers are installed before the first
/// worker starts so an early signal still shuts down gracefully.
fn shutdown_signal() -> anyhow::Result<impl Future<Output = ()>> {
    let mut interrupt = signal(SignalKind::interrupt())
        .context("unable to listen for SIGINT")?;
    let mut terminate = signal(SignalKind::terminate())
        .context("unable to listen for SIGTERM")?;

    Ok(async move {
        let received = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        };
        info!(
            target: "cloudtier::supervisor",
            signal = received,
            "received signal"
        );
    })
}
