//! `cloudtierctl`: talks to a running (or stopped) `cloudtierd` through the
//! named download-primary queue.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cloudtier_config::{Config, ConfigLoader};
use cloudtier_core::config::QueueConfig;
use cloudtier_core::layout::TierLayout;
use cloudtier_core::orchestration::QueueSlot;
use cloudtier_core::queue::{PathEntry, Queue};

#[derive(Parser, Debug)]
#[command(name = "cloudtierctl", version)]
#[command(
    about = "Request on-demand promotion and inspect the cloudtier shared queue"
)]
struct Cli {
    /// Path to the daemon's TOML configuration file
    #[arg(short, long, env = "CLOUDTIER_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Queue files for promotion ahead of the scanner
    Promote {
        /// Files inside the governed tree
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Give up when the queue stays full this long
        #[arg(long, default_value_t = 5_000)]
        timeout_ms: u64,
    },
    /// Show depth and capacity of the download-primary queue
    Status {
        /// Print a JSON object instead of text
        #[arg(long)]
        json: bool,
    },
    /// Delete the download-primary segment (the daemon must be stopped)
    Unlink,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ConfigLoader::new(&cli.config)
        .load()
        .with_context(|| {
            format!(
                "failed to load configuration from {}",
                cli.config.display()
            )
        })?
        .config;

    match cli.command {
        Command::Promote { paths, timeout_ms } => {
            promote(&config, &paths, Duration::from_millis(timeout_ms))
        }
        Command::Status { json } => status(&config.tiering.queues, json),
        Command::Unlink => unlink(&config.tiering.queues),
    }
}

fn attach(queues: &QueueConfig) -> anyhow::Result<Queue> {
    Queue::create(QueueSlot::DownloadPrimary.options(queues)).with_context(|| {
        format!(
            "failed to attach to queue {} in {}",
            queues.download_primary_name,
            queues.segment_dir.display()
        )
    })
}

fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .context("failed to resolve working directory")?;
    Ok(cwd.join(path))
}

fn promote(
    config: &Config,
    paths: &[PathBuf],
    timeout: Duration,
) -> anyhow::Result<()> {
    let tiering = &config.tiering;
    let layout =
        TierLayout::new(&tiering.scan.root, &tiering.storage.remote_root);

    let mut entries = Vec::with_capacity(paths.len());
    for path in paths {
        let path = absolute(path)?;
        let remote = layout.remote_path(&path)?;
        debug!(
            target: "cloudtier::queue",
            local = %path.display(),
            remote = %remote.display(),
            "promotion requested"
        );
        entries.push(PathEntry::new(&path)?);
    }

    let queue = attach(&tiering.queues)?;
    let mut queued = 0usize;
    let mut result = Ok(());
    for entry in &entries {
        if let Err(err) = queue.push_timeout(entry, timeout) {
            result =
                Err(err).with_context(|| format!("failed to queue {entry}"));
            break;
        }
        queued += 1;
        println!("queued {entry}");
    }
    queue.destroy();

    if queued < entries.len() {
        eprintln!("{} of {} paths queued", queued, entries.len());
    }
    result
}

fn status(queues: &QueueConfig, as_json: bool) -> anyhow::Result<()> {
    let segment = queues.segment_dir.join(&queues.download_primary_name);
    if !segment.exists() {
        if as_json {
            let report = json!({
                "name": queues.download_primary_name,
                "created": false,
            });
            println!("{report}");
        } else {
            println!("{}: not created", queues.download_primary_name);
        }
        return Ok(());
    }

    let queue = attach(queues)?;
    let len = queue.len();
    let capacity = queue.capacity();
    let path_max = queue.elem_capacity() - 1;
    queue.destroy();
    let len = len?;

    if as_json {
        println!(
            "{}",
            json!({
                "name": queues.download_primary_name,
                "created": true,
                "segment": segment,
                "len": len,
                "capacity": capacity,
                "path_max": path_max,
            })
        );
    } else {
        println!(
            "{}: {}/{} entries (max path {} bytes) at {}",
            queues.download_primary_name,
            len,
            capacity,
            path_max,
            segment.display()
        );
    }
    Ok(())
}

fn unlink(queues: &QueueConfig) -> anyhow::Result<()> {
    if Queue::unlink(&queues.segment_dir, &queues.download_primary_name)? {
        println!("removed {}", queues.download_primary_name);
    } else {
        bail!("queue {} does not exist", queues.download_primary_name);
    }
    Ok(())
}
