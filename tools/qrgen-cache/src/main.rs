//! Cache warm-up and inspection for the QR generator offline worker.
//!
//! Runs the worker's install and activate steps against a live deployment,
//! which is a quick way to check that every manifest entry is reachable
//! before a release.
//!
//! ## Usage
//!
//! ```bash
//! # Seed the current generation from a staging deployment
//! qrgen-cache --config worker.json --origin https://staging.qr.example.org/ warm
//!
//! # See which URLs the worker would store
//! qrgen-cache classify https://api.qrserver.com/v1/create-qr-code/ /promo.mp4
//!
//! # Print the effective configuration
//! qrgen-cache config
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use qrgen_core::{init_logging, LogConfig, LogFormat, WorkerConfig};
use qrgen_net::{LoaderConfig, ResourceLoader};
use qrgen_sw::{CacheStorage, Classifier, MemoryCacheStorage, OfflineWorker, Verdict};
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

#[derive(Parser)]
#[command(name = "qrgen-cache")]
#[command(about = "Warm and inspect offline cache generations for the QR generator")]
struct Cli {
    /// Worker configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the deployment origin
    #[arg(long, global = true)]
    origin: Option<Url>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Log format: pretty, compact or json
    #[arg(long, default_value = "pretty", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install and activate the current generation against the live origin
    Warm {
        /// Per-request transport timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Show how URLs would be classified for caching
    Classify {
        /// URLs or paths relative to the origin
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Print the effective configuration
    Config,
}

fn load_config(cli: &Cli) -> anyhow::Result<WorkerConfig> {
    let mut config = match cli.config {
        Some(ref path) => WorkerConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => WorkerConfig::default(),
    };
    if let Some(ref origin) = cli.origin {
        config.origin = origin.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(
        LogConfig::default()
            .with_verbosity(cli.verbose)
            .with_format(cli.log_format),
    )?;

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Warm { timeout } => {
            let complete = warm(config, Duration::from_secs(timeout)).await?;
            if !complete {
                std::process::exit(2);
            }
        }
        Commands::Classify { ref urls } => classify(&config, urls)?,
        Commands::Config => println!("{}", serde_json::to_string_pretty(&config)?),
    }

    Ok(())
}

/// Returns whether every manifest entry was seeded.
async fn warm(config: WorkerConfig, timeout: Duration) -> anyhow::Result<bool> {
    let loader = ResourceLoader::new(LoaderConfig {
        default_timeout: timeout,
        ..LoaderConfig::default().with_origin(config.origin.clone())
    })?;
    let storage = Arc::new(MemoryCacheStorage::new());
    let (worker, mut events) = OfflineWorker::new(config, storage.clone(), Arc::new(loader))?;

    let install = worker.install().await;
    let activate = worker.activate().await;

    while let Ok(event) = events.try_recv() {
        debug!(?event, "Worker event");
    }

    let entries: Vec<String> = storage
        .entries(worker.cache_name())
        .await?
        .into_iter()
        .map(|key| key.url)
        .collect();

    let complete = install.failed.is_empty();
    for (url, reason) in &install.failed {
        warn!(url = %url, reason = %reason, "Manifest entry not cached");
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "generation": worker.cache_name(),
            "install": install,
            "activate": activate,
            "entries": entries,
        }))?
    );

    Ok(complete)
}

fn classify(config: &WorkerConfig, urls: &[String]) -> anyhow::Result<()> {
    let classifier = Classifier::from_config(config);
    for raw in urls {
        let url = config.resolve(raw)?;
        let verdict = match classifier.verdict(url.as_str()) {
            Verdict::Accepted(rule) => format!("cacheable ({:?} '{}')", rule.kind, rule.needle),
            Verdict::Rejected(rule) => format!("rejected ({:?} '{}')", rule.kind, rule.needle),
            Verdict::Unmatched => "rejected (no rule)".to_string(),
        };
        let scope = if config.is_same_origin(&url) || config.is_trusted_origin(&url) {
            "intercepted"
        } else {
            "pass-through"
        };
        println!("{url}\t{scope}\t{verdict}");
    }
    Ok(())
}
