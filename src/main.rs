//! prefetch-proxy
//!
//! # Architecture Overview
//!
//! ```text
//!   Browser ──▶ client-side proxy ─────── mux session ─────── server-side proxy ──▶ Origin
//!                 │                                              │
//!                 │  PrefetchClient                              │  RelayTransport
//!                 │   └─ RacingHttpClient ◀── ResponseCache      │   └─ PrefetchOrchestrator
//!                 │         direct ─────────────────────────────▶│        observe document
//!                 │                            ▲                 │        extract <head>
//!                 │                            │                 │        fetch resources
//!                 │   PushReceiver ── ingest ──┘   ◀── pushes ───│── PushChannel
//! ```
//!
//! The binary runs both halves in one process over an in-memory session:
//! `warm` loads a document through them and reports how each resource was
//! served; `check-config` validates a configuration file.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use url::Url;

use prefetch_proxy::config::{load_config, PrefetchProxyConfig};
use prefetch_proxy::http::transport::{HttpTransport, HyperTransport};
use prefetch_proxy::lifecycle::{signals, Pipeline};
use prefetch_proxy::observability::{logging, metrics};
use prefetch_proxy::prefetch::{HeadScanner, ResourceExtractor};

#[derive(Parser)]
#[command(name = "prefetch-proxy")]
#[command(about = "Speculative prefetch engine for an HTTP proxy pair", long_about = None)]
struct Cli {
    /// Configuration file (TOML). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a document through both proxies and report how its resources were served
    Warm {
        /// Document URL (http or https)
        url: Url,
    },
    /// Load and validate a configuration file
    CheckConfig {
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Commands::CheckConfig { path } = &cli.command {
        return match load_config(path) {
            Ok(_) => {
                println!("{}: ok", path.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}: {}", path.display(), e);
                ExitCode::FAILURE
            }
        };
    }

    let config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => PrefetchProxyConfig::default(),
    };

    if let Err(e) = logging::init(&config.observability) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "prefetch-proxy starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    match cli.command {
        Commands::Warm { url } => warm(&config, url).await,
        Commands::CheckConfig { .. } => ExitCode::SUCCESS,
    }
}

async fn warm(config: &PrefetchProxyConfig, url: Url) -> ExitCode {
    let origin: Arc<dyn HttpTransport> = Arc::new(HyperTransport::new(&config.timeouts));
    let extractor: Arc<dyn ResourceExtractor> =
        Arc::new(HeadScanner::new(config.prefetch.head_read_limit));
    let pipeline = Pipeline::start_in_process(config, origin, extractor);

    if !pipeline.wait_connected(Duration::from_secs(5)).await {
        tracing::warn!("Push session not connected, resources will be served directly");
    }

    let result = tokio::select! {
        result = pipeline.warm(&url) => Some(result),
        _ = signals::wait_for_signal() => None,
    };

    let code = match result {
        Some(Ok(report)) => match serde_json::to_string_pretty(&report) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode report");
                ExitCode::FAILURE
            }
        },
        Some(Err(e)) => {
            tracing::error!(url = %url, error = %e, "Warm run failed");
            ExitCode::FAILURE
        }
        None => ExitCode::FAILURE,
    };

    pipeline.shutdown().await;
    code
}
