use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gatekeeper::admission::{BatchItem, BatchOptions, Statistics};
use gatekeeper::{AdmissionGate, GatekeeperConfig};

#[derive(Parser, Debug)]
#[command(name = "gatekeeper", version, about = "Adaptive request admission control")]
struct Cli {
    /// YAML configuration file; defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the configuration, then print it
    CheckConfig,
    /// Drive no-op requests through the admission gate
    Simulate {
        #[arg(long, default_value = "simulated-client")]
        identifier: String,
        #[arg(long, default_value = "")]
        endpoint: String,
        #[arg(long, default_value = "authenticated")]
        role: String,
        /// Number of requests to submit
        #[arg(long, default_value_t = 20)]
        requests: usize,
        /// Requests submitted concurrently per batch chunk
        #[arg(long, default_value_t = 5)]
        concurrency: usize,
        /// Pause between batch chunks
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
        /// Skip the final pass over failed requests
        #[arg(long)]
        no_retry_pass: bool,
    },
}

#[derive(Serialize)]
struct Outcome {
    index: usize,
    admitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u64>,
}

#[derive(Serialize)]
struct SimulationReport {
    requests: usize,
    succeeded: usize,
    failed: usize,
    chunks: usize,
    retried: usize,
    outcomes: Vec<Outcome>,
    statistics: Statistics,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<GatekeeperConfig> {
    match path {
        Some(path) => GatekeeperConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display())),
        None => Ok(GatekeeperConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    info!("Gatekeeper {}", env!("CARGO_PKG_VERSION"));
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::CheckConfig => {
            config.validate()?;
            print!("{}", serde_yaml::to_string(&config)?);
            info!(endpoints = config.limits.endpoints.len(), "Configuration is valid");
        }
        Command::Simulate {
            identifier,
            endpoint,
            role,
            requests,
            concurrency,
            interval_ms,
            no_retry_pass,
        } => {
            let gate = Arc::new(AdmissionGate::open(config).await?);
            let maintenance = gate.start_maintenance();

            let items: Vec<_> = (0..requests)
                .map(|_| BatchItem::new(identifier.clone(), endpoint.clone(), role.clone(), || async {}))
                .collect();
            let options = BatchOptions {
                concurrency,
                inter_batch_delay: Duration::from_millis(interval_ms),
                retry_failed: !no_retry_pass,
            };

            info!(requests, concurrency, identifier = %identifier, "Starting simulation");

            let report = tokio::select! {
                report = gate.submit_batch(items, &options) => Some(report),
                _ = shutdown_signal() => None,
            };

            if let Some(report) = report {
                let outcomes = report
                    .results
                    .iter()
                    .enumerate()
                    .map(|(index, result)| Outcome {
                        index,
                        admitted: result.is_ok(),
                        error: result.as_ref().err().map(|e| e.to_string()),
                        retry_after_ms: result
                            .as_ref()
                            .err()
                            .and_then(|e| e.retry_after())
                            .map(|d| d.as_millis() as u64),
                    })
                    .collect();

                let summary = SimulationReport {
                    requests,
                    succeeded: report.succeeded(),
                    failed: report.failed(),
                    chunks: report.chunks,
                    retried: report.retried,
                    outcomes,
                    statistics: gate.statistics(),
                };
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                warn!(queued = gate.queue_depth(), "Simulation interrupted");
            }

            maintenance.shutdown().await;
        }
    }

    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
