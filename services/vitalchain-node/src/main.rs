//! VitalChain node
//!
//! Restores the ledger from its mirror, runs one command, then catches the
//! mirror up before exiting. Command output is JSON on stdout; logs go to
//! stderr.

mod args;

use anyhow::Context;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use vitalchain_core::{logging, LedgerConfig};
use vitalchain_crypto::ValidityResult;
use vitalchain_domain::Alert;
use vitalchain_ledger::{CommitReceipt, LedgerService, MirrorStatus};

use args::{Cli, Command};

const NODE_RUNTIME_VERSION: u32 = 1;
const LEDGER_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: String,
    runtime_version: u32,
    ledger_format_version: u32,
}

#[derive(Debug, Serialize)]
struct CommitOutput<'a> {
    index: u64,
    timestamp: u64,
    hash: String,
    previous_hash: String,
    patient_id: &'a str,
    alerts: &'a [Alert],
    mirror: &'a MirrorStatus,
}

impl<'a> From<&'a CommitReceipt> for CommitOutput<'a> {
    fn from(receipt: &'a CommitReceipt) -> Self {
        Self {
            index: receipt.block.index,
            timestamp: receipt.block.timestamp,
            hash: receipt.block.hash_hex(),
            previous_hash: receipt.block.previous_hash_hex(),
            patient_id: &receipt.reading.patient_id,
            alerts: &receipt.alerts,
            mirror: &receipt.mirror_status,
        }
    }
}

#[derive(Debug, Serialize)]
struct ValidateOutput {
    valid: bool,
    blocks: usize,
    first_invalid_index: Option<u64>,
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct RemoveOutput<'a> {
    patient_id: &'a str,
    removed: bool,
}

#[tokio::main]
async fn main() {
    let raw: Vec<String> = std::env::args().skip(1).collect();

    if raw.iter().any(|arg| arg == "--version-json") {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION").to_string(),
            runtime_version: NODE_RUNTIME_VERSION,
            ledger_format_version: LEDGER_FORMAT_VERSION,
        };
        match serde_json::to_string(&handshake) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let cli = match args::parse(&raw) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            args::print_usage();
            std::process::exit(1);
        }
    };

    if cli.command == Command::Help {
        args::print_usage();
        return;
    }

    if let Err(e) = run(cli).await {
        error!(error = %format!("{:#}", e), "Node exited with error");
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = LedgerConfig::load(cli.config_path.as_deref())
        .with_context(|| describe_config(cli.config_path.as_deref()))?;
    logging::init_with(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        key_path = %config.storage.key_path.display(),
        mirror_backend = ?config.storage.mirror_backend,
        "Starting VitalChain node"
    );

    let ledger = Arc::new(
        LedgerService::from_config(&config).context("Failed to initialize ledger service")?,
    );

    startup(&ledger, config.ingest.seed_readings).await?;

    let outcome = match cli.command {
        Command::Run => run_ingest(&ledger, config.ingest.interval_ms).await,
        command => {
            let ledger = Arc::clone(&ledger);
            blocking(move || execute(&ledger, command)).await
        }
    };

    // The mirror is caught up even when the command failed.
    let persist = {
        let ledger = Arc::clone(&ledger);
        blocking(move || Ok(ledger.persist()?)).await
    };
    match persist {
        Ok(report) => info!(
            examined = report.blocks_examined,
            written = report.blocks_written,
            undecryptable = report.undecryptable.len(),
            failed = report.failed.len(),
            "Ledger persisted"
        ),
        Err(e) => warn!(error = %e, "Persist on exit failed"),
    }

    let metrics = ledger.metrics();
    info!(
        commits = metrics.commits_total,
        mirror_failures = metrics.mirror_failures_total,
        integrity_violations = metrics.integrity_violations_total,
        "Node stopped"
    );

    outcome
}

fn describe_config(path: Option<&Path>) -> String {
    match path {
        Some(path) => format!("Failed to load config from {}", path.display()),
        None => "Failed to load default config".to_string(),
    }
}

/// Rebuild the chain from the mirror, seeding simulated readings on first start.
async fn startup(ledger: &Arc<LedgerService>, seed_readings: usize) -> anyhow::Result<()> {
    // Committing on top of an unrestored chain would fork the mirror
    let report = {
        let ledger = Arc::clone(ledger);
        blocking(move || Ok(ledger.restore()?))
            .await
            .context("Failed to restore ledger from mirror")?
    };

    if report.is_restored() {
        info!(
            found = report.blocks_found,
            restored = report.blocks_restored,
            reused = report.ciphertexts_reused,
            resealed = report.resealed,
            skipped = report.skipped.len(),
            "Ledger restored from mirror"
        );
        for skipped in &report.skipped {
            warn!(index = skipped.index, hash = %skipped.hash, reason = ?skipped.reason, "Block left out of restored chain");
        }
        return Ok(());
    }

    info!(count = seed_readings, "Mirror empty, seeding simulated readings");
    let ledger = Arc::clone(ledger);
    blocking(move || {
        for _ in 0..seed_readings {
            ledger.commit(None)?;
        }
        Ok(())
    })
    .await
    .context("Failed to seed ledger")
}

/// Commit a simulated reading every `interval_ms` until Ctrl-C.
async fn run_ingest(ledger: &Arc<LedgerService>, interval_ms: u64) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(interval_ms, "Ingest loop started, press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let ledger = Arc::clone(ledger);
                match blocking(move || Ok(ledger.commit(None)?)).await {
                    Ok(receipt) => print_json(&CommitOutput::from(&receipt))?,
                    Err(e) => error!(error = %format!("{:#}", e), "Commit failed"),
                }
            }
            signal = &mut shutdown => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!("Shutdown requested");
                break;
            }
        }
    }

    Ok(())
}

fn execute(ledger: &LedgerService, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Commit(reading) => {
            let receipt = ledger.commit(reading)?;
            print_json(&CommitOutput::from(&receipt))
        }
        Command::History { patient_id } => print_json(&ledger.history(&patient_id)?),
        Command::Chain { patient_id: None } => print_json(&ledger.chain_view()?),
        Command::Chain {
            patient_id: Some(patient_id),
        } => print_json(&ledger.patient_chain_view(&patient_id)?),
        Command::Patients => print_json(&ledger.patients()?),
        Command::Remove { patient_id } => {
            let removed = ledger.remove_patient(&patient_id)?;
            print_json(&RemoveOutput {
                patient_id: &patient_id,
                removed,
            })
        }
        Command::Validate => {
            let validity = ledger.validate()?;
            let reason = match &validity {
                ValidityResult::Valid => None,
                ValidityResult::Invalid { reason, .. } => Some(reason.to_string()),
            };
            print_json(&ValidateOutput {
                valid: validity.is_valid(),
                blocks: ledger.len()?,
                first_invalid_index: validity.first_invalid_index(),
                reason,
            })
        }
        Command::Run | Command::Help => Ok(()),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Ledger calls block on locks, the mirror and retry sleeps.
async fn blocking<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("Blocking task panicked")?
}
