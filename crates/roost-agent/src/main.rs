//! Roost agent - fleet firmware update CLI
//!
//! Thin boundary over the update engine: loads configuration, wires the
//! registry client, installer, and state store into the orchestrator,
//! and dispatches one subcommand per invocation.

mod config;
mod installer;
mod orchestrator;
mod registry;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use roost_core::record::{FirmwareRecord, RecordStatus};
use roost_core::store::{RecordFilter, StateStore};
use roost_core::UpdateError;
use roost_store::SqliteStateStore;

use installer::StreamingInstaller;
use orchestrator::{DeployOutcome, OrchestratorOptions, UpdateOrchestrator, VerifyStatus};
use registry::GithubReleaseSource;

#[derive(Parser, Debug)]
#[command(name = "roost")]
#[command(about = "Fleet firmware update orchestrator")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "roost.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List firmware records
    List {
        #[arg(long)]
        device: Option<String>,
        #[arg(long)]
        component: Option<String>,
        #[arg(long)]
        status: Option<String>,
    },
    /// Check for available updates
    Check {
        #[arg(long)]
        device: Option<String>,
    },
    /// Apply firmware updates
    Update {
        #[arg(long)]
        device: Option<String>,
        #[arg(long)]
        component: Option<String>,
        /// Report what would change without applying anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Verify installed artifacts against recorded checksums
    Verify {
        #[arg(long)]
        device: Option<String>,
        #[arg(long)]
        component: Option<String>,
    },
    /// Show update history
    Log {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = config::load_config(&args.config)?;

    let store = Arc::new(
        SqliteStateStore::open(&config.store.path).context("Failed to open firmware database")?,
    );
    seed_store(&config, &store)?;

    let repos = config
        .components
        .iter()
        .map(|(name, c)| (name.clone(), c.repo.clone()))
        .collect();
    let source = GithubReleaseSource::new(
        &config.registry.api_base,
        repos,
        config.registry_token(),
    )
    .map_err(|e| anyhow::anyhow!("{e}"))?;
    let installer =
        StreamingInstaller::new(Duration::from_secs(config.install.download_timeout_secs))
            .map_err(|e| anyhow::anyhow!("{e}"))?;

    let orchestrator = Arc::new(UpdateOrchestrator::new(
        Arc::new(source),
        Arc::new(installer),
        store.clone(),
        OrchestratorOptions {
            fleet: config.fleet.devices.clone(),
            components: config.component_names(),
            install_root: config.install.root.clone(),
            max_concurrent: config.install.max_concurrent,
            require_checksum: config.install.require_checksum,
        },
    ));

    match args.command {
        Command::List {
            device,
            component,
            status,
        } => cmd_list(&*store, device, component, status),
        Command::Check { device } => cmd_check(&orchestrator, device).await,
        Command::Update {
            device,
            component,
            dry_run,
        } => cmd_update(&orchestrator, device, component, dry_run).await,
        Command::Verify { device, component } => {
            cmd_verify(&orchestrator, device, component).await
        }
        Command::Log { limit } => cmd_log(&*store, limit),
    }
}

/// Populate first-observation records from config without overwriting
/// live state.
fn seed_store(config: &config::Config, store: &SqliteStateStore) -> Result<()> {
    if config.seed.is_empty() {
        return Ok(());
    }
    let now = chrono::Utc::now();
    let records: Vec<FirmwareRecord> = config
        .seed
        .iter()
        .map(|s| FirmwareRecord {
            device: s.device.clone(),
            component: s.component.clone(),
            version: s.version.clone(),
            release_date: s.release_date.unwrap_or_else(|| now.date_naive()),
            checksum: String::new(),
            status: RecordStatus::Current,
            download_url: String::new(),
            notes: s.notes.clone(),
            created_at: now,
        })
        .collect();
    let inserted = store.seed_records(&records)?;
    if inserted > 0 {
        info!(inserted, "Seeded firmware records from config");
    }
    Ok(())
}

fn parse_status(raw: &str) -> Result<RecordStatus> {
    RecordStatus::parse(raw)
        .with_context(|| format!("invalid status {raw:?} (current|available|deprecated|pending)"))
}

fn check_scope(orchestrator: &UpdateOrchestrator, device: Option<&str>) -> Result<()> {
    if let Some(device) = device {
        if !orchestrator.fleet().iter().any(|d| d == device) {
            bail!("unknown device {device:?} (not in fleet roster)");
        }
    }
    Ok(())
}

fn check_component(orchestrator: &UpdateOrchestrator, component: Option<&str>) -> Result<()> {
    if let Some(component) = component {
        if !orchestrator.components().iter().any(|c| c == component) {
            bail!("unknown component {component:?} (not configured)");
        }
    }
    Ok(())
}

fn cmd_list(
    store: &dyn StateStore,
    device: Option<String>,
    component: Option<String>,
    status: Option<String>,
) -> Result<()> {
    let filter = RecordFilter {
        device,
        component,
        status: status.as_deref().map(parse_status).transpose()?,
    };
    let records = store.list(&filter)?;
    if records.is_empty() {
        println!("No firmware records found.");
        return Ok(());
    }
    println!(
        "{:<20}  {:<14}  {:<24}  {:<12}  Status",
        "Device", "Component", "Version", "Date"
    );
    for record in records {
        println!(
            "{:<20}  {:<14}  {:<24}  {:<12}  {}",
            record.device,
            record.component,
            record.version,
            record.release_date,
            record.status
        );
    }
    Ok(())
}

async fn cmd_check(orchestrator: &UpdateOrchestrator, device: Option<String>) -> Result<()> {
    check_scope(orchestrator, device.as_deref())?;
    let check = orchestrator.check_updates(device.as_deref()).await?;

    if check.pending.is_empty() && check.unknown.is_empty() {
        println!("All devices are up to date.");
        return Ok(());
    }
    for pending in &check.pending {
        println!(
            "{:<20}  {:<14}  {} -> {}",
            pending.device, pending.component, pending.current, pending.latest
        );
    }
    for issue in &check.unknown {
        println!("{:<20}  status unknown: {}", issue.component, issue.reason);
    }
    Ok(())
}

async fn cmd_update(
    orchestrator: &Arc<UpdateOrchestrator>,
    device: Option<String>,
    component: Option<String>,
    dry_run: bool,
) -> Result<()> {
    check_scope(orchestrator, device.as_deref())?;
    check_component(orchestrator, component.as_deref())?;

    let results = orchestrator
        .deploy_fleet(device.as_deref(), component.as_deref(), dry_run)
        .await;

    let mut failed_installs = 0;
    for sweep in &results {
        let label = format!("{}/{}", sweep.device, sweep.component);
        match &sweep.result {
            Ok(DeployOutcome::AlreadyCurrent { version }) => {
                println!("{label:<32} already current ({version})");
            }
            Ok(DeployOutcome::WouldUpdate { from, to }) => {
                println!("{label:<32} would update {from} -> {to} (dry run)");
            }
            Ok(DeployOutcome::Updated { from, to }) => {
                println!("{label:<32} updated {from} -> {to}");
            }
            Err(UpdateError::NoAssetFound { release }) => {
                println!("{label:<32} nothing to install ({release})");
            }
            Err(e) => {
                println!("{label:<32} FAILED: {e}");
                failed_installs += 1;
            }
        }
    }

    if failed_installs > 0 {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_verify(
    orchestrator: &UpdateOrchestrator,
    device: Option<String>,
    component: Option<String>,
) -> Result<()> {
    check_scope(orchestrator, device.as_deref())?;
    check_component(orchestrator, component.as_deref())?;

    let results = orchestrator
        .verify(device.as_deref(), component.as_deref())
        .await?;
    if results.is_empty() {
        println!("No firmware records to verify.");
        return Ok(());
    }

    let mut failures = 0;
    for result in &results {
        let label = format!("{}/{}", result.device, result.component);
        match &result.status {
            VerifyStatus::Ok => println!("{label:<32} ok"),
            VerifyStatus::Mismatch { expected, actual } => {
                println!("{label:<32} MISMATCH expected={expected} actual={actual}");
                failures += 1;
            }
            VerifyStatus::MissingArtifact => {
                println!("{label:<32} missing installed artifact");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        std::process::exit(1);
    }
    println!("All checksums verified.");
    Ok(())
}

fn cmd_log(store: &dyn StateStore, limit: usize) -> Result<()> {
    let entries = store.recent_log(limit)?;
    if entries.is_empty() {
        println!("No update log entries found.");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{}  {:<20}  {:<14}  {} -> {}  [{}]",
            entry.applied_at.format("%Y-%m-%d %H:%M:%S"),
            entry.device,
            entry.component,
            entry.from_version,
            entry.to_version,
            entry.status
        );
    }
    Ok(())
}
