//! Update orchestration
//!
//! For each (device, component) pair the orchestrator compares the
//! store's current version against the latest published release and, if
//! they differ, drives the download -> verify -> install -> record
//! sequence. Attempts for the same pair are serialized behind a per-key
//! mutex; a fleet sweep runs distinct pairs concurrently under a bounded
//! worker pool. Only checksum mismatches and install failures are
//! recorded as failed attempts in the audit log.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use roost_core::digest::digests_match;
use roost_core::error::UpdateError;
use roost_core::install::{Installer, Verification, DIGEST_MARKER};
use roost_core::record::{FirmwareRecord, RecordStatus, UpdateLogEntry, UpdateStatus};
use roost_core::release::{ReleaseSource, SourceError};
use roost_core::store::{RecordFilter, StateStore};
use roost_core::version::FwVersion;

/// Placeholder version for pairs with no record yet.
const UNKNOWN_VERSION: &str = "unknown";

/// One stale (device, component) pair found by a check sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    pub device: String,
    pub component: String,
    pub current: String,
    pub latest: String,
}

/// A component whose latest release could not be determined this cycle.
#[derive(Debug, Clone)]
pub struct CheckIssue {
    pub component: String,
    pub reason: String,
}

/// Result of a fleet check sweep: what is known to be stale, and what
/// could not be determined.
#[derive(Debug, Default)]
pub struct FleetCheck {
    pub pending: Vec<PendingUpdate>,
    pub unknown: Vec<CheckIssue>,
}

/// Terminal outcome of one deploy attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    /// Current equals latest; nothing was downloaded or written.
    AlreadyCurrent { version: String },
    /// Dry run: reports the change without performing it.
    WouldUpdate { from: String, to: String },
    /// Install succeeded and state was recorded.
    Updated { from: String, to: String },
}

/// Outcome of verifying one record against its installed artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyStatus {
    Ok,
    Mismatch { expected: String, actual: String },
    MissingArtifact,
}

#[derive(Debug, Clone)]
pub struct VerifyResult {
    pub device: String,
    pub component: String,
    pub status: VerifyStatus,
}

/// One (device, component) result from a fleet update sweep.
pub struct SweepResult {
    pub device: String,
    pub component: String,
    pub result: Result<DeployOutcome, UpdateError>,
}

/// Orchestrator construction options.
pub struct OrchestratorOptions {
    /// Fleet roster iterated by default.
    pub fleet: Vec<String>,
    /// Tracked component names (closed per deployment).
    pub components: Vec<String>,
    /// Root of installed artifact trees: `{root}/{device}/{component}`.
    pub install_root: PathBuf,
    /// Worker pool bound for fleet sweeps.
    pub max_concurrent: usize,
    /// Refuse installs when no checksum was published.
    pub require_checksum: bool,
}

/// The update control loop.
pub struct UpdateOrchestrator {
    source: Arc<dyn ReleaseSource>,
    installer: Arc<dyn Installer>,
    store: Arc<dyn StateStore>,
    options: OrchestratorOptions,
    /// Per-(device, component) locks serializing deploy attempts.
    locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl UpdateOrchestrator {
    pub fn new(
        source: Arc<dyn ReleaseSource>,
        installer: Arc<dyn Installer>,
        store: Arc<dyn StateStore>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            source,
            installer,
            store,
            options,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn fleet(&self) -> &[String] {
        &self.options.fleet
    }

    pub fn components(&self) -> &[String] {
        &self.options.components
    }

    fn target_dir(&self, device: &str, component: &str) -> PathBuf {
        self.options.install_root.join(device).join(component)
    }

    async fn attempt_lock(&self, device: &str, component: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry((device.to_string(), component.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Compare stored state against the latest releases for every device
    /// in scope. A registry failure for one component never aborts the
    /// sweep; it is reported in `unknown` instead.
    pub async fn check_updates(&self, device: Option<&str>) -> Result<FleetCheck, UpdateError> {
        let devices: Vec<String> = match device {
            Some(d) => vec![d.to_string()],
            None => self.options.fleet.clone(),
        };

        let mut check = FleetCheck::default();
        for component in &self.options.components {
            let latest = match self.source.latest_release(component).await {
                Ok(release) => release.version,
                Err(e) => {
                    warn!(component = %component, error = %e, "Could not determine latest release");
                    check.unknown.push(CheckIssue {
                        component: component.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            for dev in &devices {
                let record = self.store.get(dev, component)?;
                let (current, stale) = match &record {
                    Some(r) => (
                        r.version.clone(),
                        FwVersion::parse(&r.version) != FwVersion::parse(&latest),
                    ),
                    None => (UNKNOWN_VERSION.to_string(), true),
                };
                if stale {
                    check.pending.push(PendingUpdate {
                        device: dev.clone(),
                        component: component.clone(),
                        current,
                        latest: latest.clone(),
                    });
                }
            }
        }
        check
            .pending
            .sort_by(|a, b| (&a.device, &a.component).cmp(&(&b.device, &b.component)));
        Ok(check)
    }

    /// Drive one update attempt for a single (device, component) pair.
    ///
    /// Safe to re-run: an already-current pair terminates with no side
    /// effects, and concurrent calls for the same pair are serialized.
    pub async fn deploy(
        &self,
        device: &str,
        component: &str,
        dry_run: bool,
    ) -> Result<DeployOutcome, UpdateError> {
        let lock = self.attempt_lock(device, component).await;
        let _guard = lock.lock().await;
        self.deploy_locked(device, component, dry_run).await
    }

    async fn deploy_locked(
        &self,
        device: &str,
        component: &str,
        dry_run: bool,
    ) -> Result<DeployOutcome, UpdateError> {
        // Checking: resolve current and latest.
        let record = self.store.get(device, component)?;
        let release = self.source.latest_release(component).await.map_err(|e| match e {
            SourceError::NotFound(c) => UpdateError::NoAssetFound { release: c },
            SourceError::Unavailable(m) => UpdateError::SourceUnavailable(m),
        })?;
        let latest = release.version.clone();

        let current = record
            .as_ref()
            .map(|r| r.version.clone())
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string());
        let stale = match &record {
            Some(r) => FwVersion::parse(&r.version) != FwVersion::parse(&latest),
            None => true,
        };
        if !stale {
            info!(device = %device, component = %component, version = %latest, "Already current");
            return Ok(DeployOutcome::AlreadyCurrent { version: latest });
        }

        if dry_run {
            info!(
                device = %device,
                component = %component,
                from = %current,
                to = %latest,
                "Dry run: update available, no changes applied"
            );
            return Ok(DeployOutcome::WouldUpdate {
                from: current,
                to: latest,
            });
        }

        let payload = release
            .payload_asset()
            .ok_or_else(|| UpdateError::NoAssetFound {
                release: release.tag.clone(),
            })?;

        // Resolve the expected digest before any bytes are transferred.
        let expected = match release.checksum_asset() {
            Some(asset) => Some(self.source.fetch_checksum(asset).await.map_err(|e| {
                UpdateError::SourceUnavailable(e.to_string())
            })?),
            None if self.options.require_checksum => {
                return Err(UpdateError::ChecksumUnavailable {
                    release: release.tag.clone(),
                });
            }
            None => None,
        };

        info!(
            device = %device,
            component = %component,
            from = %current,
            to = %latest,
            "Starting update"
        );

        let target = self.target_dir(device, component);
        match self
            .installer
            .install(payload, &target, expected.as_deref())
            .await
        {
            Ok(receipt) => {
                if receipt.verification == Verification::Skipped {
                    warn!(device = %device, component = %component, "Installed without checksum verification");
                }
                let now = chrono::Utc::now();
                let new_record = FirmwareRecord {
                    device: device.to_string(),
                    component: component.to_string(),
                    version: latest.clone(),
                    release_date: release.published_at.date_naive(),
                    checksum: receipt.digest,
                    status: RecordStatus::Current,
                    download_url: payload.download_url.clone(),
                    notes: release.notes.clone(),
                    created_at: now,
                };
                let entry = UpdateLogEntry::attempt(
                    device,
                    component,
                    &current,
                    &latest,
                    UpdateStatus::Success,
                    now,
                );
                self.store.commit_success(&new_record, &entry)?;
                info!(device = %device, component = %component, version = %latest, "Update applied");
                Ok(DeployOutcome::Updated {
                    from: current,
                    to: latest,
                })
            }
            Err(e) => {
                let update_err = match e {
                    roost_core::install::InstallError::Transfer(m) => {
                        UpdateError::SourceUnavailable(m)
                    }
                    roost_core::install::InstallError::ChecksumMismatch { expected, actual } => {
                        UpdateError::ChecksumMismatch { expected, actual }
                    }
                    roost_core::install::InstallError::Failed(m) => UpdateError::InstallFailed(m),
                };
                if update_err.is_failed_install() {
                    error!(
                        device = %device,
                        component = %component,
                        error = %update_err,
                        "Install attempt failed"
                    );
                    let entry = UpdateLogEntry::attempt(
                        device,
                        component,
                        &current,
                        &latest,
                        UpdateStatus::Failed,
                        chrono::Utc::now(),
                    );
                    self.store.append_log(&entry)?;
                } else {
                    warn!(
                        device = %device,
                        component = %component,
                        error = %update_err,
                        "Update attempt did not reach install"
                    );
                }
                Err(update_err)
            }
        }
    }

    /// Deploy across the fleet with bounded concurrency. Distinct
    /// (device, component) pairs run in parallel; attempts for the same
    /// pair are serialized by the per-key locks.
    pub async fn deploy_fleet(
        self: &Arc<Self>,
        device: Option<&str>,
        component: Option<&str>,
        dry_run: bool,
    ) -> Vec<SweepResult> {
        let devices: Vec<String> = match device {
            Some(d) => vec![d.to_string()],
            None => self.options.fleet.clone(),
        };
        let components: Vec<String> = match component {
            Some(c) => vec![c.to_string()],
            None => self.options.components.clone(),
        };

        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent.max(1)));
        let mut tasks = JoinSet::new();
        for dev in &devices {
            for comp in &components {
                let orchestrator = Arc::clone(self);
                let semaphore = Arc::clone(&semaphore);
                let dev = dev.clone();
                let comp = comp.clone();
                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let result = orchestrator.deploy(&dev, &comp, dry_run).await;
                    SweepResult {
                        device: dev,
                        component: comp,
                        result,
                    }
                });
            }
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok(result) = joined {
                results.push(result);
            }
        }
        results.sort_by(|a, b| (&a.device, &a.component).cmp(&(&b.device, &b.component)));
        results
    }

    /// Compare stored checksums against the digest markers of the
    /// installed trees.
    pub async fn verify(
        &self,
        device: Option<&str>,
        component: Option<&str>,
    ) -> Result<Vec<VerifyResult>, UpdateError> {
        let filter = RecordFilter {
            device: device.map(|d| d.to_string()),
            component: component.map(|c| c.to_string()),
            status: None,
        };
        let records = self.store.list(&filter)?;

        let mut results = Vec::new();
        for record in records {
            let marker = self.target_dir(&record.device, &record.component).join(DIGEST_MARKER);
            let status = match tokio::fs::read_to_string(&marker).await {
                Ok(text) => {
                    let actual = text.trim().to_string();
                    if digests_match(&actual, &record.checksum) {
                        VerifyStatus::Ok
                    } else {
                        VerifyStatus::Mismatch {
                            expected: record.checksum.clone(),
                            actual,
                        }
                    }
                }
                Err(_) => VerifyStatus::MissingArtifact,
            };
            results.push(VerifyResult {
                device: record.device,
                component: record.component,
                status,
            });
        }
        Ok(results)
    }

}
