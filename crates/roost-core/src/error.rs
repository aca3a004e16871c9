//! Update attempt error taxonomy
//!
//! Only `ChecksumMismatch` and `InstallFailed` represent failed install
//! attempts that belong in the audit log. `SourceUnavailable` is a
//! transient discovery/transfer failure to retry next cycle, and
//! `NoAssetFound` means there is nothing to install this cycle.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum UpdateError {
    /// Registry unreachable or transfer failed. Recoverable; never
    /// logged as a failed install.
    #[error("release registry unavailable: {0}")]
    SourceUnavailable(String),
    /// Release exists (or component has no release) but there is no
    /// matching payload - nothing to do this cycle.
    #[error("no installable payload asset for {release}")]
    NoAssetFound { release: String },
    /// No published digest to verify against and policy refuses
    /// unverified installs. Distinct from a mismatch.
    #[error("release {release} publishes no checksum and unverified installs are disabled")]
    ChecksumUnavailable { release: String },
    /// Fatal for this attempt; the install target was not touched.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    /// Extraction/swap error; previous install preserved.
    #[error("install failed: {0}")]
    InstallFailed(String),
    /// Persistence layer failure, surfaced to the caller.
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),
}

impl UpdateError {
    /// Whether this error represents an install attempt that should be
    /// recorded as `failed` in the update log.
    pub fn is_failed_install(&self) -> bool {
        matches!(
            self,
            UpdateError::ChecksumMismatch { .. } | UpdateError::InstallFailed(_)
        )
    }
}
