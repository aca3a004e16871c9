//! Installer contract
//!
//! An installer streams a release asset to a staging location, verifies
//! it against an expected digest when one is supplied, and atomically
//! replaces the installed artifact tree. Every failure path must leave
//! the previously installed artifact functionally unchanged.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use crate::release::ReleaseAsset;

/// Marker file written into an installed tree carrying the hex digest of
/// the verified payload archive. Read back by `verify`.
pub const DIGEST_MARKER: &str = ".roost-digest";

/// Whether the payload digest was actually checked.
///
/// A missing companion checksum means verification was skipped, not
/// passed - callers decide whether to allow that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Verified,
    Skipped,
}

/// Outcome of a successful install.
#[derive(Debug, Clone)]
pub struct InstallReceipt {
    /// Hex SHA256 of the payload archive as written to disk.
    pub digest: String,
    pub verification: Verification,
}

#[derive(Error, Debug)]
pub enum InstallError {
    /// Network failure while transferring the asset. Recoverable; the
    /// orchestrator treats this like a registry outage, not a failed
    /// install.
    #[error("asset transfer failed: {0}")]
    Transfer(String),
    /// Downloaded payload did not match the published digest. The
    /// installed artifact was not touched.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    /// Extraction or swap error after a verified download. The previous
    /// install is preserved.
    #[error("install failed: {0}")]
    Failed(String),
}

/// Download, verify, and atomically install one release asset.
#[async_trait]
pub trait Installer: Send + Sync {
    async fn install(
        &self,
        asset: &ReleaseAsset,
        target_dir: &Path,
        expected_digest: Option<&str>,
    ) -> Result<InstallReceipt, InstallError>;
}
