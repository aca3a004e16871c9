//! Streaming download, verification, and atomic install
//!
//! The install sequence never buffers a payload in memory and never
//! exposes a half-written tree:
//! 1. Stream the asset into a temporary file next to the target
//!    (same filesystem), hashing chunk-by-chunk while writing.
//! 2. Compare against the expected digest, when one was published.
//! 3. Extract the archive into a sibling staging directory, stripping
//!    exactly one leading path component.
//! 4. Swap staging into place with renames; the previous tree is moved
//!    aside first and only deleted after the swap succeeds.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::{Component as PathPart, Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use roost_core::digest::{digests_match, StreamingDigest};
use roost_core::install::{InstallError, InstallReceipt, Installer, Verification, DIGEST_MARKER};
use roost_core::release::ReleaseAsset;

/// Installer that downloads over HTTPS and installs with stage-then-swap.
pub struct StreamingInstaller {
    client: reqwest::Client,
    download_timeout: Duration,
}

fn io_failed(e: std::io::Error) -> InstallError {
    InstallError::Failed(e.to_string())
}

impl StreamingInstaller {
    pub fn new(download_timeout: Duration) -> Result<Self, InstallError> {
        let client = reqwest::Client::builder()
            .timeout(download_timeout)
            .build()
            .map_err(|e| InstallError::Failed(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            download_timeout,
        })
    }

    /// Stream `url` into `dest`, returning the hex digest of the bytes
    /// as written.
    async fn download_to(&self, url: &str, dest: &Path) -> Result<String, InstallError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| InstallError::Transfer(e.to_string()))?
            .error_for_status()
            .map_err(|e| InstallError::Transfer(e.to_string()))?;

        let mut file = tokio::fs::File::create(dest).await.map_err(io_failed)?;
        let mut digest = StreamingDigest::new();
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| InstallError::Transfer(e.to_string()))?;
            digest.update(&chunk);
            file.write_all(&chunk).await.map_err(io_failed)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_failed)?;
        debug!(url = %url, bytes = written, "Payload downloaded");
        Ok(digest.finish())
    }
}

#[async_trait]
impl Installer for StreamingInstaller {
    async fn install(
        &self,
        asset: &ReleaseAsset,
        target_dir: &Path,
        expected_digest: Option<&str>,
    ) -> Result<InstallReceipt, InstallError> {
        let parent = target_dir
            .parent()
            .ok_or_else(|| InstallError::Failed("install target has no parent directory".into()))?;
        let stem = target_stem(target_dir)?;
        tokio::fs::create_dir_all(parent).await.map_err(io_failed)?;
        reap_stale_artifacts(parent, &stem).await;

        let nonce = uuid::Uuid::new_v4();
        let tmp_archive = parent.join(format!(".roost-{stem}-download-{nonce}.tar.gz"));
        let staging = parent.join(format!(".roost-{stem}-staging-{nonce}"));

        let result = self
            .install_inner(asset, target_dir, expected_digest, &tmp_archive, &staging)
            .await;

        // Leftovers are harmless but not free; clean up on every path.
        let _ = tokio::fs::remove_file(&tmp_archive).await;
        let _ = tokio::fs::remove_dir_all(&staging).await;
        result
    }
}

impl StreamingInstaller {
    async fn install_inner(
        &self,
        asset: &ReleaseAsset,
        target_dir: &Path,
        expected_digest: Option<&str>,
        tmp_archive: &Path,
        staging: &Path,
    ) -> Result<InstallReceipt, InstallError> {
        info!(asset = %asset.name, target = %target_dir.display(), "Installing payload");

        let digest = match tokio::time::timeout(
            self.download_timeout,
            self.download_to(&asset.download_url, tmp_archive),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(InstallError::Transfer(format!(
                    "download of {} timed out",
                    asset.name
                )))
            }
        };

        let verification = match expected_digest {
            Some(expected) => {
                if !digests_match(&digest, expected) {
                    return Err(InstallError::ChecksumMismatch {
                        expected: expected.to_string(),
                        actual: digest,
                    });
                }
                debug!(digest = %digest, "Payload digest verified");
                Verification::Verified
            }
            None => {
                warn!(asset = %asset.name, "No published checksum; install is unverified");
                Verification::Skipped
            }
        };

        let archive = tmp_archive.to_path_buf();
        let staging_dir = staging.to_path_buf();
        tokio::task::spawn_blocking(move || extract_archive(&archive, &staging_dir))
            .await
            .map_err(|e| InstallError::Failed(format!("extraction task panicked: {e}")))?
            .map_err(io_failed)?;

        tokio::fs::write(staging.join(DIGEST_MARKER), &digest)
            .await
            .map_err(io_failed)?;

        swap_into_place(staging, target_dir).await.map_err(io_failed)?;

        info!(target = %target_dir.display(), digest = %&digest[..16.min(digest.len())], "Install complete");
        Ok(InstallReceipt {
            digest,
            verification,
        })
    }
}

fn target_stem(target_dir: &Path) -> Result<String, InstallError> {
    target_dir
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
        .ok_or_else(|| InstallError::Failed("install target has no directory name".into()))
}

/// Remove leftovers a crashed earlier attempt may have stranded next to
/// `parent/{stem}` (`.roost-{stem}-download-*`, `-staging-*`,
/// `-previous-*`).
///
/// Attempts for the same target are serialized by the orchestrator, so
/// anything carrying this target's prefix is stale. Sibling targets use
/// their own prefix and are never touched.
async fn reap_stale_artifacts(parent: &Path, stem: &str) {
    let prefix = format!(".roost-{stem}-");
    let Ok(mut entries) = tokio::fs::read_dir(parent).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        match entry.file_name().to_str() {
            Some(name) if name.starts_with(&prefix) => {}
            _ => continue,
        }
        let path = entry.path();
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        let removed = if is_dir {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        if removed.is_ok() {
            warn!(path = %path.display(), "Removed stale install artifact");
        }
    }
}

/// Extract a gzipped tarball into `staging`, stripping exactly one
/// leading path component so the archive's top-level directory does not
/// nest inside the target.
///
/// Only regular files and directories are unpacked; link entries are
/// rejected so no later entry can be routed through a planted symlink.
pub(crate) fn extract_archive(archive: &Path, staging: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(staging)?;
    let file = std::fs::File::open(archive)?;
    let mut tarball = tar::Archive::new(flate2::read::GzDecoder::new(file));

    for entry in tarball.entries()? {
        let mut entry = entry?;
        let kind = entry.header().entry_type();
        if !kind.is_file() && !kind.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unsupported archive entry type {kind:?}"),
            ));
        }
        let path = entry.path()?.into_owned();
        let rel = match stripped_entry_path(&path)? {
            Some(rel) => rel,
            None => continue,
        };
        let dest = staging.join(rel);
        if let Some(dir) = dest.parent() {
            std::fs::create_dir_all(dir)?;
        }
        entry.unpack(&dest)?;
    }
    Ok(())
}

/// Drop the archive's top-level directory from an entry path.
///
/// Returns `None` for the top-level directory entry itself and rejects
/// entries that would escape the staging directory.
pub(crate) fn stripped_entry_path(path: &Path) -> std::io::Result<Option<PathBuf>> {
    let parts: Vec<PathPart> = path
        .components()
        .filter(|c| !matches!(c, PathPart::CurDir))
        .collect();
    if parts.len() <= 1 {
        return Ok(None);
    }
    if parts.iter().any(|c| !matches!(c, PathPart::Normal(_))) {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("archive entry escapes staging directory: {}", path.display()),
        ));
    }
    Ok(Some(parts[1..].iter().collect()))
}

/// Replace `target` with `staging` using renames only.
///
/// The previous tree is moved aside before the swap and deleted only
/// after the new tree is in place; a failed swap puts it back.
pub(crate) async fn swap_into_place(staging: &Path, target: &Path) -> std::io::Result<()> {
    let parent = target.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "target has no parent")
    })?;
    let stem = target.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "target has no directory name")
    })?;
    let old = parent.join(format!(".roost-{stem}-previous-{}", uuid::Uuid::new_v4()));

    let had_previous = tokio::fs::metadata(target).await.is_ok();
    if had_previous {
        tokio::fs::rename(target, &old).await?;
    }
    if let Err(e) = tokio::fs::rename(staging, target).await {
        if had_previous {
            // Put the previous install back before surfacing the error.
            let _ = tokio::fs::rename(&old, target).await;
        }
        return Err(e);
    }
    if had_previous {
        let _ = tokio::fs::remove_dir_all(&old).await;
    }
    Ok(())
}
