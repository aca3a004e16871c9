//! Release metadata and the release registry contract
//!
//! A release is a tagged publication with named downloadable assets. The
//! firmware payload is resolved by suffix (`.tar.gz`); a sibling asset
//! ending `.sha256` is the companion digest when present. Registry
//! failures are surfaced as `Unavailable` and must never be conflated
//! with "no update exists".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Suffix identifying the firmware payload among a release's assets.
pub const PAYLOAD_SUFFIX: &str = ".tar.gz";
/// Suffix identifying the companion checksum asset.
pub const CHECKSUM_SUFFIX: &str = ".sha256";

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("no release published for component {0}")]
    NotFound(String),
    #[error("release registry unavailable: {0}")]
    Unavailable(String),
}

/// A single downloadable asset attached to a release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub download_url: String,
}

/// Metadata for the latest release of one component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseMetadata {
    /// Raw release tag as published (e.g. `v6.6.51`).
    pub tag: String,
    /// Tag normalized for version comparison (leading `v` stripped).
    pub version: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

impl ReleaseMetadata {
    /// The firmware payload asset, resolved by suffix.
    pub fn payload_asset(&self) -> Option<&ReleaseAsset> {
        self.assets.iter().find(|a| a.name.ends_with(PAYLOAD_SUFFIX))
    }

    /// The companion checksum asset, when published.
    pub fn checksum_asset(&self) -> Option<&ReleaseAsset> {
        self.assets.iter().find(|a| a.name.ends_with(CHECKSUM_SUFFIX))
    }
}

/// Strip a leading `v`/`V` from a release tag for version comparison.
pub fn normalize_tag(tag: &str) -> String {
    let t = tag.trim();
    if t.starts_with('v') || t.starts_with('V') {
        t[1..].to_string()
    } else {
        t.to_string()
    }
}

/// Abstraction over the remote release registry.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Latest published release of a component.
    async fn latest_release(&self, component: &str) -> Result<ReleaseMetadata, SourceError>;

    /// Download a companion checksum asset and return the expected hex
    /// digest (first whitespace-delimited token of the asset body).
    async fn fetch_checksum(&self, asset: &ReleaseAsset) -> Result<String, SourceError>;
}
