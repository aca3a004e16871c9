//! Firmware records and the append-only update log
//!
//! A [`FirmwareRecord`] is the per-(device, component) belief about what is
//! currently installed. It is an audit record updated only by a successful
//! install - it is never re-verified against the physical device. The
//! [`UpdateLogEntry`] history is write-once and is the sole source of truth
//! for what happened, independent of the latest record state.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a firmware record.
///
/// The update engine only ever writes `Current`; the other values are
/// accepted and persisted for external tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Current,
    Available,
    Deprecated,
    Pending,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Current => "current",
            RecordStatus::Available => "available",
            RecordStatus::Deprecated => "deprecated",
            RecordStatus::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "current" => Some(RecordStatus::Current),
            "available" => Some(RecordStatus::Available),
            "deprecated" => Some(RecordStatus::Deprecated),
            "pending" => Some(RecordStatus::Pending),
            _ => None,
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One firmware record per (device, component) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareRecord {
    /// Device identifier, member of the fleet roster.
    pub device: String,
    /// Component name (e.g. `os`, `kernel`, `bootloader`). The set is
    /// closed per deployment via configuration.
    pub component: String,
    /// Version string, meaningful only through `FwVersion` ordering.
    pub version: String,
    /// Calendar date of the release (may differ from when it was applied).
    pub release_date: NaiveDate,
    /// Hex-encoded SHA256 of the installed artifact. Empty for seeded
    /// records that predate any verified install.
    pub checksum: String,
    pub status: RecordStatus,
    /// Provenance only - not used in control decisions.
    pub download_url: String,
    pub notes: String,
    /// Timestamp of the last write to this record.
    pub created_at: DateTime<Utc>,
}

/// Terminal status of one update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    Success,
    Failed,
}

impl UpdateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStatus::Success => "success",
            UpdateStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(UpdateStatus::Success),
            "failed" => Some(UpdateStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable row of the update log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateLogEntry {
    /// Auto-incrementing id assigned by the store; 0 before insertion.
    pub id: i64,
    pub device: String,
    pub component: String,
    pub from_version: String,
    pub to_version: String,
    pub status: UpdateStatus,
    pub applied_at: DateTime<Utc>,
}

impl UpdateLogEntry {
    /// Build an entry for a new attempt, id left for the store to assign.
    pub fn attempt(
        device: &str,
        component: &str,
        from_version: &str,
        to_version: &str,
        status: UpdateStatus,
        applied_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            device: device.to_string(),
            component: component.to_string(),
            from_version: from_version.to_string(),
            to_version: to_version.to_string(),
            status,
            applied_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for s in ["current", "available", "deprecated", "pending"] {
            let parsed = RecordStatus::parse(s).unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert!(RecordStatus::parse("unknown").is_none());
    }

    #[test]
    fn test_update_status_roundtrip() {
        assert_eq!(UpdateStatus::parse("success"), Some(UpdateStatus::Success));
        assert_eq!(UpdateStatus::parse("failed"), Some(UpdateStatus::Failed));
        assert!(UpdateStatus::parse("partial").is_none());
    }
}
