//! Persistent firmware state contract
//!
//! Two relations: firmware records keyed by (device, component), and an
//! append-only update log ordered by an auto-incrementing id. Records are
//! overwritten in place by successful installs and never deleted; log
//! rows are immutable once written.

use thiserror::Error;

use crate::record::{FirmwareRecord, RecordStatus, UpdateLogEntry};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

/// Filters for listing firmware records.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub device: Option<String>,
    pub component: Option<String>,
    pub status: Option<RecordStatus>,
}

/// Persistent per-(device, component) firmware state plus update history.
///
/// Implementations must serialize their own writes; reads may be served
/// concurrently. `commit_success` applies a record upsert and a log
/// append as one unit so the log never references a state that was never
/// durably recorded.
pub trait StateStore: Send + Sync {
    fn get(&self, device: &str, component: &str) -> Result<Option<FirmwareRecord>, StoreError>;

    /// Records matching the filter, ordered by (device, component).
    fn list(&self, filter: &RecordFilter) -> Result<Vec<FirmwareRecord>, StoreError>;

    /// Replace any existing record for the same (device, component) key.
    fn upsert(&self, record: &FirmwareRecord) -> Result<(), StoreError>;

    /// Append one immutable log entry; returns the assigned id.
    fn append_log(&self, entry: &UpdateLogEntry) -> Result<i64, StoreError>;

    /// Most recent log entries, most-recent-first.
    fn recent_log(&self, limit: usize) -> Result<Vec<UpdateLogEntry>, StoreError>;

    /// Apply the record upsert and success log append together; returns
    /// the assigned log id.
    fn commit_success(
        &self,
        record: &FirmwareRecord,
        entry: &UpdateLogEntry,
    ) -> Result<i64, StoreError>;
}
