//! Roost Core - Types and contracts for fleet firmware updates
//!
//! This crate provides the foundational types for the Roost system:
//! - Firmware version ordering used everywhere "newer" is decided
//! - Firmware records and the append-only update log
//! - Release metadata and payload asset resolution
//! - Content digest helpers for download verification
//! - Collaborator traits (`ReleaseSource`, `Installer`, `StateStore`)
//!   so the orchestrator can be exercised against in-memory fakes

pub mod digest;
pub mod error;
pub mod install;
pub mod record;
pub mod release;
pub mod store;
pub mod version;

pub use digest::{digests_match, sha256_hex, StreamingDigest};
pub use error::UpdateError;
pub use install::{InstallError, InstallReceipt, Installer, Verification, DIGEST_MARKER};
pub use record::{FirmwareRecord, RecordStatus, UpdateLogEntry, UpdateStatus};
pub use release::{ReleaseAsset, ReleaseMetadata, ReleaseSource, SourceError};
pub use store::{RecordFilter, StateStore, StoreError};
pub use version::FwVersion;
