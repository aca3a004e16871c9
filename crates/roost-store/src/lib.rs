//! Roost Store - SQLite-backed firmware state
//!
//! Implements the `StateStore` contract from `roost-core` on top of a
//! single SQLite database file. All writes are serialized behind an
//! internal `Mutex<Connection>`; WAL mode lets readers proceed on the
//! SQLite side. A successful update attempt commits its record upsert
//! and log append inside one transaction.

mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use roost_core::record::{FirmwareRecord, RecordStatus, UpdateLogEntry, UpdateStatus};
use roost_core::store::{RecordFilter, StateStore, StoreError};

use schema::apply_schema;

const RECORD_COLUMNS: &str =
    "device, component, version, release_date, checksum, status, download_url, notes, created_at";

/// SQLite-backed firmware state store.
pub struct SqliteStateStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

impl SqliteStateStore {
    /// Open (or create) the database at `path`, applying the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            }
        }
        let conn = Connection::open(path).map_err(db_err)?;
        apply_schema(&conn).map_err(db_err)?;
        info!(path = %path.display(), "Opened firmware state database");
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, for tests and dry experimentation.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        apply_schema(&conn).map_err(db_err)?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection mutex poisoned".to_string()))
    }

    /// Insert records that do not exist yet, leaving existing rows
    /// untouched. Used to seed first observations of a fleet roster.
    pub fn seed_records(&self, records: &[FirmwareRecord]) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let mut inserted = 0;
        for record in records {
            let n = conn
                .execute(
                    &format!(
                        "INSERT OR IGNORE INTO firmware_versions ({RECORD_COLUMNS}) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                    ),
                    params![
                        record.device,
                        record.component,
                        record.version,
                        record.release_date.format("%Y-%m-%d").to_string(),
                        record.checksum,
                        record.status.as_str(),
                        record.download_url,
                        record.notes,
                        record.created_at.to_rfc3339(),
                    ],
                )
                .map_err(db_err)?;
            inserted += n;
        }
        if inserted > 0 {
            debug!(inserted, "Seeded firmware records");
        }
        Ok(inserted)
    }
}

fn decode_record(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        device: row.get(0)?,
        component: row.get(1)?,
        version: row.get(2)?,
        release_date: row.get(3)?,
        checksum: row.get(4)?,
        status: row.get(5)?,
        download_url: row.get(6)?,
        notes: row.get(7)?,
        created_at: row.get(8)?,
    })
}

struct RawRecord {
    device: String,
    component: String,
    version: String,
    release_date: String,
    checksum: String,
    status: String,
    download_url: String,
    notes: String,
    created_at: String,
}

impl RawRecord {
    fn into_record(self) -> Result<FirmwareRecord, StoreError> {
        let release_date = NaiveDate::parse_from_str(&self.release_date, "%Y-%m-%d")
            .map_err(|e| StoreError::Unavailable(format!("corrupt release_date: {e}")))?;
        let created_at = parse_rfc3339(&self.created_at)?;
        let status = RecordStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Unavailable(format!("corrupt status: {}", self.status)))?;
        Ok(FirmwareRecord {
            device: self.device,
            component: self.component,
            version: self.version,
            release_date,
            checksum: self.checksum,
            status,
            download_url: self.download_url,
            notes: self.notes,
            created_at,
        })
    }
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, StoreError> {
    s.parse::<DateTime<Utc>>()
        .map_err(|e| StoreError::Unavailable(format!("corrupt timestamp: {e}")))
}

fn decode_log_row(row: &Row<'_>) -> rusqlite::Result<(i64, String, String, String, String, String, String)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn into_log_entry(
    raw: (i64, String, String, String, String, String, String),
) -> Result<UpdateLogEntry, StoreError> {
    let (id, device, component, from_version, to_version, status, applied_at) = raw;
    let status = UpdateStatus::parse(&status)
        .ok_or_else(|| StoreError::Unavailable(format!("corrupt log status: {status}")))?;
    Ok(UpdateLogEntry {
        id,
        device,
        component,
        from_version,
        to_version,
        status,
        applied_at: parse_rfc3339(&applied_at)?,
    })
}

fn insert_record(conn: &Connection, record: &FirmwareRecord) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO firmware_versions ({RECORD_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
        ),
        params![
            record.device,
            record.component,
            record.version,
            record.release_date.format("%Y-%m-%d").to_string(),
            record.checksum,
            record.status.as_str(),
            record.download_url,
            record.notes,
            record.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn insert_log(conn: &Connection, entry: &UpdateLogEntry) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO update_log (device, component, from_version, to_version, status, applied_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.device,
            entry.component,
            entry.from_version,
            entry.to_version,
            entry.status.as_str(),
            entry.applied_at.to_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

impl StateStore for SqliteStateStore {
    fn get(&self, device: &str, component: &str) -> Result<Option<FirmwareRecord>, StoreError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM firmware_versions \
                     WHERE device = ?1 AND component = ?2"
                ),
                params![device, component],
                decode_record,
            )
            .optional()
            .map_err(db_err)?;
        raw.map(RawRecord::into_record).transpose()
    }

    fn list(&self, filter: &RecordFilter) -> Result<Vec<FirmwareRecord>, StoreError> {
        let conn = self.lock()?;
        let mut sql = format!("SELECT {RECORD_COLUMNS} FROM firmware_versions WHERE 1=1");
        let mut args: Vec<String> = Vec::new();
        if let Some(device) = &filter.device {
            sql.push_str(&format!(" AND device = ?{}", args.len() + 1));
            args.push(device.clone());
        }
        if let Some(component) = &filter.component {
            sql.push_str(&format!(" AND component = ?{}", args.len() + 1));
            args.push(component.clone());
        }
        if let Some(status) = filter.status {
            sql.push_str(&format!(" AND status = ?{}", args.len() + 1));
            args.push(status.as_str().to_string());
        }
        sql.push_str(" ORDER BY device, component");

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), decode_record)
            .map_err(db_err)?;

        let mut records = Vec::new();
        for raw in rows {
            records.push(raw.map_err(db_err)?.into_record()?);
        }
        Ok(records)
    }

    fn upsert(&self, record: &FirmwareRecord) -> Result<(), StoreError> {
        let conn = self.lock()?;
        insert_record(&conn, record).map_err(db_err)
    }

    fn append_log(&self, entry: &UpdateLogEntry) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        insert_log(&conn, entry).map_err(db_err)
    }

    fn recent_log(&self, limit: usize) -> Result<Vec<UpdateLogEntry>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, device, component, from_version, to_version, status, applied_at \
                 FROM update_log ORDER BY id DESC LIMIT ?1",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit as i64], decode_log_row)
            .map_err(db_err)?;

        let mut entries = Vec::new();
        for raw in rows {
            entries.push(into_log_entry(raw.map_err(db_err)?)?);
        }
        Ok(entries)
    }

    fn commit_success(
        &self,
        record: &FirmwareRecord,
        entry: &UpdateLogEntry,
    ) -> Result<i64, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        insert_record(&tx, record).map_err(db_err)?;
        let id = insert_log(&tx, entry).map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(device: &str, component: &str, version: &str) -> FirmwareRecord {
        FirmwareRecord {
            device: device.to_string(),
            component: component.to_string(),
            version: version.to_string(),
            release_date: NaiveDate::from_ymd_opt(2024, 10, 1).unwrap(),
            checksum: "abc123".to_string(),
            status: RecordStatus::Current,
            download_url: "https://example.com/fw.tar.gz".to_string(),
            notes: "test".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 10, 1, 12, 0, 0).unwrap(),
        }
    }

    fn entry(device: &str, from: &str, to: &str, status: UpdateStatus) -> UpdateLogEntry {
        UpdateLogEntry::attempt(
            device,
            "kernel",
            from,
            to,
            status,
            Utc.with_ymd_and_hms(2024, 10, 2, 9, 30, 0).unwrap(),
        )
    }

    #[test]
    fn test_upsert_get_roundtrip() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        let rec = record("alice", "kernel", "6.6.31");
        store.upsert(&rec).unwrap();

        let loaded = store.get("alice", "kernel").unwrap().unwrap();
        assert_eq!(loaded.version, "6.6.31");
        assert_eq!(loaded.status, RecordStatus::Current);
        assert_eq!(loaded.release_date, rec.release_date);
        assert_eq!(loaded.created_at, rec.created_at);

        assert!(store.get("alice", "bootloader").unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces_same_key() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        store.upsert(&record("alice", "kernel", "6.6.31")).unwrap();
        store.upsert(&record("alice", "kernel", "6.6.51")).unwrap();

        let all = store.list(&RecordFilter::default()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].version, "6.6.51");
    }

    #[test]
    fn test_list_ordering_and_filters() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        store.upsert(&record("bob", "os", "2024.11")).unwrap();
        store.upsert(&record("alice", "kernel", "6.6.31")).unwrap();
        store.upsert(&record("alice", "bootloader", "1.2")).unwrap();

        let all = store.list(&RecordFilter::default()).unwrap();
        let keys: Vec<(String, String)> = all
            .iter()
            .map(|r| (r.device.clone(), r.component.clone()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("alice".to_string(), "bootloader".to_string()),
                ("alice".to_string(), "kernel".to_string()),
                ("bob".to_string(), "os".to_string()),
            ]
        );

        let filtered = store
            .list(&RecordFilter {
                device: Some("alice".to_string()),
                component: Some("kernel".to_string()),
                status: None,
            })
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].version, "6.6.31");

        let none = store
            .list(&RecordFilter {
                status: Some(RecordStatus::Deprecated),
                ..Default::default()
            })
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_recent_log_most_recent_first() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        let first = store
            .append_log(&entry("alice", "6.6.20", "6.6.31", UpdateStatus::Success))
            .unwrap();
        let second = store
            .append_log(&entry("alice", "6.6.31", "6.6.51", UpdateStatus::Failed))
            .unwrap();
        assert!(second > first);

        let log = store.recent_log(10).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].id, second);
        assert_eq!(log[0].status, UpdateStatus::Failed);
        assert_eq!(log[1].id, first);

        let limited = store.recent_log(1).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, second);
    }

    #[test]
    fn test_commit_success_applies_both() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        let rec = record("alice", "kernel", "6.6.51");
        let id = store
            .commit_success(&rec, &entry("alice", "6.6.31", "6.6.51", UpdateStatus::Success))
            .unwrap();

        let loaded = store.get("alice", "kernel").unwrap().unwrap();
        assert_eq!(loaded.version, "6.6.51");
        let log = store.recent_log(1).unwrap();
        assert_eq!(log[0].id, id);
        assert_eq!(log[0].to_version, "6.6.51");
    }

    #[test]
    fn test_seed_does_not_overwrite() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        store.upsert(&record("alice", "kernel", "6.6.51")).unwrap();

        let inserted = store
            .seed_records(&[
                record("alice", "kernel", "6.6.20"),
                record("bob", "kernel", "6.6.20"),
            ])
            .unwrap();
        assert_eq!(inserted, 1);

        let alice = store.get("alice", "kernel").unwrap().unwrap();
        assert_eq!(alice.version, "6.6.51");
        let bob = store.get("bob", "kernel").unwrap().unwrap();
        assert_eq!(bob.version, "6.6.20");
    }

    #[test]
    fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("firmware.db");
        {
            let store = SqliteStateStore::open(&db).unwrap();
            store.upsert(&record("alice", "kernel", "6.6.31")).unwrap();
        }
        let store = SqliteStateStore::open(&db).unwrap();
        assert_eq!(
            store.get("alice", "kernel").unwrap().unwrap().version,
            "6.6.31"
        );
    }
}
