//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, Result as SqlResult, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
}

const TARGET_COLUMNS: &str = "id, name, address, kind, category, status, latency_ms, last_check, \
     anomaly_threshold_ms, avg_latency_ms, stddev_latency_ms, last_error, last_status_code, \
     tls_info, domain_info, dns_info, ip_info, \
     notify_email, notify_downtime, notify_tls_expiry, notify_domain_expiry";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with the embedded migration.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    // --- Target CRUD ---

    /// Add a new target and return its ID.
    pub fn add_target(&self, target: &mut Target) -> Result<i64, DbError> {
        if target.anomaly_threshold_ms <= 0.0 {
            target.anomaly_threshold_ms = 1000.0;
        }

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO targets (name, address, kind, category, anomaly_threshold_ms, \
             notify_email, notify_downtime, notify_tls_expiry, notify_domain_expiry) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                target.name,
                target.address,
                target.kind().as_str(),
                target.category,
                target.anomaly_threshold_ms,
                target.notifications.email,
                target.notifications.downtime,
                target.notifications.tls_expiry,
                target.notifications.domain_expiry,
            ],
        )?;
        let id = conn.last_insert_rowid();
        target.id = id;
        Ok(id)
    }

    /// Update a target's configuration and enrichment. Probe-written
    /// fields (status, latency, statistics) are left to
    /// [`Store::apply_probe_update`].
    pub fn update_target(&self, target: &Target) -> Result<(), DbError> {
        let (tls, domain, dns, ip) = enrichment_blobs(&target.enrichment);

        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE targets SET name=?1, address=?2, kind=?3, category=?4, \
             anomaly_threshold_ms=?5, notify_email=?6, notify_downtime=?7, \
             notify_tls_expiry=?8, notify_domain_expiry=?9, \
             tls_info=?10, domain_info=?11, dns_info=?12, ip_info=?13 \
             WHERE id=?14",
            params![
                target.name,
                target.address,
                target.kind().as_str(),
                target.category,
                target.anomaly_threshold_ms,
                target.notifications.email,
                target.notifications.downtime,
                target.notifications.tls_expiry,
                target.notifications.domain_expiry,
                tls,
                domain,
                dns,
                ip,
                target.id,
            ],
        )?;

        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Apply the field updates produced by one completed probe.
    pub fn apply_probe_update(&self, id: i64, update: &ProbeUpdate) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();

        let changed = match &update.enrichment {
            None => conn.execute(
                "UPDATE targets SET status=?1, latency_ms=?2, last_check=?3, \
                 avg_latency_ms=?4, stddev_latency_ms=?5, last_error=?6, last_status_code=?7 \
                 WHERE id=?8",
                params![
                    update.status.as_str(),
                    update.latency_ms,
                    format_time(update.last_check),
                    update.avg_latency_ms,
                    update.stddev_latency_ms,
                    update.last_error,
                    update.last_status_code.map(|c| c as i64),
                    id,
                ],
            )?,
            Some(Enrichment::Url { tls, domain, dns }) => conn.execute(
                "UPDATE targets SET status=?1, latency_ms=?2, last_check=?3, \
                 avg_latency_ms=?4, stddev_latency_ms=?5, last_error=?6, last_status_code=?7, \
                 tls_info=?8, domain_info=?9, dns_info=?10 \
                 WHERE id=?11",
                params![
                    update.status.as_str(),
                    update.latency_ms,
                    format_time(update.last_check),
                    update.avg_latency_ms,
                    update.stddev_latency_ms,
                    update.last_error,
                    update.last_status_code.map(|c| c as i64),
                    to_blob(tls),
                    to_blob(domain),
                    to_blob(dns),
                    id,
                ],
            )?,
            Some(Enrichment::Ip { info }) => conn.execute(
                "UPDATE targets SET status=?1, latency_ms=?2, last_check=?3, \
                 avg_latency_ms=?4, stddev_latency_ms=?5, last_error=?6, last_status_code=?7, \
                 ip_info=?8 \
                 WHERE id=?9",
                params![
                    update.status.as_str(),
                    update.latency_ms,
                    format_time(update.last_check),
                    update.avg_latency_ms,
                    update.stddev_latency_ms,
                    update.last_error,
                    update.last_status_code.map(|c| c as i64),
                    to_blob(info),
                    id,
                ],
            )?,
        };

        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Replace a target's enrichment blobs for its own kind only.
    pub fn update_enrichment(&self, id: i64, enrichment: &Enrichment) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();

        let changed = match enrichment {
            Enrichment::Url { tls, domain, dns } => conn.execute(
                "UPDATE targets SET tls_info=?1, domain_info=?2, dns_info=?3 WHERE id=?4",
                params![to_blob(tls), to_blob(domain), to_blob(dns), id],
            )?,
            Enrichment::Ip { info } => conn.execute(
                "UPDATE targets SET ip_info=?1 WHERE id=?2",
                params![to_blob(info), id],
            )?,
        };

        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Get all targets.
    pub fn get_targets(&self) -> Result<Vec<Target>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("SELECT {} FROM targets", TARGET_COLUMNS))?;

        let targets = stmt
            .query_map([], row_to_target)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(targets)
    }

    /// Get a target by ID.
    pub fn get_target(&self, id: i64) -> Result<Target, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {} FROM targets WHERE id = ?1", TARGET_COLUMNS),
            params![id],
            row_to_target,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::NotFound,
            other => DbError::Sqlite(other),
        })
    }

    /// Delete a target and its history.
    pub fn delete_target(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM history WHERE target_id = ?1", params![id])?;
        let changed = conn.execute("DELETE FROM targets WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    // --- History ---

    /// Append one history record and return its ID.
    pub fn add_history(&self, record: &HistoryRecord) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO history (target_id, status, latency_ms, status_code, error, timestamp) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.target_id,
                record.status.as_str(),
                record.latency_ms,
                record.status_code.map(|c| c as i64),
                record.error,
                format_time(record.timestamp),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get a target's history records at or after `since`, oldest first.
    pub fn get_history_since(
        &self,
        target_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<HistoryRecord>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, target_id, status, latency_ms, status_code, error, timestamp \
             FROM history WHERE target_id = ?1 AND timestamp >= ?2 ORDER BY timestamp ASC",
        )?;

        let records = stmt
            .query_map(params![target_id, format_time(since)], |row| {
                let status: String = row.get(2)?;
                let timestamp: String = row.get(6)?;
                Ok(HistoryRecord {
                    id: row.get(0)?,
                    target_id: row.get(1)?,
                    status: TargetStatus::parse(&status),
                    latency_ms: row.get(3)?,
                    status_code: row.get::<_, Option<i64>>(4)?.map(|c| c as u16),
                    error: row.get(5)?,
                    timestamp: parse_db_time(&timestamp).unwrap_or_else(Utc::now),
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(records)
    }
}

fn row_to_target(row: &Row<'_>) -> SqlResult<Target> {
    let kind: String = row.get(3)?;
    let kind = TargetKind::parse(&kind);
    let status: String = row.get(5)?;
    let last_check: Option<String> = row.get(7)?;

    let enrichment = match kind {
        TargetKind::Url => Enrichment::Url {
            tls: from_blob(row.get(13)?),
            domain: from_blob(row.get(14)?),
            dns: from_blob(row.get(15)?),
        },
        TargetKind::Ip => Enrichment::Ip {
            info: from_blob(row.get(16)?),
        },
    };

    Ok(Target {
        id: row.get(0)?,
        name: row.get(1)?,
        address: row.get(2)?,
        category: row.get(4)?,
        status: TargetStatus::parse(&status),
        latency_ms: row.get(6)?,
        last_check: last_check.as_deref().and_then(parse_db_time),
        anomaly_threshold_ms: row.get(8)?,
        avg_latency_ms: row.get(9)?,
        stddev_latency_ms: row.get(10)?,
        last_error: row.get(11)?,
        last_status_code: row.get::<_, Option<i64>>(12)?.map(|c| c as u16),
        notifications: NotifyPrefs {
            email: row.get(17)?,
            downtime: row.get(18)?,
            tls_expiry: row.get(19)?,
            domain_expiry: row.get(20)?,
        },
        enrichment,
    })
}

fn enrichment_blobs(
    enrichment: &Enrichment,
) -> (Option<String>, Option<String>, Option<String>, Option<String>) {
    match enrichment {
        Enrichment::Url { tls, domain, dns } => {
            (to_blob(tls), to_blob(domain), to_blob(dns), None)
        }
        Enrichment::Ip { info } => (None, None, None, to_blob(info)),
    }
}

fn to_blob<T: Serialize>(value: &Option<T>) -> Option<String> {
    value
        .as_ref()
        .and_then(|v| serde_json::to_string(v).ok())
}

fn from_blob<T: DeserializeOwned>(raw: Option<String>) -> Option<T> {
    raw.as_deref().and_then(|s| serde_json::from_str(s).ok())
}

fn format_time(time: DateTime<Utc>) -> String {
    time.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        "%Y-%m-%d %H:%M:%S%.3f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::IpInfo;
    use chrono::Duration;
    use tempfile::NamedTempFile;

    fn test_store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn url_target(name: &str) -> Target {
        Target {
            name: name.to_string(),
            address: format!("https://{}.example.com", name),
            ..Default::default()
        }
    }

    #[test]
    fn test_target_crud() {
        let (_tmp, store) = test_store();

        // Create
        let mut target = url_target("crud");
        let id = store.add_target(&mut target).unwrap();
        assert!(id > 0);

        // Read
        let fetched = store.get_target(id).unwrap();
        assert_eq!(fetched.name, "crud");
        assert_eq!(fetched.status, TargetStatus::Unknown);
        assert_eq!(fetched.kind(), TargetKind::Url);
        assert_eq!(fetched.anomaly_threshold_ms, 1000.0);

        // Update
        let mut updated = fetched;
        updated.name = "renamed".to_string();
        updated.notifications.email = "ops@example.com".to_string();
        store.update_target(&updated).unwrap();

        let fetched = store.get_target(id).unwrap();
        assert_eq!(fetched.name, "renamed");
        assert_eq!(fetched.notifications.email, "ops@example.com");

        // Delete
        store.delete_target(id).unwrap();
        assert!(matches!(store.get_target(id), Err(DbError::NotFound)));
    }

    #[test]
    fn test_missing_target_is_not_found() {
        let (_tmp, store) = test_store();
        assert!(matches!(store.get_target(9999), Err(DbError::NotFound)));
        assert!(matches!(store.delete_target(9999), Err(DbError::NotFound)));
    }

    #[test]
    fn test_history_append_and_query_window() {
        let (_tmp, store) = test_store();
        let mut target = url_target("history");
        let id = store.add_target(&mut target).unwrap();

        let now = Utc::now();
        for (offset_hours, latency) in [(30, 100.0), (2, 200.0), (1, 300.0)] {
            store
                .add_history(&HistoryRecord {
                    id: 0,
                    target_id: id,
                    status: TargetStatus::Up,
                    latency_ms: Some(latency),
                    status_code: Some(200),
                    error: None,
                    timestamp: now - Duration::hours(offset_hours),
                })
                .unwrap();
        }

        // Only the records inside the trailing 24 hours come back
        let window = store.get_history_since(id, now - Duration::hours(24)).unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].latency_ms, Some(200.0));
        assert_eq!(window[1].latency_ms, Some(300.0));
    }

    #[test]
    fn test_failed_check_history_row() {
        let (_tmp, store) = test_store();
        let mut target = url_target("failures");
        let id = store.add_target(&mut target).unwrap();

        store
            .add_history(&HistoryRecord {
                id: 0,
                target_id: id,
                status: TargetStatus::Down,
                latency_ms: Some(5000.0),
                status_code: None,
                error: Some("connection refused".to_string()),
                timestamp: Utc::now(),
            })
            .unwrap();

        let records = store
            .get_history_since(id, Utc::now() - Duration::hours(1))
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TargetStatus::Down);
        assert_eq!(records[0].error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_delete_target_cascades_history() {
        let (_tmp, store) = test_store();
        let mut target = url_target("cascade");
        let id = store.add_target(&mut target).unwrap();

        store
            .add_history(&HistoryRecord {
                id: 0,
                target_id: id,
                status: TargetStatus::Up,
                latency_ms: Some(42.0),
                status_code: Some(200),
                error: None,
                timestamp: Utc::now(),
            })
            .unwrap();

        store.delete_target(id).unwrap();
        let orphans = store
            .get_history_since(id, Utc::now() - Duration::hours(1))
            .unwrap();
        assert!(orphans.is_empty());
    }

    #[test]
    fn test_probe_update_without_enrichment_preserves_blobs() {
        let (_tmp, store) = test_store();
        let mut target = Target {
            name: "gateway".to_string(),
            address: "192.0.2.1".to_string(),
            category: "ip".to_string(),
            enrichment: Enrichment::empty(TargetKind::Ip),
            ..Default::default()
        };
        let id = store.add_target(&mut target).unwrap();

        let info = IpInfo::bare("192.0.2.1");
        store
            .update_enrichment(id, &Enrichment::Ip { info: Some(info.clone()) })
            .unwrap();

        // A degraded probe updates status only and must not touch the blob
        store
            .apply_probe_update(
                id,
                &ProbeUpdate {
                    status: TargetStatus::Down,
                    latency_ms: Some(5000.0),
                    last_check: Utc::now(),
                    avg_latency_ms: None,
                    stddev_latency_ms: None,
                    last_error: Some("host unreachable".to_string()),
                    last_status_code: None,
                    enrichment: None,
                },
            )
            .unwrap();

        let fetched = store.get_target(id).unwrap();
        assert_eq!(fetched.status, TargetStatus::Down);
        match fetched.enrichment {
            Enrichment::Ip { info: Some(stored) } => assert_eq!(stored, info),
            other => panic!("ip enrichment lost: {:?}", other),
        }
    }

    #[test]
    fn test_probe_update_writes_url_blobs() {
        let (_tmp, store) = test_store();
        let mut target = url_target("blobs");
        let id = store.add_target(&mut target).unwrap();

        store
            .apply_probe_update(
                id,
                &ProbeUpdate {
                    status: TargetStatus::Up,
                    latency_ms: Some(120.0),
                    last_check: Utc::now(),
                    avg_latency_ms: Some(110.0),
                    stddev_latency_ms: Some(12.0),
                    last_error: None,
                    last_status_code: Some(200),
                    enrichment: Some(Enrichment::Url {
                        tls: None,
                        domain: None,
                        dns: None,
                    }),
                },
            )
            .unwrap();

        let fetched = store.get_target(id).unwrap();
        assert_eq!(fetched.status, TargetStatus::Up);
        assert_eq!(fetched.latency_ms, Some(120.0));
        assert_eq!(fetched.last_status_code, Some(200));
        assert!(fetched.last_check.is_some());
    }
}
