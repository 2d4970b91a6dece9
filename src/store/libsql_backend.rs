//! libSQL backend — async `ActivityLog` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{ActivityLog, LogRecord};

/// libSQL activity log.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Activity log opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    // Space-separated form used by older log rows
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn row_to_record(row: &libsql::Row) -> Result<LogRecord, libsql::Error> {
    let date_str: Option<String> = row.get(4).ok();
    Ok(LogRecord {
        id: row.get(0)?,
        sender_address: row.get(1).unwrap_or_default(),
        subject: row.get(2).unwrap_or_default(),
        matched_faq_id: row.get(3).ok(),
        timestamp_utc: date_str
            .as_deref()
            .map(parse_datetime)
            .unwrap_or(DateTime::<Utc>::MIN_UTC),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl ActivityLog for LibSqlBackend {
    async fn record(
        &self,
        sender_address: &str,
        subject: &str,
        matched_faq_id: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO email_log (email_address, subject, matched_faq_id, date_utc)
                 VALUES (?1, ?2, ?3, ?4)",
                params![sender_address, subject, opt_text(matched_faq_id), now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record: {e}")))?;

        debug!(
            sender = sender_address,
            faq_id = matched_faq_id.unwrap_or("-"),
            "Activity logged"
        );
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<LogRecord>, DatabaseError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = self
            .conn()
            .query(
                "SELECT id, email_address, subject, matched_faq_id, date_utc
                 FROM email_log ORDER BY id DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("recent: {e}")))?
        {
            records.push(
                row_to_record(&row).map_err(|e| DatabaseError::Query(format!("recent: {e}")))?,
            );
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    #[tokio::test]
    async fn record_and_read_back() {
        let db = test_db().await;
        let before = Utc::now();
        db.record("dana@uni.edu", "Wifi down", Some("1")).await.unwrap();

        let records = db.recent(10).await.unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.sender_address, "dana@uni.edu");
        assert_eq!(record.subject, "Wifi down");
        assert_eq!(record.matched_faq_id.as_deref(), Some("1"));
        assert!(record.timestamp_utc >= before - chrono::Duration::seconds(1));
    }

    #[tokio::test]
    async fn escalation_is_stored_as_null() {
        let db = test_db().await;
        db.record("dana@uni.edu", "Parking question", None).await.unwrap();

        let mut rows = db
            .conn()
            .query("SELECT COUNT(*) FROM email_log WHERE matched_faq_id IS NULL", ())
            .await
            .unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 1);

        let records = db.recent(1).await.unwrap();
        assert_eq!(records[0].matched_faq_id, None);
    }

    #[tokio::test]
    async fn duplicate_records_are_kept() {
        let db = test_db().await;
        db.record("dana@uni.edu", "Wifi down", Some("1")).await.unwrap();
        db.record("dana@uni.edu", "Wifi down", Some("1")).await.unwrap();
        assert_eq!(db.recent(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn recent_is_newest_first_and_limited() {
        let db = test_db().await;
        for subject in ["first", "second", "third"] {
            db.record("a@uni.edu", subject, None).await.unwrap();
        }
        let records = db.recent(2).await.unwrap();
        let subjects: Vec<&str> = records.iter().map(|r| r.subject.as_str()).collect();
        assert_eq!(subjects, ["third", "second"]);
        assert!(records[0].id > records[1].id);
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logs").join("auto_reply_log.db");
        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.record("a@uni.edu", "Laundry", Some("7")).await.unwrap();
        }
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        let records = db.recent(10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].matched_faq_id.as_deref(), Some("7"));
    }

    #[test]
    fn parse_datetime_formats() {
        let rfc = parse_datetime("2024-09-01T12:00:00+00:00");
        let naive = parse_datetime("2024-09-01 12:00:00");
        let fractional = parse_datetime("2024-09-01 12:00:00.250000");
        assert_eq!(rfc, naive);
        assert_eq!(fractional.timestamp(), naive.timestamp());
        assert_eq!(parse_datetime("yesterday"), DateTime::<Utc>::MIN_UTC);
    }
}
