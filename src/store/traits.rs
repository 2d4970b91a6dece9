//! `ActivityLog` trait — the durable record of what was done with each message.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;

/// One row of the activity log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub id: i64,
    pub sender_address: String,
    pub subject: String,
    /// `None` for escalated messages.
    pub matched_faq_id: Option<String>,
    pub timestamp_utc: DateTime<Utc>,
}

/// Append-only activity log.
///
/// Every call to `record` adds a row. Nothing is deduplicated, so processing
/// the same message twice yields two rows.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    /// Append a record stamped with the current UTC time.
    async fn record(
        &self,
        sender_address: &str,
        subject: &str,
        matched_faq_id: Option<&str>,
    ) -> Result<(), DatabaseError>;

    /// Most recent records, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<LogRecord>, DatabaseError>;
}
