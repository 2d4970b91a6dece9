//! Error types for the FAQ responder.

use std::fmt;
use std::path::PathBuf;

/// Top-level error type. Every variant is a failed precondition of a run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Knowledge base error: {0}")]
    KnowledgeBase(#[from] KnowledgeBaseError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Activity log error: {0}")]
    Database(#[from] DatabaseError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Knowledge base load failures. Any of these aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum KnowledgeBaseError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV in {source_name}: {reason}")]
    Csv { source_name: String, reason: String },

    #[error("{source_name} is missing required column(s): {}", .missing.join(", "))]
    MissingColumns {
        source_name: String,
        missing: Vec<String>,
    },

    #[error("{source_name} has {} invalid row(s): {}", .rows.len(), join_rows(.rows))]
    InvalidRows {
        source_name: String,
        rows: Vec<RowError>,
    },
}

/// One malformed knowledge base row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    /// 1-based data row number (header excluded).
    pub row: usize,
    pub reason: String,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.row, self.reason)
    }
}

fn join_rows(rows: &[RowError]) -> String {
    rows.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Mailbox collaborator errors (IMAP and SMTP).
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Authentication failed for {user}: {reason}")]
    AuthFailed { user: String, reason: String },

    #[error("Connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    #[error("IMAP protocol error: {0}")]
    Protocol(String),

    #[error("Failed to fetch unread messages: {0}")]
    FetchFailed(String),

    #[error("Failed to send reply to {to}: {reason}")]
    SendFailed { to: String, reason: String },

    #[error("Failed to mark message {id} as read: {reason}")]
    FlagFailed { id: String, reason: String },

    #[error("Failed to move message {id} to {folder}: {reason}")]
    MoveFailed {
        id: String,
        folder: String,
        reason: String,
    },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Failure while handling a single message. Never aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("action failed: {0}")]
    ActionExecution(#[from] MailboxError),

    #[error("logging failed: {0}")]
    Persist(#[from] DatabaseError),
}
