//! Persistence layer — libSQL-backed activity log.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{ActivityLog, LogRecord};
