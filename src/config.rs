//! Configuration types, read from the environment.
//!
//! Everything goes through a key lookup function so tests can supply values
//! without touching the process environment.

use std::path::PathBuf;
use std::str::FromStr;

use crate::channels::MailboxConfig;
use crate::error::ConfigError;
use crate::pipeline::router::{
    DEFAULT_FALLBACK_NAME, DEFAULT_ORGANIZATION, DEFAULT_REVIEW_FOLDER, DEFAULT_SIGNATURE,
    ReplyTemplate,
};

/// Default maximum number of unread messages handled per run.
pub const DEFAULT_BATCH_LIMIT: usize = 20;

/// Runtime configuration for one run.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mailbox: MailboxConfig,
    /// CSV knowledge base.
    pub knowledge_base_path: PathBuf,
    /// libSQL activity log file.
    pub db_path: PathBuf,
    pub batch_limit: usize,
    pub review_folder: String,
    pub reply: ReplyConfig,
}

/// Values substituted into the auto-reply template.
#[derive(Debug, Clone)]
pub struct ReplyConfig {
    pub fallback_name: String,
    pub organization: String,
    pub signature: String,
    /// Optional file replacing the built-in template body.
    pub template_path: Option<PathBuf>,
}

impl ReplyConfig {
    /// Build the reply template, loading the custom body if one is configured.
    pub fn template(&self) -> Result<ReplyTemplate, ConfigError> {
        let template = ReplyTemplate::default()
            .with_fallback_name(self.fallback_name.clone())
            .with_organization(self.organization.clone())
            .with_signature(self.signature.clone());
        match &self.template_path {
            Some(path) => template.with_body_file(path),
            None => Ok(template),
        }
    }
}

impl AppConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mailbox = MailboxConfig::from_lookup(&lookup)?;

        let batch_limit: usize = parse_or(&lookup, "FAQ_BATCH_LIMIT", DEFAULT_BATCH_LIMIT)?;
        if batch_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "FAQ_BATCH_LIMIT".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(Self {
            mailbox,
            knowledge_base_path: optional(&lookup, "FAQ_KNOWLEDGE_BASE")
                .unwrap_or_else(|| "knowledge_base.csv".into())
                .into(),
            db_path: optional(&lookup, "FAQ_DB_PATH")
                .unwrap_or_else(|| "auto_reply_log.db".into())
                .into(),
            batch_limit,
            review_folder: optional(&lookup, "FAQ_REVIEW_FOLDER")
                .unwrap_or_else(|| DEFAULT_REVIEW_FOLDER.into()),
            reply: ReplyConfig {
                fallback_name: optional(&lookup, "FAQ_FALLBACK_NAME")
                    .unwrap_or_else(|| DEFAULT_FALLBACK_NAME.into()),
                organization: optional(&lookup, "FAQ_ORGANIZATION")
                    .unwrap_or_else(|| DEFAULT_ORGANIZATION.into()),
                signature: optional(&lookup, "FAQ_SIGNATURE")
                    .unwrap_or_else(|| DEFAULT_SIGNATURE.into()),
                template_path: optional(&lookup, "FAQ_REPLY_TEMPLATE").map(PathBuf::from),
            },
        })
    }
}

/// A set, non-blank value (trimmed).
pub(crate) fn optional(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn required(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<String, ConfigError> {
    optional(lookup, key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

/// Parse a value, falling back to `default` when unset. Unparseable values are errors.
pub(crate) fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(lookup, key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}
