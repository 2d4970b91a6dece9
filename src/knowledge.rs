//! FAQ knowledge base — CSV loading, keyword normalization, batch validation.
//!
//! The source is a CSV file with at least the columns `id`, `keywords`,
//! `answer_text` and `link`. Rows are read in full, then validated as a batch:
//! a single [`KnowledgeBaseError::InvalidRows`] lists every malformed row.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{KnowledgeBaseError, RowError};

/// Columns every knowledge base source must provide.
pub const REQUIRED_COLUMNS: [&str; 4] = ["id", "keywords", "answer_text", "link"];

/// A normalized keyword with its pre-compiled literal pattern.
#[derive(Debug, Clone)]
pub struct Keyword {
    text: String,
    pattern: Regex,
}

impl Keyword {
    fn new(text: String) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&regex::escape(&text))?;
        Ok(Self { text, pattern })
    }

    /// The lowercase keyword text.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Literal pattern used by the match engine.
    pub(crate) fn pattern(&self) -> &Regex {
        &self.pattern
    }
}

impl PartialEq for Keyword {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

/// One knowledge base row.
#[derive(Debug, Clone, PartialEq)]
pub struct FaqEntry {
    pub id: String,
    pub keywords: Vec<Keyword>,
    pub answer_text: String,
    pub link: String,
}

impl FaqEntry {
    /// Keyword texts in stored order.
    pub fn keyword_texts(&self) -> impl Iterator<Item = &str> {
        self.keywords.iter().map(Keyword::as_str)
    }
}

/// Immutable, ordered set of FAQ entries. Row order is match precedence.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    entries: Vec<FaqEntry>,
}

/// Raw CSV row before validation.
#[derive(Debug, Deserialize)]
struct FaqRow {
    id: String,
    keywords: Option<String>,
    answer_text: String,
    link: String,
}

impl KnowledgeBase {
    /// Load a knowledge base from a CSV file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KnowledgeBaseError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| KnowledgeBaseError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let kb = Self::from_reader(file, &path.display().to_string())?;
        info!(
            path = %path.display(),
            entries = kb.len(),
            "Knowledge base loaded"
        );
        Ok(kb)
    }

    /// Load a knowledge base from any CSV reader.
    ///
    /// `source_name` only appears in error messages.
    pub fn from_reader<R: Read>(reader: R, source_name: &str) -> Result<Self, KnowledgeBaseError> {
        let csv_error = |e: csv::Error| KnowledgeBaseError::Csv {
            source_name: source_name.to_string(),
            reason: e.to_string(),
        };

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let headers = reader.headers().map_err(csv_error)?.clone();
        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|col| !headers.iter().any(|h| h == *col))
            .map(|col| col.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(KnowledgeBaseError::MissingColumns {
                source_name: source_name.to_string(),
                missing,
            });
        }

        let mut entries = Vec::new();
        let mut invalid = Vec::new();
        let mut seen_ids = HashSet::new();

        for (index, result) in reader.deserialize::<FaqRow>().enumerate() {
            let row = index + 1;
            match result {
                Ok(raw) => match validate_row(raw, &mut seen_ids) {
                    Ok(entry) => entries.push(entry),
                    Err(reason) => invalid.push(RowError { row, reason }),
                },
                Err(e) => invalid.push(RowError {
                    row,
                    reason: e.to_string(),
                }),
            }
        }

        if !invalid.is_empty() {
            return Err(KnowledgeBaseError::InvalidRows {
                source_name: source_name.to_string(),
                rows: invalid,
            });
        }

        if entries.is_empty() {
            warn!(
                source = source_name,
                "Knowledge base has no entries; every message will be escalated"
            );
        }

        Ok(Self { entries })
    }

    /// Entries in match-precedence order.
    pub fn entries(&self) -> &[FaqEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn get(&self, id: &str) -> Option<&FaqEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}

/// Split a keyword field on commas, trim, lowercase, drop empties and duplicates.
pub fn normalize_keywords(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.split(',')
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .filter(|k| seen.insert(k.clone()))
        .collect()
}

fn validate_row(raw: FaqRow, seen_ids: &mut HashSet<String>) -> Result<FaqEntry, String> {
    let id = raw.id.trim().to_string();
    if id.is_empty() {
        return Err("empty id".into());
    }
    if !seen_ids.insert(id.clone()) {
        return Err(format!("duplicate id {id}"));
    }

    let keywords = normalize_keywords(raw.keywords.as_deref().unwrap_or_default());
    if keywords.is_empty() {
        return Err(format!("entry {id} has no keywords"));
    }
    let keywords = keywords
        .into_iter()
        .map(|k| Keyword::new(k).map_err(|e| format!("entry {id}: keyword pattern: {e}")))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(FaqEntry {
        id,
        keywords,
        answer_text: raw.answer_text,
        link: raw.link.trim().to_string(),
    })
}
