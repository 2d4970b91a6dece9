//! Keyword match engine.
//!
//! First-match policy: entries are tried in knowledge base order and the first
//! entry with any keyword occurring as a whole word wins. Where in the text the
//! keyword appears does not matter.
//!
//! Word boundaries: an occurrence counts when the characters immediately
//! before and after it are absent or not alphanumeric according to Unicode
//! (`char::is_alphanumeric`). Underscore and punctuation act as boundaries, so
//! `"wifi"` matches `"wifi_down"` but `"key"` never matches `"keyboard"`.

use tracing::debug;

use crate::knowledge::{FaqEntry, Keyword, KnowledgeBase};
use crate::pipeline::types::MatchResult;

/// Stateless matcher over a [`KnowledgeBase`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchEngine;

impl MatchEngine {
    /// Find the first FAQ entry whose keyword occurs in `subject` or `body`.
    pub fn find<'kb>(&self, subject: &str, body: &str, kb: &'kb KnowledgeBase) -> MatchResult<'kb> {
        let text = normalize_text(subject, body);

        for entry in kb.entries() {
            if let Some(keyword) = first_matching_keyword(entry, &text) {
                debug!(faq_id = %entry.id, keyword = keyword.as_str(), "Knowledge base match");
                return MatchResult::Matched(entry);
            }
        }

        MatchResult::NoMatch
    }
}

/// Subject and body joined by a space and lowercased the same way keywords are.
pub fn normalize_text(subject: &str, body: &str) -> String {
    format!("{subject} {body}").to_lowercase()
}

fn first_matching_keyword<'e>(entry: &'e FaqEntry, text: &str) -> Option<&'e Keyword> {
    entry
        .keywords
        .iter()
        .find(|keyword| occurs_as_whole_word(keyword, text))
}

/// Check every occurrence, overlapping ones included.
fn occurs_as_whole_word(keyword: &Keyword, text: &str) -> bool {
    let mut start = 0;
    while start <= text.len() {
        let Some(found) = keyword.pattern().find_at(text, start) else {
            return false;
        };
        if is_boundary_before(text, found.start()) && is_boundary_after(text, found.end()) {
            return true;
        }
        // Step one character past the start of this occurrence.
        start = found.start()
            + text[found.start()..]
                .chars()
                .next()
                .map_or(1, char::len_utf8);
    }
    false
}

fn is_boundary_before(text: &str, at: usize) -> bool {
    text[..at].chars().next_back().is_none_or(|c| !c.is_alphanumeric())
}

fn is_boundary_after(text: &str, at: usize) -> bool {
    text[at..].chars().next().is_none_or(|c| !c.is_alphanumeric())
}
