//! Shared types for the matching-and-routing pipeline.

use std::fmt;

use crate::knowledge::FaqEntry;

// ── Inbound message ─────────────────────────────────────────────────

/// An unread message as reported by the mailbox collaborator.
///
/// The pipeline only reads it; flags and folders are changed through the
/// [`Mailbox`](crate::channels::Mailbox) trait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Mailbox-native identifier (IMAP UID for [`ImapMailbox`](crate::channels::ImapMailbox)).
    pub id: String,
    /// Sender email address.
    pub sender_address: String,
    /// Human-readable sender name (if available).
    pub sender_name: Option<String>,
    /// Subject line; empty when the message has none.
    pub subject: String,
    /// Plain-text body; empty when the message has none.
    pub body: String,
    /// Whether the mailbox already considers the message read.
    pub is_read: bool,
}

// ── Match result ────────────────────────────────────────────────────

/// Outcome of matching one message against the knowledge base.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchResult<'kb> {
    NoMatch,
    Matched(&'kb FaqEntry),
}

impl<'kb> MatchResult<'kb> {
    pub fn faq(&self) -> Option<&'kb FaqEntry> {
        match *self {
            MatchResult::Matched(faq) => Some(faq),
            MatchResult::NoMatch => None,
        }
    }

    pub fn faq_id(&self) -> Option<&'kb str> {
        self.faq().map(|f| f.id.as_str())
    }
}

// ── Action ──────────────────────────────────────────────────────────

/// A new outbound email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// What to do with a message. Produced by the router, executed by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send the templated answer, then mark the message read.
    AutoReply { faq_id: String, reply: OutboundEmail },
    /// Move the message to a review folder for a human.
    Escalate { target_folder: String },
}

impl Action {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Action::AutoReply { .. } => "auto_reply",
            Action::Escalate { .. } => "escalate",
        }
    }
}

// ── Run results ─────────────────────────────────────────────────────

/// What happened to one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Replied { faq_id: String },
    Escalated { folder: String },
    /// Read by another client between fetch and processing.
    Skipped,
}

/// A message whose processing failed. The run continued past it.
#[derive(Debug, Clone)]
pub struct MessageFailure {
    pub message_id: String,
    pub sender_address: String,
    pub subject: String,
    pub error: String,
}

/// Aggregated result of one run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub fetched: usize,
    pub replied: usize,
    pub escalated: usize,
    pub skipped: usize,
    pub failures: Vec<MessageFailure>,
}

impl RunSummary {
    pub fn record_outcome(&mut self, outcome: &MessageOutcome) {
        match outcome {
            MessageOutcome::Replied { .. } => self.replied += 1,
            MessageOutcome::Escalated { .. } => self.escalated += 1,
            MessageOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Processed {} message(s): {} auto-replied, {} escalated for manual review, \
             {} skipped, {} failed.",
            self.fetched,
            self.replied,
            self.escalated,
            self.skipped,
            self.failures.len()
        )?;
        for failure in &self.failures {
            write!(
                f,
                "\n  - message {} from {} ({:?}): {}",
                failure.message_id, failure.sender_address, failure.subject, failure.error
            )?;
        }
        Ok(())
    }
}
