//! Router — turns a match result into an [`Action`].
//!
//! `decide` is pure: no network or disk access. The orchestrator executes the returned
//! action through the mailbox.

use std::path::Path;

use crate::error::ConfigError;
use crate::pipeline::types::{Action, InboundMessage, MatchResult, OutboundEmail};

/// Folder escalated messages are moved to unless configured otherwise.
pub const DEFAULT_REVIEW_FOLDER: &str = "ManualReview";

/// Salutation used when the sender has no display name.
pub const DEFAULT_FALLBACK_NAME: &str = "Student";

pub const DEFAULT_ORGANIZATION: &str = "Housing & Residential Education";

pub const DEFAULT_SIGNATURE: &str = "The Housing Ambassador Team";

const DEFAULT_TEMPLATE: &str = "\
Hello {name},

Thank you for contacting {organization}!

Based on your question, here's some info that might help:

{answer}

For more details, check out:
{link}

If this doesn't address your question fully, feel free to reply or call us anytime.

Best regards,
{signature}
";

/// Placeholders a template must contain.
const REQUIRED_PLACEHOLDERS: [&str; 2] = ["{answer}", "{link}"];

/// Auto-reply body template.
///
/// Placeholders: `{name}`, `{answer}`, `{link}`, `{organization}`, `{signature}`.
/// Substitution is single-pass, so values containing `{...}` are inserted verbatim.
#[derive(Debug, Clone)]
pub struct ReplyTemplate {
    body: String,
    fallback_name: String,
    organization: String,
    signature: String,
}

impl Default for ReplyTemplate {
    fn default() -> Self {
        Self {
            body: DEFAULT_TEMPLATE.to_string(),
            fallback_name: DEFAULT_FALLBACK_NAME.to_string(),
            organization: DEFAULT_ORGANIZATION.to_string(),
            signature: DEFAULT_SIGNATURE.to_string(),
        }
    }
}

impl ReplyTemplate {
    /// Use a custom body. It must contain `{answer}` and `{link}`.
    pub fn with_body(mut self, body: impl Into<String>) -> Result<Self, ConfigError> {
        let body = body.into();
        let missing: Vec<&str> = REQUIRED_PLACEHOLDERS
            .iter()
            .copied()
            .filter(|p| !body.contains(p))
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "reply template".into(),
                message: format!("missing placeholder(s) {}", missing.join(", ")),
            });
        }
        self.body = body;
        Ok(self)
    }

    /// Load a custom body from a file.
    pub fn with_body_file(self, path: &Path) -> Result<Self, ConfigError> {
        let body = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.with_body(body)
    }

    pub fn with_fallback_name(mut self, name: impl Into<String>) -> Self {
        self.fallback_name = name.into();
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = organization.into();
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }

    /// Render the body for one reply.
    pub fn render(&self, sender_name: Option<&str>, answer: &str, link: &str) -> String {
        let name = sender_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(self.fallback_name.as_str());

        let mut out = String::with_capacity(self.body.len() + answer.len() + link.len());
        let mut rest = self.body.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open..];
            let close = after.find('}');
            let value = close.and_then(|close| match &after[1..close] {
                "name" => Some(name),
                "answer" => Some(answer),
                "link" => Some(link),
                "organization" => Some(self.organization.as_str()),
                "signature" => Some(self.signature.as_str()),
                _ => None,
            });
            match (value, close) {
                (Some(value), Some(close)) => {
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                _ => {
                    out.push('{');
                    rest = &after[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Decides between auto-reply and escalation.
#[derive(Debug, Clone)]
pub struct Router {
    template: ReplyTemplate,
    review_folder: String,
}

impl Default for Router {
    fn default() -> Self {
        Self::new(ReplyTemplate::default(), DEFAULT_REVIEW_FOLDER)
    }
}

impl Router {
    pub fn new(template: ReplyTemplate, review_folder: impl Into<String>) -> Self {
        Self {
            template,
            review_folder: review_folder.into(),
        }
    }

    /// `Matched` → reply to the sender with the FAQ answer; `NoMatch` → escalate.
    pub fn decide(&self, message: &InboundMessage, result: &MatchResult<'_>) -> Action {
        match result {
            MatchResult::Matched(faq) => Action::AutoReply {
                faq_id: faq.id.clone(),
                reply: OutboundEmail {
                    to: message.sender_address.clone(),
                    subject: format!("Re: {}", message.subject),
                    body: self.template.render(
                        message.sender_name.as_deref(),
                        &faq.answer_text,
                        &faq.link,
                    ),
                },
            },
            MatchResult::NoMatch => Action::Escalate {
                target_folder: self.review_folder.clone(),
            },
        }
    }
}
