//! Orchestrator — one pass over the unread inbox.
//!
//! For each fetched message: match, route, execute the action through the
//! mailbox, then append to the activity log. A failure on one message is
//! recorded in the summary and the batch continues. Only a failed fetch aborts
//! the run.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channels::Mailbox;
use crate::error::{Error, MessageError};
use crate::knowledge::KnowledgeBase;
use crate::pipeline::matcher::MatchEngine;
use crate::pipeline::router::Router;
use crate::pipeline::types::{Action, InboundMessage, MessageFailure, MessageOutcome, RunSummary};
use crate::store::ActivityLog;

pub struct Orchestrator {
    mailbox: Arc<dyn Mailbox>,
    activity_log: Arc<dyn ActivityLog>,
    knowledge_base: Arc<KnowledgeBase>,
    matcher: MatchEngine,
    router: Router,
    batch_limit: usize,
}

impl Orchestrator {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        activity_log: Arc<dyn ActivityLog>,
        knowledge_base: Arc<KnowledgeBase>,
        router: Router,
        batch_limit: usize,
    ) -> Self {
        Self {
            mailbox,
            activity_log,
            knowledge_base,
            matcher: MatchEngine,
            router,
            batch_limit,
        }
    }

    /// Process up to `batch_limit` unread messages.
    ///
    /// Messages are handled sequentially in fetch order. Returns `Err` only when
    /// the inbox could not be read.
    pub async fn run_once(&self) -> Result<RunSummary, Error> {
        let run_id = Uuid::new_v4();
        let messages = self.mailbox.fetch_unread(self.batch_limit).await?;

        info!(
            run_id = %run_id,
            count = messages.len(),
            limit = self.batch_limit,
            "Fetched unread messages"
        );

        let mut summary = RunSummary {
            fetched: messages.len(),
            ..Default::default()
        };

        for message in &messages {
            match self.process_message(message).await {
                Ok(outcome) => {
                    debug!(
                        run_id = %run_id,
                        id = %message.id,
                        outcome = ?outcome,
                        "Message handled"
                    );
                    summary.record_outcome(&outcome);
                }
                Err(e) => {
                    error!(
                        run_id = %run_id,
                        id = %message.id,
                        sender = %message.sender_address,
                        error = %e,
                        "Failed to process message"
                    );
                    summary.failures.push(MessageFailure {
                        message_id: message.id.clone(),
                        sender_address: message.sender_address.clone(),
                        subject: message.subject.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            run_id = %run_id,
            replied = summary.replied,
            escalated = summary.escalated,
            skipped = summary.skipped,
            failed = summary.failures.len(),
            "Run complete"
        );
        Ok(summary)
    }

    /// Handle one message.
    ///
    /// A row is written once the outward effect happened: after a reply was sent
    /// (even if marking it read then fails) or after the message was moved.
    async fn process_message(
        &self,
        message: &InboundMessage,
    ) -> Result<MessageOutcome, MessageError> {
        if message.is_read {
            warn!(id = %message.id, "Message already read, skipping");
            return Ok(MessageOutcome::Skipped);
        }

        let result = self
            .matcher
            .find(&message.subject, &message.body, &self.knowledge_base);
        let action = self.router.decide(message, &result);
        debug!(id = %message.id, action = action.label(), "Routed message");

        match action {
            Action::AutoReply { faq_id, reply } => {
                self.mailbox.send(&reply).await?;
                let marked = self.mailbox.mark_read(&message.id).await;
                self.activity_log
                    .record(
                        &message.sender_address,
                        &message.subject,
                        Some(faq_id.as_str()),
                    )
                    .await?;
                if let Err(e) = marked {
                    warn!(id = %message.id, error = %e, "Reply sent but message left unread");
                    return Err(e.into());
                }
                info!(id = %message.id, faq_id = %faq_id, to = %reply.to, "Auto-replied");
                Ok(MessageOutcome::Replied { faq_id })
            }
            Action::Escalate { target_folder } => {
                self.mailbox
                    .move_to_folder(&message.id, &target_folder)
                    .await?;
                self.activity_log
                    .record(&message.sender_address, &message.subject, None)
                    .await?;
                info!(id = %message.id, folder = %target_folder, "Escalated for manual review");
                Ok(MessageOutcome::Escalated {
                    folder: target_folder,
                })
            }
        }
    }
}
