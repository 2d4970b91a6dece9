//! Mailbox abstraction — the only way the pipeline touches mail.

pub mod email;
pub mod imap;

use async_trait::async_trait;

use crate::error::MailboxError;
use crate::pipeline::types::{InboundMessage, OutboundEmail};

pub use email::{ImapMailbox, MailboxConfig};

/// Mailbox collaborator used by the orchestrator.
///
/// Implementations own authentication and transport. `fetch_unread` must not
/// change the read state of the messages it returns.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Up to `limit` unread messages, in the order the server reports them.
    async fn fetch_unread(&self, limit: usize) -> Result<Vec<InboundMessage>, MailboxError>;

    /// Send a new message.
    async fn send(&self, email: &OutboundEmail) -> Result<(), MailboxError>;

    /// Mark a message read.
    async fn mark_read(&self, message_id: &str) -> Result<(), MailboxError>;

    /// Move a message to `folder`, creating the folder if it does not exist.
    async fn move_to_folder(&self, message_id: &str, folder: &str) -> Result<(), MailboxError>;
}
