//! Email mailbox — IMAP for reading, flagging and moving; SMTP via lettre for replies.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use mail_parser::{MessageParser, MimeHeaders};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::channels::Mailbox;
use crate::channels::imap::{FetchedMessage, ImapSession, TlsStream};
use crate::config::{optional, parse_or, required};
use crate::error::{ConfigError, MailboxError};
use crate::pipeline::types::{InboundMessage, OutboundEmail};

/// Socket read/write timeout for IMAP.
const IMAP_TIMEOUT: Duration = Duration::from_secs(30);

// ── Configuration ───────────────────────────────────────────────────

/// Mailbox configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    /// Folder scanned for unread mail.
    pub inbox_folder: String,
}

impl MailboxConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let imap_host = required(lookup, "EMAIL_IMAP_HOST")?;
        let imap_port: u16 = parse_or(lookup, "EMAIL_IMAP_PORT", 993)?;

        let smtp_host = optional(lookup, "EMAIL_SMTP_HOST")
            .unwrap_or_else(|| imap_host.replace("imap", "smtp"));
        let smtp_port: u16 = parse_or(lookup, "EMAIL_SMTP_PORT", 587)?;

        let username = required(lookup, "EMAIL_USERNAME")?;
        // Not trimmed: whitespace may be part of the password.
        let password = lookup("EMAIL_PASSWORD")
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("EMAIL_PASSWORD".into()))?;
        let from_address =
            optional(lookup, "EMAIL_FROM_ADDRESS").unwrap_or_else(|| username.clone());
        let inbox_folder = optional(lookup, "EMAIL_INBOX_FOLDER").unwrap_or_else(|| "INBOX".into());

        Ok(Self {
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            username,
            password: SecretString::from(password),
            from_address,
            inbox_folder,
        })
    }
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// IMAP/SMTP mailbox. One authenticated IMAP session is reused for the whole run.
pub struct ImapMailbox {
    config: MailboxConfig,
    session: Arc<Mutex<ImapSession<TlsStream>>>,
    smtp: SmtpTransport,
}

impl ImapMailbox {
    /// Connect, authenticate and select the inbox folder.
    ///
    /// A rejected login surfaces as [`MailboxError::AuthFailed`].
    pub async fn connect(config: MailboxConfig) -> Result<Self, MailboxError> {
        let cfg = config.clone();
        let session = tokio::task::spawn_blocking(move || {
            let mut session =
                ImapSession::connect_tls(&cfg.imap_host, cfg.imap_port, IMAP_TIMEOUT)?;
            session.read_greeting()?;
            session.login(&cfg.username, cfg.password.expose_secret())?;
            session.select(&cfg.inbox_folder)?;
            Ok::<_, MailboxError>(session)
        })
        .await
        .map_err(|e| MailboxError::Connection {
            host: config.imap_host.clone(),
            reason: format!("IMAP connect task failed: {e}"),
        })??;

        let smtp = build_smtp_transport(&config)?;

        info!(
            imap = %config.imap_host,
            smtp = %config.smtp_host,
            user = %config.username,
            folder = %config.inbox_folder,
            "Mailbox connected"
        );

        Ok(Self {
            config,
            session: Arc::new(Mutex::new(session)),
            smtp,
        })
    }

    /// End the IMAP session. Errors are logged, not returned.
    pub async fn logout(&self) {
        if let Err(e) = self.with_session(|session| session.logout()).await {
            warn!(error = %e, "IMAP logout failed");
        }
    }

    /// Run a blocking operation on the shared IMAP session.
    async fn with_session<T, F>(&self, op: F) -> Result<T, MailboxError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapSession<TlsStream>) -> Result<T, MailboxError> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            let mut guard = session
                .lock()
                .map_err(|_| MailboxError::Protocol("IMAP session lock poisoned".into()))?;
            op(&mut guard)
        })
        .await
        .map_err(|e| MailboxError::Protocol(format!("IMAP task failed: {e}")))?
    }
}

fn build_smtp_transport(config: &MailboxConfig) -> Result<SmtpTransport, MailboxError> {
    let creds = Credentials::new(
        config.username.clone(),
        config.password.expose_secret().to_string(),
    );

    // 465 is implicit TLS; anything else upgrades with STARTTLS.
    let builder = if config.smtp_port == 465 {
        SmtpTransport::relay(&config.smtp_host)
    } else {
        SmtpTransport::starttls_relay(&config.smtp_host)
    }
    .map_err(|e| MailboxError::Connection {
        host: config.smtp_host.clone(),
        reason: format!("SMTP relay error: {e}"),
    })?;

    Ok(builder.port(config.smtp_port).credentials(creds).build())
}

fn parse_uid(message_id: &str) -> Result<u32, String> {
    message_id
        .parse()
        .map_err(|_| format!("not an IMAP UID: {message_id:?}"))
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn fetch_unread(&self, limit: usize) -> Result<Vec<InboundMessage>, MailboxError> {
        let fetched = self
            .with_session(move |session| {
                let uids = session.search_unseen()?;
                debug!(unseen = uids.len(), limit, "Unseen messages found");
                let mut fetched = Vec::new();
                for uid in uids.into_iter().take(limit) {
                    if let Some(message) = session.fetch(uid)? {
                        fetched.push(message);
                    }
                }
                Ok(fetched)
            })
            .await
            .map_err(|e| MailboxError::FetchFailed(e.to_string()))?;

        Ok(fetched.iter().map(parse_fetched).collect())
    }

    async fn send(&self, email: &OutboundEmail) -> Result<(), MailboxError> {
        let send_error = |reason: String| MailboxError::SendFailed {
            to: email.to.clone(),
            reason,
        };

        let message = Message::builder()
            .from(
                self.config
                    .from_address
                    .parse()
                    .map_err(|e| send_error(format!("Invalid from address: {e}")))?,
            )
            .to(email
                .to
                .parse()
                .map_err(|e| send_error(format!("Invalid to address: {e}")))?)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())
            .map_err(|e| send_error(format!("Failed to build email: {e}")))?;

        let transport = self.smtp.clone();
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| send_error(format!("SMTP task failed: {e}")))?
            .map_err(|e| send_error(format!("SMTP send failed: {e}")))?;

        info!(to = %email.to, subject = %email.subject, "Auto-reply sent");
        Ok(())
    }

    async fn mark_read(&self, message_id: &str) -> Result<(), MailboxError> {
        let flag_error = |reason: String| MailboxError::FlagFailed {
            id: message_id.to_string(),
            reason,
        };
        let uid = parse_uid(message_id).map_err(flag_error)?;
        self.with_session(move |session| session.mark_seen(uid))
            .await
            .map_err(|e| flag_error(e.to_string()))
    }

    async fn move_to_folder(&self, message_id: &str, folder: &str) -> Result<(), MailboxError> {
        let move_error = |reason: String| MailboxError::MoveFailed {
            id: message_id.to_string(),
            folder: folder.to_string(),
            reason,
        };
        let uid = parse_uid(message_id).map_err(move_error)?;
        let target = folder.to_string();
        self.with_session(move |session| {
            session.ensure_folder(&target)?;
            session.move_to(uid, &target)
        })
        .await
        .map_err(|e| move_error(e.to_string()))?;

        info!(uid, folder, "Message moved");
        Ok(())
    }
}

// ── Parsing helpers (public for testing) ────────────────────────────

/// Convert a fetched RFC 822 message into an [`InboundMessage`].
///
/// An unparseable message keeps its UID with an unknown sender and empty
/// text, so it matches nothing and ends up in the review folder.
pub fn parse_fetched(fetched: &FetchedMessage) -> InboundMessage {
    let Some(parsed) = MessageParser::default().parse(fetched.raw.as_slice()) else {
        warn!(uid = fetched.uid, "Unparseable message, handing it over for review");
        return InboundMessage {
            id: fetched.uid.to_string(),
            sender_address: "unknown".into(),
            sender_name: None,
            subject: String::new(),
            body: String::new(),
            is_read: fetched.seen,
        };
    };

    let (sender_address, sender_name) = extract_sender(&parsed);
    InboundMessage {
        id: fetched.uid.to_string(),
        sender_address,
        sender_name,
        subject: parsed.subject().unwrap_or_default().to_string(),
        body: extract_text(&parsed),
        is_read: fetched.seen,
    }
}

/// Sender address and display name from the `From` header.
fn extract_sender(parsed: &mail_parser::Message) -> (String, Option<String>) {
    let first = parsed.from().and_then(|addr| addr.first());
    let address = first
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".into());
    let name = first
        .and_then(|a| a.name())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    (address, name)
}

/// Readable text from a parsed email: text part, else stripped HTML, else a text attachment.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        let part: &mail_parser::MessagePart = part;
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return text.to_string();
        }
    }
    String::new()
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Tests ───────────────────────────────────────────────────────────
