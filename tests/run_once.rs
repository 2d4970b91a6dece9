//! End-to-end runs of the orchestrator against an in-memory mailbox and a
//! real libSQL activity log.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use faq_responder::channels::Mailbox;
use faq_responder::error::MailboxError;
use faq_responder::knowledge::KnowledgeBase;
use faq_responder::pipeline::types::{InboundMessage, OutboundEmail};
use faq_responder::pipeline::{Orchestrator, ReplyTemplate, Router};
use faq_responder::store::{ActivityLog, LibSqlBackend};

const KB_CSV: &str = "\
id,keywords,answer_text,link
1,\"wifi, internet\",Reset router,http://x/wifi
2,laundry,Laundry is in the basement,http://x/laundry
";

/// In-memory mailbox. Records every side effect and can be told to fail
/// sends to particular recipients, flag updates or moves.
#[derive(Default)]
struct FakeMailbox {
    inbox: Mutex<Vec<InboundMessage>>,
    sent: Mutex<Vec<OutboundEmail>>,
    marked_read: Mutex<Vec<String>>,
    moved: Mutex<Vec<(String, String)>>,
    reject_sends_to: HashSet<String>,
    fail_mark_read: bool,
    fail_moves: bool,
}

impl FakeMailbox {
    fn with_inbox(messages: Vec<InboundMessage>) -> Self {
        Self {
            inbox: Mutex::new(messages),
            ..Default::default()
        }
    }

    fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().unwrap().clone()
    }

    fn marked_read(&self) -> Vec<String> {
        self.marked_read.lock().unwrap().clone()
    }

    fn moved(&self) -> Vec<(String, String)> {
        self.moved.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailbox for FakeMailbox {
    async fn fetch_unread(&self, limit: usize) -> Result<Vec<InboundMessage>, MailboxError> {
        Ok(self
            .inbox
            .lock()
            .unwrap()
            .iter()
            .filter(|m| !m.is_read)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn send(&self, email: &OutboundEmail) -> Result<(), MailboxError> {
        if self.reject_sends_to.contains(&email.to) {
            return Err(MailboxError::SendFailed {
                to: email.to.clone(),
                reason: "550 mailbox unavailable".into(),
            });
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }

    async fn mark_read(&self, message_id: &str) -> Result<(), MailboxError> {
        if self.fail_mark_read {
            return Err(MailboxError::FlagFailed {
                id: message_id.to_string(),
                reason: "STORE rejected".into(),
            });
        }
        let mut inbox = self.inbox.lock().unwrap();
        if let Some(message) = inbox.iter_mut().find(|m| m.id == message_id) {
            message.is_read = true;
        }
        self.marked_read.lock().unwrap().push(message_id.to_string());
        Ok(())
    }

    async fn move_to_folder(&self, message_id: &str, folder: &str) -> Result<(), MailboxError> {
        if self.fail_moves {
            return Err(MailboxError::MoveFailed {
                id: message_id.to_string(),
                folder: folder.to_string(),
                reason: "[TRYCREATE] no such mailbox".into(),
            });
        }
        self.inbox.lock().unwrap().retain(|m| m.id != message_id);
        self.moved
            .lock()
            .unwrap()
            .push((message_id.to_string(), folder.to_string()));
        Ok(())
    }
}

fn message(id: &str, sender: &str, subject: &str, body: &str) -> InboundMessage {
    InboundMessage {
        id: id.into(),
        sender_address: sender.into(),
        sender_name: None,
        subject: subject.into(),
        body: body.into(),
        is_read: false,
    }
}

fn knowledge_base() -> Arc<KnowledgeBase> {
    Arc::new(KnowledgeBase::from_reader(KB_CSV.as_bytes(), "kb.csv").unwrap())
}

async fn setup(
    mailbox: FakeMailbox,
    batch_limit: usize,
) -> (Orchestrator, Arc<FakeMailbox>, Arc<LibSqlBackend>) {
    let mailbox = Arc::new(mailbox);
    let log = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let orchestrator = Orchestrator::new(
        mailbox.clone(),
        log.clone(),
        knowledge_base(),
        Router::default(),
        batch_limit,
    );
    (orchestrator, mailbox, log)
}

#[tokio::test]
async fn matched_message_gets_reply_and_log_row() {
    let mut msg = message("101", "dana@uni.edu", "Wifi down", "Nothing loads in my room.");
    msg.sender_name = Some("Dana".into());
    let (orchestrator, mailbox, log) = setup(FakeMailbox::with_inbox(vec![msg]), 20).await;

    let summary = orchestrator.run_once().await.unwrap();
    assert_eq!(summary.fetched, 1);
    assert_eq!(summary.replied, 1);
    assert!(summary.is_clean());

    let sent = mailbox.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "dana@uni.edu");
    assert_eq!(sent[0].subject, "Re: Wifi down");
    assert!(sent[0].body.starts_with("Hello Dana,"));
    assert!(sent[0].body.contains("Reset router"));
    assert!(sent[0].body.contains("http://x/wifi"));
    assert_eq!(mailbox.marked_read(), ["101"]);
    assert!(mailbox.moved().is_empty());

    let records = log.recent(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].sender_address, "dana@uni.edu");
    assert_eq!(records[0].subject, "Wifi down");
    assert_eq!(records[0].matched_faq_id.as_deref(), Some("1"));
}

#[tokio::test]
async fn unmatched_message_is_escalated_and_logged_without_faq() {
    let inbox = vec![message("102", "sam@uni.edu", "Parking question", "Where can I park?")];
    let (orchestrator, mailbox, log) = setup(FakeMailbox::with_inbox(inbox), 20).await;

    let summary = orchestrator.run_once().await.unwrap();
    assert_eq!(summary.escalated, 1);
    assert!(mailbox.sent().is_empty());
    assert!(mailbox.marked_read().is_empty());
    assert_eq!(mailbox.moved(), [("102".to_string(), "ManualReview".to_string())]);

    let records = log.recent(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].matched_faq_id, None);
}

#[tokio::test]
async fn keyword_in_body_matches_and_substring_does_not() {
    let inbox = vec![
        message("1", "a@uni.edu", "Question", "Is the internet down?"),
        message("2", "b@uni.edu", "Question", "My laundromat card broke."),
    ];
    let (orchestrator, mailbox, _log) = setup(FakeMailbox::with_inbox(inbox), 20).await;

    let summary = orchestrator.run_once().await.unwrap();
    assert_eq!(summary.replied, 1);
    assert_eq!(summary.escalated, 1);
    assert_eq!(mailbox.sent()[0].to, "a@uni.edu");
    assert_eq!(mailbox.moved()[0].0, "2");
}

#[tokio::test]
async fn send_failure_is_isolated_to_its_message() {
    let inbox = vec![
        message("1", "bounce@uni.edu", "Wifi down", ""),
        message("2", "ok@uni.edu", "Laundry hours?", ""),
        message("3", "other@uni.edu", "Parking", ""),
    ];
    let mailbox = FakeMailbox {
        reject_sends_to: HashSet::from(["bounce@uni.edu".to_string()]),
        ..FakeMailbox::with_inbox(inbox)
    };
    let (orchestrator, mailbox, log) = setup(mailbox, 20).await;

    let summary = orchestrator.run_once().await.unwrap();
    assert_eq!(summary.fetched, 3);
    assert_eq!(summary.replied, 1);
    assert_eq!(summary.escalated, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].message_id, "1");
    assert!(summary.failures[0].error.contains("bounce@uni.edu"));
    assert!(!summary.is_clean());

    // The failed message stays unread and leaves no log row.
    assert_eq!(mailbox.marked_read(), ["2"]);
    let records = log.recent(10).await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.sender_address != "bounce@uni.edu"));

    let report = summary.to_string();
    assert!(report.contains("1 failed"));
    assert!(report.contains("message 1 from bounce@uni.edu"));
}

#[tokio::test]
async fn sent_reply_is_logged_even_when_mark_read_fails() {
    let inbox = vec![
        message("1", "a@uni.edu", "Wifi down", ""),
        message("2", "b@uni.edu", "Laundry hours?", ""),
    ];
    let mailbox = FakeMailbox {
        fail_mark_read: true,
        ..FakeMailbox::with_inbox(inbox)
    };
    let (orchestrator, mailbox, log) = setup(mailbox, 20).await;

    let summary = orchestrator.run_once().await.unwrap();
    assert_eq!(mailbox.sent().len(), 2);
    assert_eq!(summary.replied, 0);
    assert_eq!(summary.failures.len(), 2);
    assert!(summary.failures[0].error.contains("mark message 1 as read"));

    // Both replies went out, so both are on record.
    let records = log.recent(10).await.unwrap();
    let faq_ids: Vec<_> = records.iter().map(|r| r.matched_faq_id.as_deref()).collect();
    assert_eq!(faq_ids, [Some("2"), Some("1")]);
}

#[tokio::test]
async fn failed_move_leaves_no_row_and_run_continues() {
    let inbox = vec![
        message("1", "a@uni.edu", "Parking", ""),
        message("2", "b@uni.edu", "Wifi down", ""),
        message("3", "c@uni.edu", "Bike storage", ""),
    ];
    let mailbox = FakeMailbox {
        fail_moves: true,
        ..FakeMailbox::with_inbox(inbox)
    };
    let (orchestrator, mailbox, log) = setup(mailbox, 20).await;

    let summary = orchestrator.run_once().await.unwrap();
    assert_eq!(summary.replied, 1);
    assert_eq!(summary.escalated, 0);
    let failed: Vec<&str> = summary.failures.iter().map(|f| f.message_id.as_str()).collect();
    assert_eq!(failed, ["1", "3"]);
    assert!(summary.failures[0].error.contains("ManualReview"));
    assert!(mailbox.moved().is_empty());

    let records = log.recent(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].sender_address, "b@uni.edu");
}

#[tokio::test]
async fn batch_limit_caps_processed_messages() {
    let inbox = (1..=5)
        .map(|i| message(&i.to_string(), "a@uni.edu", "Wifi", ""))
        .collect();
    let (orchestrator, mailbox, log) = setup(FakeMailbox::with_inbox(inbox), 2).await;

    let summary = orchestrator.run_once().await.unwrap();
    assert_eq!(summary.fetched, 2);
    assert_eq!(mailbox.marked_read(), ["1", "2"]);
    assert_eq!(log.recent(10).await.unwrap().len(), 2);

    // The next run picks up where this one stopped.
    let summary = orchestrator.run_once().await.unwrap();
    assert_eq!(summary.fetched, 2);
    assert_eq!(mailbox.marked_read(), ["1", "2", "3", "4"]);
}

#[tokio::test]
async fn empty_inbox_is_a_clean_no_op() {
    let (orchestrator, mailbox, log) = setup(FakeMailbox::default(), 20).await;

    let summary = orchestrator.run_once().await.unwrap();
    assert_eq!(summary.fetched, 0);
    assert!(summary.is_clean());
    assert!(mailbox.sent().is_empty());
    assert!(log.recent(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn message_read_elsewhere_is_skipped() {
    let mailbox = Arc::new(FakeMailbox::default());
    let log = Arc::new(LibSqlBackend::new_memory().await.unwrap());

    /// Returns one message that another client already marked read.
    struct RacyMailbox(Arc<FakeMailbox>);

    #[async_trait]
    impl Mailbox for RacyMailbox {
        async fn fetch_unread(&self, _limit: usize) -> Result<Vec<InboundMessage>, MailboxError> {
            let mut msg = message("9", "a@uni.edu", "Wifi down", "");
            msg.is_read = true;
            Ok(vec![msg])
        }
        async fn send(&self, email: &OutboundEmail) -> Result<(), MailboxError> {
            self.0.send(email).await
        }
        async fn mark_read(&self, message_id: &str) -> Result<(), MailboxError> {
            self.0.mark_read(message_id).await
        }
        async fn move_to_folder(&self, message_id: &str, folder: &str) -> Result<(), MailboxError> {
            self.0.move_to_folder(message_id, folder).await
        }
    }

    let orchestrator = Orchestrator::new(
        Arc::new(RacyMailbox(mailbox.clone())),
        log.clone(),
        knowledge_base(),
        Router::default(),
        20,
    );
    let summary = orchestrator.run_once().await.unwrap();
    assert_eq!(summary.skipped, 1);
    assert!(mailbox.sent().is_empty());
    assert!(log.recent(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn custom_template_and_folder_are_used() {
    let inbox = vec![
        message("1", "a@uni.edu", "Laundry", ""),
        message("2", "b@uni.edu", "Something else", ""),
    ];
    let mailbox = Arc::new(FakeMailbox::with_inbox(inbox));
    let log = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let template = ReplyTemplate::default()
        .with_fallback_name("Resident")
        .with_body("Hi {name}: {answer} <{link}>")
        .unwrap();

    let orchestrator = Orchestrator::new(
        mailbox.clone(),
        log.clone(),
        knowledge_base(),
        Router::new(template, "Triage"),
        20,
    );
    orchestrator.run_once().await.unwrap();

    assert_eq!(
        mailbox.sent()[0].body,
        "Hi Resident: Laundry is in the basement <http://x/laundry>"
    );
    assert_eq!(mailbox.moved(), [("2".to_string(), "Triage".to_string())]);
}
