use std::process::ExitCode;
use std::sync::Arc;

use faq_responder::channels::{ImapMailbox, Mailbox};
use faq_responder::config::AppConfig;
use faq_responder::error::Error;
use faq_responder::knowledge::KnowledgeBase;
use faq_responder::pipeline::types::RunSummary;
use faq_responder::pipeline::{Orchestrator, Router};
use faq_responder::store::{ActivityLog, LibSqlBackend};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // Install rustls crypto provider before any TLS usage
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    match run().await {
        Ok(summary) => {
            if !summary.is_clean() {
                tracing::warn!(failed = summary.failures.len(), "Run finished with failures");
            }
            eprintln!("{summary}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Run aborted");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// One pass over the inbox. Preconditions are checked in order and the first
/// failure aborts before any message is touched.
async fn run() -> Result<RunSummary, Error> {
    let config = AppConfig::from_env()?;
    let template = config.reply.template()?;

    eprintln!("📬 FAQ Responder v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mailbox: {} ({})", config.mailbox.username, config.mailbox.inbox_folder);
    eprintln!("   Knowledge base: {}", config.knowledge_base_path.display());
    eprintln!("   Activity log: {}", config.db_path.display());
    eprintln!("   Batch limit: {}", config.batch_limit);
    eprintln!("   Review folder: {}\n", config.review_folder);

    let knowledge_base = Arc::new(KnowledgeBase::load(&config.knowledge_base_path)?);
    let activity_log: Arc<dyn ActivityLog> =
        Arc::new(LibSqlBackend::new_local(&config.db_path).await?);
    let mailbox = Arc::new(ImapMailbox::connect(config.mailbox.clone()).await?);

    let orchestrator = Orchestrator::new(
        Arc::clone(&mailbox) as Arc<dyn Mailbox>,
        Arc::clone(&activity_log),
        knowledge_base,
        Router::new(template, config.review_folder.clone()),
        config.batch_limit,
    );

    let result = orchestrator.run_once().await;
    mailbox.logout().await;

    if let Ok(summary) = &result {
        log_recent_activity(activity_log.as_ref(), summary.fetched).await;
    }
    result
}

/// Debug-log the newest activity log rows, at most one per fetched message.
async fn log_recent_activity(activity_log: &dyn ActivityLog, limit: usize) {
    if limit == 0 || !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    match activity_log.recent(limit).await {
        Ok(records) => {
            for record in records {
                tracing::debug!(
                    sender = %record.sender_address,
                    subject = %record.subject,
                    faq_id = record.matched_faq_id.as_deref().unwrap_or("-"),
                    at = %record.timestamp_utc,
                    "Activity log row"
                );
            }
        }
        Err(e) => tracing::warn!(error = %e, "Could not read back the activity log"),
    }
}
