//! Message processing pipeline.
//!
//! Every unread message flows through:
//! 1. `MatchEngine::find()` — whole-word keyword lookup in the knowledge base
//! 2. `Router::decide()` — auto-reply or escalate
//! 3. `Orchestrator` — executes the action and writes the activity log

pub mod matcher;
pub mod orchestrator;
pub mod router;
pub mod types;

pub use matcher::MatchEngine;
pub use orchestrator::Orchestrator;
pub use router::{ReplyTemplate, Router};
