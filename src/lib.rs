//! FAQ Responder — answers common questions from a CSV knowledge base and
//! escalates everything else for manual review.

pub mod channels;
pub mod config;
pub mod error;
pub mod knowledge;
pub mod pipeline;
pub mod store;
