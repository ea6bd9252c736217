//! Postwatch Core - DMARC aggregate report pipeline
//!
//! This crate provides the report acquisition and analysis pipeline:
//! mailbox ingestion, report decoding and parsing, the authentication
//! failure analyzer, the recommendation generator, the connection-attempt
//! rate limiter, and the credential guard.

pub mod analysis;
pub mod ingest;
pub mod ratelimit;
pub mod recommend;
pub mod report;
pub mod scheduled;
pub mod secrets;

pub use analysis::{AnalysisResult, AuthAnalyzer, Issue, ProviderDirectory};
pub use ingest::{
    ImapTransport, IngestionPipeline, IngestionSummary, MailboxSession, MailboxTransport,
};
pub use ratelimit::{AttemptRateLimiter, LimitDecision};
pub use recommend::RecommendationEngine;
pub use report::{decode_attachment, parse_report, ParsedRecord, ParsedReport};
pub use scheduled::IngestScheduler;
pub use secrets::CredentialGuard;
