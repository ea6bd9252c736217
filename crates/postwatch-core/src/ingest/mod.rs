//! Mailbox polling and report ingestion

pub mod detect;
pub mod mailbox;
pub mod pipeline;

pub use mailbox::{ImapTransport, MailboxCredentials, MailboxSession, MailboxTransport};
pub use pipeline::{ErrorDetail, IngestionPipeline, IngestionSummary, ReportSummary};
