//! Repository layer for data access

pub mod analysis;
pub mod audit;
pub mod mailbox_configs;
pub mod recommendations;
pub mod reports;

// Re-export repository traits with simple names
pub use analysis::AnalysisRepository;
pub use audit::AuditRepository;
pub use mailbox_configs::MailboxConfigRepository;
pub use recommendations::RecommendationRepository;
pub use reports::ReportRepository;

// Re-export concrete database implementations
pub use analysis::DbAnalysisRepository;
pub use audit::DbAuditRepository;
pub use mailbox_configs::DbMailboxConfigRepository;
pub use recommendations::DbRecommendationRepository;
pub use reports::DbReportRepository;
