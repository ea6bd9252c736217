//! Report analysis: provider attribution, SPF inspection, health scoring

pub mod engine;
pub mod providers;
pub mod spf_record;

pub use engine::{AnalysisResult, AuthAnalyzer, Issue};
pub use providers::ProviderDirectory;
pub use spf_record::{DnsSpfSource, SpfSource};
