//! Error types for Postwatch

use thiserror::Error;

/// Main error type for Postwatch
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Malformed report: {0}")]
    MalformedReport(#[from] roxmltree::Error),

    #[error("Mailbox connection error: {0}")]
    Connection(String),

    #[error("Rate limited: {reason} (retry after {retry_after_secs}s)")]
    RateLimited {
        reason: String,
        retry_after_secs: u64,
    },

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for Postwatch
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::MalformedReport(_) => "MALFORMED_REPORT",
            Error::Connection(_) => "CONNECTION_ERROR",
            Error::RateLimited { .. } => "RATE_LIMITED",
            Error::Crypto(_) => "CRYPTO_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the error is worth retrying (transient connectivity only)
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Connection(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Crypto("bad tag".into()).code(), "CRYPTO_ERROR");
        let xml_err = roxmltree::Document::parse("<broken").unwrap_err();
        assert_eq!(Error::MalformedReport(xml_err).code(), "MALFORMED_REPORT");
        let e = Error::RateLimited {
            reason: "too many attempts".into(),
            retry_after_secs: 60,
        };
        assert_eq!(e.code(), "RATE_LIMITED");
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Connection("timed out".into()).is_transient());
        assert!(!Error::Crypto("bad key".into()).is_transient());
    }

    #[test]
    fn test_malformed_report_keeps_the_parse_error_as_source() {
        use std::error::Error as _;

        let xml_err = roxmltree::Document::parse("<broken").unwrap_err();
        let err = Error::MalformedReport(xml_err);
        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("Malformed report: "));
    }
}
