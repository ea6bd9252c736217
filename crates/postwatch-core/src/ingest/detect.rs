//! Report message detection
//!
//! Decides whether an incoming message looks like a DMARC aggregate
//! report. Reporters vary wildly in subject lines and sender addresses,
//! so any one positive signal qualifies the message.

use std::sync::OnceLock;

use regex::RegexSet;

const SUBJECT_PATTERNS: &[&str] = &[
    r"dmarc",
    r"report domain",
    r"aggregate report",
    r"xml report",
    r"daily report",
    r"weekly report",
    r"monthly report",
    r"\brua\b",
];

const SENDER_PATTERNS: &[&str] = &[
    r"noreply.*dmarc",
    r"dmarc.*report",
    r"dmarcreport@microsoft\.com",
    r"postmaster",
    r"mailer-daemon",
    r"abuse",
    r"security",
];

const ATTACHMENT_PATTERNS: &[&str] = &[
    r"\.xml$",
    r"\.xml\.zip$",
    r"\.xml\.gz$",
    r"\.xml\.gzip$",
    r"dmarc.*\.zip$",
    r"aggregate.*\.zip$",
    r".*\.zip$",
];

const BODY_MARKERS: &[&str] = &["dmarc", "aggregate report"];

fn subject_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| RegexSet::new(SUBJECT_PATTERNS).unwrap())
}

fn sender_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| RegexSet::new(SENDER_PATTERNS).unwrap())
}

fn attachment_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| RegexSet::new(ATTACHMENT_PATTERNS).unwrap())
}

/// True if the subject line matches any known report subject shape
pub fn subject_matches(subject: &str) -> bool {
    subject_set().is_match(&subject.to_lowercase())
}

/// True if the sender address matches any known reporter shape
pub fn sender_matches(sender: &str) -> bool {
    sender_set().is_match(&sender.to_lowercase())
}

/// True if the attachment filename matches any report extension shape
pub fn attachment_name_matches(name: &str) -> bool {
    attachment_set().is_match(&name.to_lowercase())
}

/// True if the body text carries a report marker phrase
pub fn body_matches(body: &str) -> bool {
    let lower = body.to_lowercase();
    BODY_MARKERS.iter().any(|m| lower.contains(m))
}

/// Nameless attachments are judged by content instead: ZIP and gzip
/// magic bytes, or a leading XML declaration
pub fn attachment_content_matches(payload: &[u8]) -> bool {
    let body = match payload.iter().position(|b| !b.is_ascii_whitespace()) {
        Some(start) => &payload[start..],
        None => payload,
    };
    body.starts_with(b"PK\x03\x04")
        || body.starts_with(&[0x1f, 0x8b])
        || body.starts_with(b"<?xml")
}

/// Attachment signal: filename when present, content sniffing otherwise
pub fn attachment_matches(name: Option<&str>, payload: &[u8]) -> bool {
    match name {
        Some(n) if !n.is_empty() => attachment_name_matches(n),
        _ => attachment_content_matches(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_signals() {
        assert!(subject_matches("Report Domain: example.com Submitter: google.com"));
        assert!(subject_matches("DMARC Aggregate Report"));
        assert!(subject_matches("Weekly Report for example.com"));
        assert!(!subject_matches("Your invoice is attached"));
    }

    #[test]
    fn test_sender_signals() {
        assert!(sender_matches("noreply-dmarc-support@google.com"));
        assert!(sender_matches("dmarcreport@microsoft.com"));
        assert!(sender_matches("postmaster@example.net"));
        assert!(!sender_matches("alice@example.com"));
    }

    #[test]
    fn test_attachment_name_signals() {
        assert!(attachment_name_matches("google.com!example.com!1700000000!1700086400.xml.gz"));
        assert!(attachment_name_matches("report.xml.zip"));
        assert!(attachment_name_matches("anything.zip"));
        assert!(!attachment_name_matches("photo.jpeg"));
    }

    #[test]
    fn test_body_signals() {
        assert!(body_matches("This is an aggregate report for your domain"));
        assert!(body_matches("Attached is the DMARC data"));
        assert!(!body_matches("lunch at noon?"));
    }

    #[test]
    fn test_nameless_attachment_sniffing() {
        assert!(attachment_matches(None, b"PK\x03\x04rest"));
        assert!(attachment_matches(None, &[0x1f, 0x8b, 0x08]));
        assert!(attachment_matches(None, b"  <?xml version=\"1.0\"?>"));
        assert!(!attachment_matches(None, b"plain text"));
        // a name, when present, takes precedence over content
        assert!(!attachment_matches(Some("photo.jpeg"), b"PK\x03\x04"));
    }
}
