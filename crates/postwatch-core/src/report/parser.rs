//! Aggregate report parser
//!
//! Parses the DMARC aggregate report XML schema into a typed report.
//! Parsing is deliberately lenient at the field level: a reporter that
//! omits an optional element or mangles a single integer should not cost
//! us the whole report. Only a document that is not well-formed XML is
//! rejected, as `Error::MalformedReport`.

use chrono::{DateTime, Utc};
use postwatch_common::types::{AuthOutcome, Disposition};
use postwatch_common::{Error, Result};
use roxmltree::{Document, Node};

/// One parsed aggregate report
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReport {
    pub org_name: Option<String>,
    pub email: Option<String>,
    pub report_id: Option<String>,
    pub date_range_begin: Option<DateTime<Utc>>,
    pub date_range_end: Option<DateTime<Utc>>,
    pub domain: Option<String>,
    pub domain_policy: Option<String>,
    pub subdomain_policy: Option<String>,
    pub policy_percentage: i32,
    pub records: Vec<ParsedRecord>,
    /// Sum of per-record message counts
    pub total_records: i64,
    /// Messages where SPF or DKIM passed
    pub pass_count: i64,
    /// The remainder
    pub fail_count: i64,
}

/// One evaluation row within a report
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecord {
    pub source_ip: Option<String>,
    pub count: i64,
    pub disposition: Disposition,
    pub spf_result: AuthOutcome,
    pub dkim_result: AuthOutcome,
    pub dkim_domain: Option<String>,
    pub dkim_selector: Option<String>,
    pub spf_domain: Option<String>,
    pub header_from: Option<String>,
    pub envelope_from: Option<String>,
    pub envelope_to: Option<String>,
}

impl ParsedRecord {
    /// DMARC pass semantics: either SPF or DKIM passing is enough
    pub fn is_passing(&self) -> bool {
        self.spf_result.is_pass() || self.dkim_result.is_pass()
    }
}

/// Parse decoded report document bytes into a typed report
pub fn parse_report(xml: &[u8]) -> Result<ParsedReport> {
    let text = String::from_utf8_lossy(xml);
    let doc = Document::parse(&text).map_err(Error::MalformedReport)?;
    let root = doc.root_element();

    let metadata = child(root, "report_metadata");
    let policy = child(root, "policy_published");

    let mut records = Vec::new();
    let mut total_records = 0i64;
    let mut pass_count = 0i64;

    for node in root.children().filter(|n| n.has_tag_name("record")) {
        let record = parse_record(node);
        total_records += record.count;
        if record.is_passing() {
            pass_count += record.count;
        }
        records.push(record);
    }

    Ok(ParsedReport {
        org_name: metadata.and_then(|m| child_text(m, "org_name")),
        email: metadata.and_then(|m| child_text(m, "email")),
        report_id: metadata.and_then(|m| child_text(m, "report_id")),
        date_range_begin: metadata
            .and_then(|m| child(m, "date_range"))
            .and_then(|r| child_timestamp(r, "begin")),
        date_range_end: metadata
            .and_then(|m| child(m, "date_range"))
            .and_then(|r| child_timestamp(r, "end")),
        domain: policy.and_then(|p| child_text(p, "domain")),
        domain_policy: policy.and_then(|p| child_text(p, "p")),
        subdomain_policy: policy.and_then(|p| child_text(p, "sp")),
        policy_percentage: policy.map_or(100, |p| child_int(p, "pct", 100) as i32),
        records,
        total_records,
        pass_count,
        fail_count: total_records - pass_count,
    })
}

fn parse_record(record: Node<'_, '_>) -> ParsedRecord {
    let row = child(record, "row");
    let evaluated = row.and_then(|r| child(r, "policy_evaluated"));
    let identifiers = child(record, "identifiers");
    let auth_results = child(record, "auth_results");
    let dkim_auth = auth_results.and_then(|a| child(a, "dkim"));
    let spf_auth = auth_results.and_then(|a| child(a, "spf"));

    ParsedRecord {
        source_ip: row.and_then(|r| child_text(r, "source_ip")),
        count: row.map_or(1, |r| child_int(r, "count", 1)),
        disposition: evaluated
            .and_then(|e| child_text(e, "disposition"))
            .map_or(Disposition::None, |s| Disposition::parse(&s)),
        spf_result: evaluated
            .and_then(|e| child_text(e, "spf"))
            .map_or(AuthOutcome::None, |s| AuthOutcome::parse(&s)),
        dkim_result: evaluated
            .and_then(|e| child_text(e, "dkim"))
            .map_or(AuthOutcome::None, |s| AuthOutcome::parse(&s)),
        dkim_domain: dkim_auth.and_then(|d| child_text(d, "domain")),
        dkim_selector: dkim_auth.and_then(|d| child_text(d, "selector")),
        spf_domain: spf_auth.and_then(|s| child_text(s, "domain")),
        header_from: identifiers.and_then(|i| child_text(i, "header_from")),
        envelope_from: identifiers.and_then(|i| child_text(i, "envelope_from")),
        envelope_to: identifiers.and_then(|i| child_text(i, "envelope_to")),
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(name))
}

fn child_text(node: Node<'_, '_>, name: &str) -> Option<String> {
    let text = child(node, name)?.text()?.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Integer field with a fallback default; a mangled number must not
/// discard an otherwise-valid report
fn child_int(node: Node<'_, '_>, name: &str, default: i64) -> i64 {
    child_text(node, name)
        .and_then(|t| t.parse().ok())
        .unwrap_or(default)
}

fn child_timestamp(node: Node<'_, '_>, name: &str) -> Option<DateTime<Utc>> {
    let secs: i64 = child_text(node, name)?.parse().ok()?;
    DateTime::from_timestamp(secs, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feedback>
  <report_metadata>
    <org_name>google.com</org_name>
    <email>noreply-dmarc-support@google.com</email>
    <report_id>12345678901234567890</report_id>
    <date_range>
      <begin>1700000000</begin>
      <end>1700086400</end>
    </date_range>
  </report_metadata>
  <policy_published>
    <domain>example.com</domain>
    <p>quarantine</p>
    <sp>none</sp>
    <pct>100</pct>
  </policy_published>
  <record>
    <row>
      <source_ip>192.0.2.10</source_ip>
      <count>5</count>
      <policy_evaluated>
        <disposition>none</disposition>
        <dkim>fail</dkim>
        <spf>fail</spf>
      </policy_evaluated>
    </row>
    <identifiers>
      <header_from>example.com</header_from>
      <envelope_from>bounce.example.com</envelope_from>
    </identifiers>
  </record>
  <record>
    <row>
      <source_ip>192.0.2.20</source_ip>
      <count>10</count>
      <policy_evaluated>
        <disposition>none</disposition>
        <dkim>pass</dkim>
        <spf>pass</spf>
      </policy_evaluated>
    </row>
    <identifiers>
      <header_from>example.com</header_from>
    </identifiers>
    <auth_results>
      <dkim>
        <domain>example.com</domain>
        <selector>s1</selector>
        <result>pass</result>
      </dkim>
      <spf>
        <domain>example.com</domain>
        <result>pass</result>
      </spf>
    </auth_results>
  </record>
  <record>
    <row>
      <source_ip>192.0.2.30</source_ip>
      <count>2</count>
      <policy_evaluated>
        <disposition>none</disposition>
        <dkim>pass</dkim>
        <spf>fail</spf>
      </policy_evaluated>
    </row>
  </record>
</feedback>"#;

    #[test]
    fn test_parse_full_report() {
        let report = parse_report(SAMPLE.as_bytes()).unwrap();

        assert_eq!(report.org_name.as_deref(), Some("google.com"));
        assert_eq!(report.report_id.as_deref(), Some("12345678901234567890"));
        assert_eq!(report.domain.as_deref(), Some("example.com"));
        assert_eq!(report.domain_policy.as_deref(), Some("quarantine"));
        assert_eq!(report.subdomain_policy.as_deref(), Some("none"));
        assert_eq!(report.policy_percentage, 100);
        assert!(report.date_range_begin.is_some());
        assert_eq!(report.records.len(), 3);

        let first = &report.records[0];
        assert_eq!(first.source_ip.as_deref(), Some("192.0.2.10"));
        assert_eq!(first.count, 5);
        assert_eq!(first.spf_result, AuthOutcome::Fail);
        assert_eq!(first.envelope_from.as_deref(), Some("bounce.example.com"));

        let second = &report.records[1];
        assert_eq!(second.dkim_domain.as_deref(), Some("example.com"));
        assert_eq!(second.dkim_selector.as_deref(), Some("s1"));
        assert_eq!(second.spf_domain.as_deref(), Some("example.com"));
    }

    #[test]
    fn test_aggregate_counts_use_or_semantics() {
        // 5 fail/fail, 10 pass/pass, 2 fail-SPF/pass-DKIM: the last is a pass
        let report = parse_report(SAMPLE.as_bytes()).unwrap();
        assert_eq!(report.total_records, 17);
        assert_eq!(report.pass_count, 12);
        assert_eq!(report.fail_count, 5);
    }

    #[test]
    fn test_parse_is_deterministic() {
        let a = parse_report(SAMPLE.as_bytes()).unwrap();
        let b = parse_report(SAMPLE.as_bytes()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        let err = parse_report(b"<feedback><unclosed>").unwrap_err();
        assert_eq!(err.code(), "MALFORMED_REPORT");
    }

    #[test]
    fn test_bad_count_falls_back_to_one() {
        let xml = r#"<feedback>
  <record>
    <row>
      <source_ip>192.0.2.1</source_ip>
      <count>oops</count>
      <policy_evaluated><dkim>pass</dkim><spf>fail</spf></policy_evaluated>
    </row>
  </record>
</feedback>"#;
        let report = parse_report(xml.as_bytes()).unwrap();
        assert_eq!(report.records[0].count, 1);
        assert_eq!(report.total_records, 1);
        assert_eq!(report.pass_count, 1);
    }

    #[test]
    fn test_missing_pct_defaults_to_100() {
        let xml = r#"<feedback>
  <policy_published><domain>example.com</domain><p>none</p></policy_published>
</feedback>"#;
        let report = parse_report(xml.as_bytes()).unwrap();
        assert_eq!(report.policy_percentage, 100);
        assert_eq!(report.subdomain_policy, None);
    }

    #[test]
    fn test_decoder_is_transparent_to_parser() {
        use crate::report::decoder::decode_attachment;
        use std::io::Write;

        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            writer
                .start_file("report.xml", zip::write::FileOptions::default())
                .unwrap();
            writer.write_all(SAMPLE.as_bytes()).unwrap();
            writer.finish().unwrap();
        }

        let from_zip = parse_report(&decode_attachment(&buf.into_inner(), None)).unwrap();
        let direct = parse_report(SAMPLE.as_bytes()).unwrap();
        assert_eq!(from_zip, direct);
    }
}
