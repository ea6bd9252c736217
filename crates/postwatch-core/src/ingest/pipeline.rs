//! Ingestion pipeline
//!
//! Polls one mailbox for unseen aggregate reports, decodes and parses
//! them, and persists the result. A message is flagged seen only once
//! its report row exists, so a crash mid-run leaves the message to be
//! picked up again rather than lost.

use std::sync::Arc;

use mail_parser::{MessageParser, MimeHeaders};
use postwatch_common::config::IngestConfig;
use postwatch_common::types::OwnerId;
use postwatch_common::{Error, Result};
use postwatch_storage::models::{MailboxConfig, NewReport, NewReportRecord};
use postwatch_storage::repository::{
    AuditRepository, MailboxConfigRepository, ReportRepository,
};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::ingest::detect;
use crate::ingest::mailbox::{MailboxCredentials, MailboxTransport};
use crate::report::{decode_attachment, parse_report, ParsedReport};

/// Outcome of one polling run against one mailbox
#[derive(Debug, Default, Clone)]
pub struct IngestionSummary {
    pub processed: u32,
    pub errors: u32,
    pub duplicates: u32,
    pub reports: Vec<ReportSummary>,
    pub error_details: Vec<ErrorDetail>,
}

#[derive(Debug, Clone)]
pub struct ReportSummary {
    pub id: postwatch_common::types::ReportId,
    pub org_name: String,
    pub domain: String,
    pub total_records: i64,
}

#[derive(Debug, Clone)]
pub struct ErrorDetail {
    pub subject: String,
    pub filename: Option<String>,
    pub error: String,
}

/// An attachment pulled out of a qualifying message
struct ReportCandidate {
    subject: String,
    filename: Option<String>,
    payload: Vec<u8>,
    message_id: u32,
}

pub struct IngestionPipeline {
    mailboxes: Arc<dyn MailboxConfigRepository>,
    reports: Arc<dyn ReportRepository>,
    audit: Arc<dyn AuditRepository>,
    transport: Arc<dyn MailboxTransport>,
    config: IngestConfig,
}

impl IngestionPipeline {
    pub fn new(
        mailboxes: Arc<dyn MailboxConfigRepository>,
        reports: Arc<dyn ReportRepository>,
        audit: Arc<dyn AuditRepository>,
        transport: Arc<dyn MailboxTransport>,
        config: IngestConfig,
    ) -> Self {
        Self {
            mailboxes,
            reports,
            audit,
            transport,
            config,
        }
    }

    /// Run one polling pass for one mailbox. `password` is the plaintext
    /// credential, already decrypted by the caller.
    pub async fn run(&self, mailbox: &MailboxConfig, password: &str) -> Result<IngestionSummary> {
        let creds = MailboxCredentials {
            host: mailbox.host.clone(),
            port: mailbox.port as u16,
            username: mailbox.username.clone(),
            password: password.to_string(),
            use_ssl: mailbox.use_ssl,
            folder: if mailbox.folder.is_empty() {
                self.config.default_folder.clone()
            } else {
                mailbox.folder.clone()
            },
        };

        let mut session = match self.connect_with_retry(&creds) {
            Ok(s) => s,
            Err(e) => {
                self.audit_event(
                    mailbox.owner_id,
                    "ingestion_failed",
                    "mailbox_config",
                    Some(&mailbox.id.to_string()),
                    json!({ "error": e.to_string() }),
                )
                .await;
                return Err(e);
            }
        };

        let mut summary = IngestionSummary::default();
        let candidates = self.scan_unseen(&mut *session, &mut summary)?;
        info!(
            mailbox = %mailbox.name,
            candidates = candidates.len(),
            "scanned unseen messages"
        );

        for candidate in candidates {
            match self.persist_candidate(mailbox, &candidate).await {
                Ok(Persisted::Stored(report)) => {
                    if let Err(e) = session.mark_seen(candidate.message_id) {
                        warn!(id = candidate.message_id, error = %e, "failed to flag message seen");
                    }
                    self.audit_event(
                        mailbox.owner_id,
                        "report_processed",
                        "dmarc_report",
                        Some(&report.id.to_string()),
                        json!({
                            "subject": candidate.subject,
                            "filename": candidate.filename,
                            "org_name": report.org_name,
                            "domain": report.domain,
                        }),
                    )
                    .await;
                    summary.processed += 1;
                    summary.reports.push(report);
                }
                Ok(Persisted::Duplicate) => {
                    // already stored in an earlier run, retire the message
                    if let Err(e) = session.mark_seen(candidate.message_id) {
                        warn!(id = candidate.message_id, error = %e, "failed to flag message seen");
                    }
                    summary.duplicates += 1;
                }
                Err(e) => {
                    warn!(
                        subject = %candidate.subject,
                        error = %e,
                        "failed to process report attachment"
                    );
                    summary.errors += 1;
                    summary.error_details.push(ErrorDetail {
                        subject: candidate.subject,
                        filename: candidate.filename,
                        error: e.to_string(),
                    });
                }
            }
        }

        if let Err(e) = session.logout() {
            debug!(error = %e, "logout failed");
        }

        if let Err(e) = self.mailboxes.update_last_polled(mailbox.id).await {
            warn!(error = %e, "failed to update last polled timestamp");
        }

        self.audit_event(
            mailbox.owner_id,
            "ingestion_completed",
            "mailbox_config",
            Some(&mailbox.id.to_string()),
            json!({
                "processed": summary.processed,
                "errors": summary.errors,
                "duplicates": summary.duplicates,
            }),
        )
        .await;

        Ok(summary)
    }

    fn connect_with_retry(
        &self,
        creds: &MailboxCredentials,
    ) -> Result<Box<dyn crate::ingest::mailbox::MailboxSession>> {
        let attempts = self.config.connect_retries.max(1);
        let mut last_err = Error::Connection("no connection attempts made".into());
        for attempt in 1..=attempts {
            match self.transport.connect(creds) {
                Ok(session) => return Ok(session),
                Err(e) => {
                    warn!(attempt, error = %e, "mailbox connection attempt failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// Scan unseen messages, bounded by the batch limit, and extract
    /// report attachments. Messages that carry no report signal stay
    /// unseen and unexamined by later stages.
    fn scan_unseen(
        &self,
        session: &mut dyn crate::ingest::mailbox::MailboxSession,
        summary: &mut IngestionSummary,
    ) -> Result<Vec<ReportCandidate>> {
        let mut ids = session.list_unseen()?;
        if ids.len() > self.config.batch_limit {
            warn!(
                total = ids.len(),
                limit = self.config.batch_limit,
                "limiting run to most recent unseen messages"
            );
            ids = ids.split_off(ids.len() - self.config.batch_limit);
        }

        let parser = MessageParser::default();
        let mut candidates = Vec::new();

        for id in ids {
            let raw = match session.fetch(id) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(id, error = %e, "failed to fetch message");
                    summary.errors += 1;
                    summary.error_details.push(ErrorDetail {
                        subject: format!("message {}", id),
                        filename: None,
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            let message = match parser.parse(&raw) {
                Some(m) => m,
                None => continue,
            };

            let subject = message.subject().unwrap_or_default().to_string();
            let sender = message
                .from()
                .and_then(|a| a.iter().next())
                .and_then(|a| a.address())
                .unwrap_or_default()
                .to_string();
            let body = message.body_text(0).unwrap_or_default();

            let looks_like_report = detect::subject_matches(&subject)
                || detect::sender_matches(&sender)
                || detect::body_matches(&body)
                || message.attachments().any(|p| {
                    detect::attachment_matches(p.attachment_name(), p.contents())
                });
            if !looks_like_report {
                continue;
            }

            let mut found = false;
            for part in message.attachments() {
                let name = part.attachment_name();
                if detect::attachment_matches(name, part.contents()) {
                    candidates.push(ReportCandidate {
                        subject: subject.clone(),
                        filename: name.map(|n| n.to_string()),
                        payload: part.contents().to_vec(),
                        message_id: id,
                    });
                    found = true;
                }
            }
            if !found {
                warn!(subject = %subject, "report message carries no usable attachment");
            }
        }

        Ok(candidates)
    }

    async fn persist_candidate(
        &self,
        mailbox: &MailboxConfig,
        candidate: &ReportCandidate,
    ) -> Result<Persisted> {
        let xml = decode_attachment(&candidate.payload, candidate.filename.as_deref());
        let parsed = parse_report(&xml)?;

        let report_id = parsed.report_id.clone().unwrap_or_else(|| "unknown".into());
        let org_name = parsed.org_name.clone().unwrap_or_else(|| "unknown".into());

        if self
            .reports
            .find_duplicate(mailbox.owner_id, &report_id, &org_name)
            .await?
            .is_some()
        {
            info!(report_id = %report_id, org_name = %org_name, "report already stored, skipping");
            return Ok(Persisted::Duplicate);
        }

        let (new_report, new_records) = to_storage(mailbox, &parsed, report_id, org_name);
        let stored = self.reports.insert(new_report, new_records).await?;

        Ok(Persisted::Stored(ReportSummary {
            id: stored.id,
            org_name: stored.org_name,
            domain: stored.domain,
            total_records: stored.total_records,
        }))
    }

    /// Audit failures are logged, never propagated
    async fn audit_event(
        &self,
        owner_id: OwnerId,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        details: serde_json::Value,
    ) {
        if let Err(e) = self
            .audit
            .record(owner_id, action, resource_type, resource_id, details)
            .await
        {
            warn!(action, error = %e, "failed to record audit event");
        }
    }
}

enum Persisted {
    Stored(ReportSummary),
    Duplicate,
}

fn to_storage(
    mailbox: &MailboxConfig,
    parsed: &ParsedReport,
    report_id: String,
    org_name: String,
) -> (NewReport, Vec<NewReportRecord>) {
    let report = NewReport {
        owner_id: mailbox.owner_id,
        mailbox_config_id: Some(mailbox.id),
        org_name,
        email: parsed.email.clone(),
        report_id,
        domain: parsed.domain.clone().unwrap_or_else(|| "unknown".into()),
        date_range_begin: parsed.date_range_begin,
        date_range_end: parsed.date_range_end,
        domain_policy: parsed.domain_policy.clone(),
        subdomain_policy: parsed.subdomain_policy.clone(),
        policy_percentage: parsed.policy_percentage,
        total_records: parsed.total_records,
        pass_count: parsed.pass_count,
        fail_count: parsed.fail_count,
    };

    let records = parsed
        .records
        .iter()
        .map(|r| NewReportRecord {
            source_ip: r.source_ip.clone().unwrap_or_else(|| "unknown".into()),
            count: r.count,
            disposition: r.disposition.to_string(),
            spf_result: r.spf_result.to_string(),
            dkim_result: r.dkim_result.to_string(),
            dkim_domain: r.dkim_domain.clone(),
            dkim_selector: r.dkim_selector.clone(),
            spf_domain: r.spf_domain.clone(),
            header_from: r.header_from.clone(),
            envelope_from: r.envelope_from.clone(),
            envelope_to: r.envelope_to.clone(),
        })
        .collect();

    (report, records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::mailbox::{MailboxSession, MailboxTransport};
    use async_trait::async_trait;
    use chrono::Utc;
    use postwatch_common::types::{MailboxConfigId, ReportId};
    use postwatch_storage::models::Report;
    use std::sync::Mutex;
    use uuid::Uuid;

    const SAMPLE_XML: &str = r#"<?xml version="1.0"?>
<feedback>
  <report_metadata>
    <org_name>google.com</org_name>
    <report_id>r-100</report_id>
  </report_metadata>
  <policy_published><domain>example.com</domain><p>none</p></policy_published>
  <record>
    <row>
      <source_ip>192.0.2.1</source_ip>
      <count>3</count>
      <policy_evaluated><disposition>none</disposition><dkim>pass</dkim><spf>pass</spf></policy_evaluated>
    </row>
  </record>
</feedback>"#;

    fn report_email(subject: &str, attachment: &str) -> Vec<u8> {
        format!(
            "From: noreply-dmarc-support@google.com\r\n\
             To: reports@example.com\r\n\
             Subject: {subject}\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
             \r\n\
             --b1\r\n\
             Content-Type: text/plain\r\n\
             \r\n\
             Attached is an aggregate report.\r\n\
             --b1\r\n\
             Content-Type: application/xml; name=\"report.xml\"\r\n\
             Content-Disposition: attachment; filename=\"report.xml\"\r\n\
             \r\n\
             {attachment}\r\n\
             --b1--\r\n"
        )
        .into_bytes()
    }

    #[derive(Default)]
    struct FakeMailboxState {
        messages: Vec<(u32, Vec<u8>)>,
        seen: Vec<u32>,
        connect_failures: u32,
        connects: u32,
        last_use_ssl: Option<bool>,
        fetch_failures: Vec<u32>,
    }

    #[derive(Clone)]
    struct FakeTransport(Arc<Mutex<FakeMailboxState>>);

    impl MailboxTransport for FakeTransport {
        fn connect(&self, creds: &MailboxCredentials) -> Result<Box<dyn MailboxSession>> {
            let mut state = self.0.lock().unwrap();
            state.connects += 1;
            state.last_use_ssl = Some(creds.use_ssl);
            if state.connect_failures > 0 {
                state.connect_failures -= 1;
                return Err(Error::Connection("connection refused".into()));
            }
            Ok(Box::new(FakeSession(self.0.clone())))
        }
    }

    struct FakeSession(Arc<Mutex<FakeMailboxState>>);

    impl MailboxSession for FakeSession {
        fn list_unseen(&mut self) -> Result<Vec<u32>> {
            let state = self.0.lock().unwrap();
            Ok(state
                .messages
                .iter()
                .map(|(id, _)| *id)
                .filter(|id| !state.seen.contains(id))
                .collect())
        }

        fn fetch(&mut self, id: u32) -> Result<Vec<u8>> {
            let state = self.0.lock().unwrap();
            if state.fetch_failures.contains(&id) {
                return Err(Error::Connection("fetch failed".into()));
            }
            state
                .messages
                .iter()
                .find(|(m, _)| *m == id)
                .map(|(_, raw)| raw.clone())
                .ok_or_else(|| Error::Connection("no such message".into()))
        }

        fn mark_seen(&mut self, id: u32) -> Result<()> {
            self.0.lock().unwrap().seen.push(id);
            Ok(())
        }

        fn logout(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeReportRepo {
        stored: Mutex<Vec<Report>>,
    }

    #[async_trait]
    impl ReportRepository for FakeReportRepo {
        async fn find_duplicate(
            &self,
            owner_id: OwnerId,
            report_id: &str,
            org_name: &str,
        ) -> Result<Option<ReportId>> {
            Ok(self
                .stored
                .lock()
                .unwrap()
                .iter()
                .find(|r| {
                    r.owner_id == owner_id && r.report_id == report_id && r.org_name == org_name
                })
                .map(|r| r.id))
        }

        async fn insert(
            &self,
            report: NewReport,
            _records: Vec<NewReportRecord>,
        ) -> Result<Report> {
            let row = Report {
                id: Uuid::now_v7(),
                owner_id: report.owner_id,
                mailbox_config_id: report.mailbox_config_id,
                org_name: report.org_name,
                email: report.email,
                report_id: report.report_id,
                domain: report.domain,
                date_range_begin: report.date_range_begin,
                date_range_end: report.date_range_end,
                domain_policy: report.domain_policy,
                subdomain_policy: report.subdomain_policy,
                policy_percentage: report.policy_percentage,
                total_records: report.total_records,
                pass_count: report.pass_count,
                fail_count: report.fail_count,
                status: "processed".into(),
                error_message: None,
                created_at: Utc::now(),
            };
            self.stored.lock().unwrap().push(row.clone());
            Ok(row)
        }

        async fn list_since(
            &self,
            _owner_id: OwnerId,
            _domain: &str,
            _since: chrono::DateTime<Utc>,
        ) -> Result<Vec<Report>> {
            Ok(Vec::new())
        }

        async fn records_since(
            &self,
            _owner_id: OwnerId,
            _domain: &str,
            _since: chrono::DateTime<Utc>,
        ) -> Result<Vec<postwatch_storage::models::ReportRecord>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct FakeMailboxRepo {
        polled: Mutex<Vec<MailboxConfigId>>,
    }

    #[async_trait]
    impl MailboxConfigRepository for FakeMailboxRepo {
        async fn create(
            &self,
            _input: postwatch_storage::models::CreateMailboxConfig,
        ) -> Result<MailboxConfig> {
            Err(Error::Internal("not used".into()))
        }

        async fn get(
            &self,
            _owner_id: OwnerId,
            _id: MailboxConfigId,
        ) -> Result<Option<MailboxConfig>> {
            Ok(None)
        }

        async fn list_active(&self) -> Result<Vec<MailboxConfig>> {
            Ok(Vec::new())
        }

        async fn update_last_polled(&self, id: MailboxConfigId) -> Result<()> {
            self.polled.lock().unwrap().push(id);
            Ok(())
        }

        async fn set_active(&self, _id: MailboxConfigId, _active: bool) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeAuditRepo {
        actions: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AuditRepository for FakeAuditRepo {
        async fn record(
            &self,
            _owner_id: OwnerId,
            action: &str,
            _resource_type: &str,
            _resource_id: Option<&str>,
            _details: serde_json::Value,
        ) -> Result<()> {
            self.actions.lock().unwrap().push(action.to_string());
            Ok(())
        }
    }

    fn mailbox_config() -> MailboxConfig {
        MailboxConfig {
            id: Uuid::now_v7(),
            owner_id: Uuid::now_v7(),
            name: "primary".into(),
            host: "imap.example.com".into(),
            port: 993,
            username: "reports@example.com".into(),
            password_encrypted: String::new(),
            encryption_key_id: String::new(),
            use_ssl: true,
            folder: "INBOX".into(),
            is_active: true,
            last_polled_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    struct Harness {
        pipeline: IngestionPipeline,
        state: Arc<Mutex<FakeMailboxState>>,
        reports: Arc<FakeReportRepo>,
        mailboxes: Arc<FakeMailboxRepo>,
        audit: Arc<FakeAuditRepo>,
    }

    fn harness(state: FakeMailboxState) -> Harness {
        let state = Arc::new(Mutex::new(state));
        let reports = Arc::new(FakeReportRepo::default());
        let mailboxes = Arc::new(FakeMailboxRepo::default());
        let audit = Arc::new(FakeAuditRepo::default());
        let pipeline = IngestionPipeline::new(
            mailboxes.clone(),
            reports.clone(),
            audit.clone(),
            Arc::new(FakeTransport(state.clone())),
            IngestConfig::default(),
        );
        Harness {
            pipeline,
            state,
            reports,
            mailboxes,
            audit,
        }
    }

    #[tokio::test]
    async fn test_stores_report_and_marks_seen() {
        let h = harness(FakeMailboxState {
            messages: vec![(1, report_email("Report Domain: example.com", SAMPLE_XML))],
            ..Default::default()
        });
        let mailbox = mailbox_config();

        let summary = h.pipeline.run(&mailbox, "secret").await.unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.errors, 0);
        assert_eq!(summary.reports[0].org_name, "google.com");
        assert_eq!(summary.reports[0].total_records, 3);
        assert_eq!(h.state.lock().unwrap().seen, vec![1]);
        assert_eq!(h.mailboxes.polled.lock().unwrap().len(), 1);
        let actions = h.audit.actions.lock().unwrap();
        assert!(actions.contains(&"report_processed".to_string()));
        assert!(actions.contains(&"ingestion_completed".to_string()));
    }

    #[tokio::test]
    async fn test_duplicate_is_counted_and_retired() {
        let h = harness(FakeMailboxState {
            messages: vec![
                (1, report_email("DMARC Aggregate Report", SAMPLE_XML)),
                (2, report_email("DMARC Aggregate Report", SAMPLE_XML)),
            ],
            ..Default::default()
        });
        let mailbox = mailbox_config();

        let summary = h.pipeline.run(&mailbox, "secret").await.unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(h.reports.stored.lock().unwrap().len(), 1);
        // both messages are retired either way
        assert_eq!(h.state.lock().unwrap().seen, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_unrelated_mail_is_left_unseen() {
        let raw = b"From: alice@example.com\r\nSubject: lunch\r\n\r\nnoon?\r\n".to_vec();
        let h = harness(FakeMailboxState {
            messages: vec![(7, raw)],
            ..Default::default()
        });
        let mailbox = mailbox_config();

        let summary = h.pipeline.run(&mailbox, "secret").await.unwrap();

        assert_eq!(summary.processed, 0);
        assert_eq!(summary.errors, 0);
        assert!(h.state.lock().unwrap().seen.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_attachment_counts_as_error_and_stays_unseen() {
        let h = harness(FakeMailboxState {
            messages: vec![(3, report_email("DMARC Aggregate Report", "<broken"))],
            ..Default::default()
        });
        let mailbox = mailbox_config();

        let summary = h.pipeline.run(&mailbox, "secret").await.unwrap();

        assert_eq!(summary.processed, 0);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.error_details.len(), 1);
        assert!(h.state.lock().unwrap().seen.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_carries_matching_error_detail() {
        let h = harness(FakeMailboxState {
            messages: vec![
                (1, report_email("DMARC Aggregate Report", SAMPLE_XML)),
                (2, report_email("DMARC Aggregate Report", SAMPLE_XML)),
            ],
            fetch_failures: vec![1],
            ..Default::default()
        });
        let mailbox = mailbox_config();

        let summary = h.pipeline.run(&mailbox, "secret").await.unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.error_details.len(), 1);
        assert_eq!(summary.error_details[0].subject, "message 1");
        assert!(summary.error_details[0].error.contains("fetch failed"));
    }

    #[tokio::test]
    async fn test_connection_mode_follows_mailbox_config() {
        let h = harness(FakeMailboxState::default());
        let mut mailbox = mailbox_config();
        mailbox.use_ssl = false;

        h.pipeline.run(&mailbox, "secret").await.unwrap();
        assert_eq!(h.state.lock().unwrap().last_use_ssl, Some(false));

        mailbox.use_ssl = true;
        h.pipeline.run(&mailbox, "secret").await.unwrap();
        assert_eq!(h.state.lock().unwrap().last_use_ssl, Some(true));
    }

    #[tokio::test]
    async fn test_connect_retries_then_succeeds() {
        let h = harness(FakeMailboxState {
            messages: vec![(1, report_email("DMARC Aggregate Report", SAMPLE_XML))],
            connect_failures: 2,
            ..Default::default()
        });
        let mailbox = mailbox_config();

        let summary = h.pipeline.run(&mailbox, "secret").await.unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(h.state.lock().unwrap().connects, 3);
    }

    #[tokio::test]
    async fn test_connect_retries_exhausted_fail_run() {
        let h = harness(FakeMailboxState {
            connect_failures: 10,
            ..Default::default()
        });
        let mailbox = mailbox_config();

        let err = h.pipeline.run(&mailbox, "secret").await.unwrap_err();

        assert_eq!(err.code(), "CONNECTION_ERROR");
        assert_eq!(h.state.lock().unwrap().connects, 3);
        let actions = h.audit.actions.lock().unwrap();
        assert!(actions.contains(&"ingestion_failed".to_string()));
    }
}
