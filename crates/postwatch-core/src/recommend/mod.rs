//! Remediation recommendation engine
//!
//! Turns detected issues into concrete, stepwise remediation plans and
//! persists them against the analysis run that surfaced the issue. Plans
//! are templates: the same issue type always yields the same four steps,
//! parameterized by domain and provider.

use std::sync::Arc;

use postwatch_common::types::{
    AnalysisResultId, RecommendationId, RecommendationStatus, Severity, UserAction,
};
use postwatch_common::{Error, Result};
use postwatch_storage::models::{AnalysisResultRow, NewRecommendation, RecommendationRow};
use postwatch_storage::repository::RecommendationRepository;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::analysis::spf_record::SpfSource;
use crate::analysis::Issue;

/// SPF include tokens for common mail providers
const PROVIDER_SPF_INCLUDES: &[(&str, &str)] = &[
    ("google", "include:_spf.google.com"),
    ("microsoft", "include:spf.protection.outlook.com"),
    ("mailgun", "include:mailgun.org"),
    ("sendgrid", "include:sendgrid.net"),
    ("mailchimp", "include:servers.mcsv.net"),
    ("amazonses", "include:amazonses.com"),
];

/// One step of a remediation plan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanStep {
    pub step: u32,
    pub title: String,
    pub description: String,
    pub action: String,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spf_addition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_record: Option<String>,
}

/// A remediation plan before persistence
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationPlan {
    pub recommendation_type: String,
    pub priority: Severity,
    pub title: String,
    pub description: String,
    pub steps: Vec<PlanStep>,
}

pub struct RecommendationEngine {
    recommendations: Arc<dyn RecommendationRepository>,
    spf: Arc<dyn SpfSource>,
}

impl RecommendationEngine {
    pub fn new(recommendations: Arc<dyn RecommendationRepository>, spf: Arc<dyn SpfSource>) -> Self {
        Self {
            recommendations,
            spf,
        }
    }

    /// Generate and store recommendations for every actionable issue of
    /// one analysis run
    pub async fn generate(&self, analysis: &AnalysisResultRow) -> Result<Vec<RecommendationRow>> {
        let issues: Vec<Issue> = serde_json::from_value(analysis.issues.clone())
            .map_err(|e| Error::Internal(format!("stored issues are unreadable: {}", e)))?;

        // the live record is only needed to compose provider fixes
        let current_spf = if issues.iter().any(|i| i.issue_type == "spf_missing_provider") {
            self.spf.lookup_spf(&analysis.domain).await
        } else {
            None
        };

        let mut stored = Vec::new();
        for issue in &issues {
            let plan = match plan_for_issue(issue, &analysis.domain, current_spf.as_deref()) {
                Some(plan) => plan,
                None => {
                    debug!(issue_type = %issue.issue_type, "no plan template for issue");
                    continue;
                }
            };
            let row = self
                .recommendations
                .create(NewRecommendation {
                    analysis_result_id: analysis.id,
                    recommendation_type: plan.recommendation_type,
                    priority: plan.priority.to_string(),
                    title: plan.title,
                    description: plan.description,
                    implementation_steps: serde_json::to_value(&plan.steps)
                        .unwrap_or_else(|_| json!([])),
                })
                .await?;
            stored.push(row);
        }

        info!(
            domain = %analysis.domain,
            count = stored.len(),
            "recommendations generated"
        );
        Ok(stored)
    }

    pub async fn list_for_analysis(
        &self,
        analysis_id: AnalysisResultId,
    ) -> Result<Vec<RecommendationRow>> {
        self.recommendations.list_for_analysis(analysis_id).await
    }

    /// Update lifecycle status. Both values are validated before any
    /// write happens.
    pub async fn update_status(
        &self,
        id: RecommendationId,
        status: &str,
        user_action: &str,
    ) -> Result<()> {
        let status: RecommendationStatus = status.parse()?;
        let user_action: UserAction = user_action.parse()?;
        self.recommendations
            .update_status(id, status, user_action)
            .await
    }
}

/// The plan template for one issue, or None for informational issues
pub fn plan_for_issue(
    issue: &Issue,
    domain: &str,
    current_spf: Option<&str>,
) -> Option<RecommendationPlan> {
    match issue.issue_type.as_str() {
        "spf_missing" => Some(spf_creation_plan(domain)),
        "spf_missing_provider" => Some(spf_provider_plan(issue, domain, current_spf)),
        "spf_lookup_limit" => Some(spf_optimization_plan()),
        "dkim_high_failure" => Some(dkim_configuration_plan()),
        "pattern_many_failing_ips" => Some(security_review_plan()),
        _ => None,
    }
}

/// SPF include token for a provider, falling back to a direct ip4
/// mechanism for the failing IP
pub fn provider_include(provider: &str, failing_ip: &str) -> String {
    PROVIDER_SPF_INCLUDES
        .iter()
        .find(|(name, _)| *name == provider)
        .map(|(_, include)| include.to_string())
        .unwrap_or_else(|| format!("ip4:{}", failing_ip))
}

/// Produce an updated SPF record carrying the new mechanism. The token
/// is inserted before the terminal `all` when one exists, appended
/// otherwise. An already-present token leaves the record unchanged.
pub fn spf_fix_record(current: Option<&str>, token: &str) -> String {
    let current = match current {
        Some(c) => c,
        None => return format!("v=spf1 {} ~all", token),
    };

    if current.contains(token) {
        return current.to_string();
    }

    for all in [" ~all", " -all", " +all"] {
        if current.contains(all) {
            return current.replace(all, &format!(" {}{}", token, all));
        }
    }
    format!("{} {}", current, token)
}

fn step(n: u32, title: &str, description: &str, action: &str, details: &str) -> PlanStep {
    PlanStep {
        step: n,
        title: title.to_string(),
        description: description.to_string(),
        action: action.to_string(),
        details: details.to_string(),
        spf_addition: None,
        updated_record: None,
    }
}

fn spf_creation_plan(domain: &str) -> RecommendationPlan {
    RecommendationPlan {
        recommendation_type: "spf_creation".into(),
        priority: Severity::Critical,
        title: "Create SPF Record".into(),
        description: format!(
            "Domain {} is missing an SPF record, causing all emails to fail SPF authentication.",
            domain
        ),
        steps: vec![
            step(
                1,
                "Identify Your Mail Servers",
                "List all servers/services that send email for your domain",
                "audit_mail_sources",
                "Check with your email provider, marketing tools, and any custom applications",
            ),
            step(
                2,
                "Create Basic SPF Record",
                "Add a TXT record to your DNS",
                "dns_update",
                "Add TXT record: \"v=spf1 ~all\" (start restrictive, then add authorized servers)",
            ),
            step(
                3,
                "Add Authorized Mail Servers",
                "Update SPF record with your actual mail servers",
                "spf_update",
                "Add include: statements or ip4:/ip6: mechanisms for your mail providers",
            ),
            step(
                4,
                "Test and Monitor",
                "Verify SPF record and monitor DMARC reports",
                "verification",
                "Use SPF record checker tools and wait 24-48 hours for DMARC reports",
            ),
        ],
    }
}

fn spf_provider_plan(issue: &Issue, domain: &str, current_spf: Option<&str>) -> RecommendationPlan {
    let provider = issue.provider.as_deref().unwrap_or("unknown");
    let failing_ip = issue.ip.as_deref().unwrap_or_default();
    let include = provider_include(provider, failing_ip);
    let fixed = spf_fix_record(current_spf, &include);
    let provider_title = title_case(provider);

    let mut add_step = step(
        2,
        &format!("Add {} Include", provider_title),
        &format!("Add {} mail servers to your SPF record", provider),
        "spf_update",
        &format!(
            "Add \"{}\" to your SPF record before the \"all\" mechanism. Updated record: \"{}\"",
            include, fixed
        ),
    );
    add_step.spf_addition = Some(include);
    add_step.updated_record = Some(fixed);

    RecommendationPlan {
        recommendation_type: "spf_provider_fix".into(),
        priority: Severity::High,
        title: format!("Add {} to SPF Record", provider_title),
        description: format!(
            "Emails from {} servers are failing SPF authentication. Add {} to your SPF record.",
            provider, provider
        ),
        steps: vec![
            step(
                1,
                "Get Current SPF Record",
                &format!("Check your current SPF record for {}", domain),
                "dns_lookup",
                &format!("Use: dig {} TXT | grep spf", domain),
            ),
            add_step,
            step(
                3,
                "Verify SPF Record",
                "Ensure SPF record is valid and doesn't exceed 10 DNS lookups",
                "spf_validation",
                "Use online SPF checker tools to validate syntax and lookup count",
            ),
            step(
                4,
                "Monitor Results",
                "Wait for next DMARC reports to confirm fix",
                "monitoring",
                "Check DMARC reports in 24-48 hours to verify improvement",
            ),
        ],
    }
}

fn spf_optimization_plan() -> RecommendationPlan {
    RecommendationPlan {
        recommendation_type: "spf_optimization".into(),
        priority: Severity::High,
        title: "Optimize SPF Record - Too Many DNS Lookups".into(),
        description: "Your SPF record exceeds the 10 DNS lookup limit, which can cause SPF failures."
            .into(),
        steps: vec![
            step(
                1,
                "Audit SPF Record",
                "Count DNS lookups in your current SPF record",
                "spf_audit",
                "Each \"include:\", \"a\", \"mx\", and \"exists\" counts as one lookup",
            ),
            step(
                2,
                "Flatten SPF Includes",
                "Replace some include: statements with direct IP addresses",
                "spf_flattening",
                "Look up IP ranges for mail providers and use ip4:/ip6: mechanisms instead",
            ),
            step(
                3,
                "Remove Unused Includes",
                "Remove SPF includes for services you no longer use",
                "cleanup",
                "Verify each include: is still needed for current mail services",
            ),
            step(
                4,
                "Test Optimized Record",
                "Verify the optimized SPF record works correctly",
                "testing",
                "Use SPF testing tools and monitor DMARC reports after changes",
            ),
        ],
    }
}

fn dkim_configuration_plan() -> RecommendationPlan {
    RecommendationPlan {
        recommendation_type: "dkim_configuration".into(),
        priority: Severity::High,
        title: "Fix DKIM Signature Issues".into(),
        description: "High DKIM failure rate detected. DKIM signatures are failing validation."
            .into(),
        steps: vec![
            step(
                1,
                "Check DKIM DNS Records",
                "Verify DKIM public keys are properly published in DNS",
                "dkim_dns_check",
                "Check if DKIM DNS records exist and are correctly formatted",
            ),
            step(
                2,
                "Verify DKIM Configuration",
                "Ensure mail servers are properly signing emails",
                "dkim_config_check",
                "Check mail server DKIM configuration and private key",
            ),
            step(
                3,
                "Check Key Rotation",
                "Verify DKIM keys haven't expired or been rotated without DNS updates",
                "key_verification",
                "Ensure private key on mail server matches public key in DNS",
            ),
            step(
                4,
                "Test DKIM Signatures",
                "Send test emails and verify DKIM signatures",
                "dkim_testing",
                "Use email testing tools to verify DKIM signatures are valid",
            ),
        ],
    }
}

fn security_review_plan() -> RecommendationPlan {
    RecommendationPlan {
        recommendation_type: "security_review".into(),
        priority: Severity::Medium,
        title: "Security Review - Multiple Unauthorized Sources".into(),
        description:
            "Many different IP addresses are sending mail for your domain. This could indicate security issues."
                .into(),
        steps: vec![
            step(
                1,
                "Audit Email Sources",
                "Review all systems and services sending email for your domain",
                "email_audit",
                "Check marketing platforms, applications, and any automated systems",
            ),
            step(
                2,
                "Check for Compromised Accounts",
                "Look for signs of compromised email accounts or systems",
                "security_check",
                "Review login logs, unusual sending patterns, and user reports",
            ),
            step(
                3,
                "Implement Email Security",
                "Strengthen email security measures",
                "security_hardening",
                "Enable MFA, review user permissions, and implement monitoring",
            ),
            step(
                4,
                "Tighten SPF Policy",
                "Update SPF record to be more restrictive once sources are verified",
                "spf_tightening",
                "Consider changing from ~all to -all after confirming all legitimate sources",
            ),
        ],
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
