//! Published SPF record inspection
//!
//! Fetches the SPF TXT record for a domain and answers the structural
//! questions the analyzer asks of it: lookup count, terminal mechanism,
//! and whether a given source IP is covered by an ip4/ip6 mechanism.

use std::net::IpAddr;
use std::sync::OnceLock;

use async_trait::async_trait;
use ipnet::IpNet;
use regex::Regex;
use tracing::debug;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// Source of published SPF records, a seam for tests
#[async_trait]
pub trait SpfSource: Send + Sync {
    /// The v=spf1 TXT record for a domain, if one is published
    async fn lookup_spf(&self, domain: &str) -> Option<String>;
}

/// DNS-backed SPF source
pub struct DnsSpfSource {
    resolver: TokioAsyncResolver,
}

impl DnsSpfSource {
    pub fn new() -> Self {
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Self { resolver }
    }

    pub fn with_resolver(resolver: TokioAsyncResolver) -> Self {
        Self { resolver }
    }
}

impl Default for DnsSpfSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpfSource for DnsSpfSource {
    async fn lookup_spf(&self, domain: &str) -> Option<String> {
        let lookup = match self.resolver.txt_lookup(domain).await {
            Ok(lookup) => lookup,
            Err(e) => {
                debug!(domain, error = %e, "TXT lookup failed");
                return None;
            }
        };

        for record in lookup.iter() {
            let txt = record
                .txt_data()
                .iter()
                .map(|d| String::from_utf8_lossy(d))
                .collect::<String>();
            if txt.starts_with("v=spf1 ") || txt == "v=spf1" {
                return Some(txt);
            }
        }
        None
    }
}

fn ip_mechanism_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"ip[46]:([^\s]+)").unwrap())
}

fn include_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"include:([^\s]+)").unwrap())
}

/// `include:` targets of a record
pub fn includes(record: &str) -> Vec<String> {
    include_re()
        .captures_iter(record)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Estimate of the DNS lookups the record triggers. Counts include
/// mechanisms plus bare ` mx` and ` a` occurrences.
pub fn lookup_estimate(record: &str) -> usize {
    includes(record).len() + record.matches(" mx").count() + record.matches(" a").count()
}

/// Whether the record ends with an `all` qualifier
pub fn has_terminal_all(record: &str) -> bool {
    ["~all", "-all", "+all", "?all"]
        .iter()
        .any(|term| record.contains(term))
}

/// Whether an IP is covered by one of the record's ip4/ip6 mechanisms.
/// Includes are not chased; a covered IP is proof enough, an uncovered
/// one only a hint.
pub fn ip_authorized(ip: &str, record: Option<&str>) -> bool {
    let record = match record {
        Some(r) => r,
        None => return false,
    };

    if record.contains(&format!("ip4:{}", ip)) || record.contains(&format!("ip6:{}", ip)) {
        return true;
    }

    let addr: IpAddr = match ip.parse() {
        Ok(a) => a,
        Err(_) => return false,
    };

    for cap in ip_mechanism_re().captures_iter(record) {
        let mechanism = match cap.get(1) {
            Some(m) => m.as_str(),
            None => continue,
        };
        if !mechanism.contains('/') {
            continue;
        }
        if let Ok(net) = mechanism.parse::<IpNet>() {
            if net.contains(&addr) {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &str = "v=spf1 ip4:192.0.2.0/24 ip6:2001:db8::/32 include:_spf.google.com include:mailgun.org mx ~all";

    #[test]
    fn test_includes() {
        assert_eq!(includes(RECORD), vec!["_spf.google.com", "mailgun.org"]);
    }

    #[test]
    fn test_lookup_estimate_counts_includes_mx_and_a() {
        // 2 includes + 1 mx
        assert_eq!(lookup_estimate(RECORD), 3);
        assert_eq!(lookup_estimate("v=spf1 a mx include:x.com -all"), 3);
        assert_eq!(lookup_estimate("v=spf1 ip4:192.0.2.1 -all"), 0);
    }

    #[test]
    fn test_terminal_all() {
        assert!(has_terminal_all(RECORD));
        assert!(has_terminal_all("v=spf1 -all"));
        assert!(!has_terminal_all("v=spf1 ip4:192.0.2.1"));
    }

    #[test]
    fn test_ip_authorized_by_cidr() {
        assert!(ip_authorized("192.0.2.55", Some(RECORD)));
        assert!(ip_authorized("2001:db8::1", Some(RECORD)));
        assert!(!ip_authorized("198.51.100.1", Some(RECORD)));
    }

    #[test]
    fn test_ip_authorized_by_exact_mechanism() {
        let record = "v=spf1 ip4:203.0.113.9 -all";
        assert!(ip_authorized("203.0.113.9", Some(record)));
        assert!(!ip_authorized("203.0.113.10", Some(record)));
    }

    #[test]
    fn test_no_record_authorizes_nothing() {
        assert!(!ip_authorized("192.0.2.1", None));
        assert!(!ip_authorized("garbage", Some(RECORD)));
    }
}
