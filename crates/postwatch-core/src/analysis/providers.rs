//! Known mail provider IP ranges

use std::net::IpAddr;

use ipnet::IpNet;

/// Maps sending IPs to the mail service provider that operates them
pub struct ProviderDirectory {
    ranges: Vec<(&'static str, IpNet)>,
}

const KNOWN_RANGES: &[(&str, &str)] = &[
    ("google", "209.85.128.0/17"),
    ("google", "74.125.0.0/16"),
    ("google", "173.194.0.0/16"),
    ("google", "2607:f8b0::/32"),
    ("google", "2a00:1450::/32"),
    ("microsoft", "40.92.0.0/15"),
    ("microsoft", "40.107.0.0/16"),
    ("microsoft", "52.100.0.0/14"),
    ("microsoft", "104.47.0.0/17"),
    ("mailgun", "69.72.32.0/24"),
    ("mailgun", "69.72.33.0/24"),
    ("mailgun", "69.72.34.0/24"),
];

impl ProviderDirectory {
    pub fn new() -> Self {
        let ranges = KNOWN_RANGES
            .iter()
            .filter_map(|(name, cidr)| cidr.parse().ok().map(|net| (*name, net)))
            .collect();
        Self { ranges }
    }

    /// Identify the provider owning an IP. When ranges overlap the most
    /// specific prefix wins.
    pub fn identify(&self, ip: IpAddr) -> Option<&'static str> {
        self.ranges
            .iter()
            .filter(|(_, net)| net.contains(&ip))
            .max_by_key(|(_, net)| net.prefix_len())
            .map(|(name, _)| *name)
    }

    /// Identify from a textual IP, tolerating garbage input
    pub fn identify_str(&self, ip: &str) -> Option<&'static str> {
        ip.parse().ok().and_then(|addr| self.identify(addr))
    }
}

impl Default for ProviderDirectory {
    fn default() -> Self {
        Self::new()
    }
}
