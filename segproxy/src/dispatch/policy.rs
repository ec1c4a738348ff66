use crate::common::host_matcher::normalize_host;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyDenied {
    #[error("Blocked private/loopback/reserved address")]
    PrivateAddress,
    #[error("Blocked by deny rule: {0}")]
    DenyRule(String),
    #[error("Not in allow list")]
    NotAllowed,
}

/// Domain allow/deny lists. A rule is either an exact host or `.suffix`,
/// which matches the suffix itself and every subdomain of it.
#[derive(Debug, Clone, Default)]
pub struct HostPolicy {
    allow: Vec<String>,
    deny: Vec<String>,
    deny_private: bool,
}

impl HostPolicy {
    pub fn new(allow: Vec<String>, deny: Vec<String>, deny_private: bool) -> Self {
        let clean = |list: Vec<String>| {
            list.into_iter()
                .map(|r| r.trim().to_ascii_lowercase())
                .filter(|r| !r.is_empty())
                .collect()
        };
        Self {
            allow: clean(allow),
            deny: clean(deny),
            deny_private,
        }
    }

    /// Name-based checks; a literal IP host is also checked for privacy here.
    pub fn check_host(&self, host: &str) -> Result<(), PolicyDenied> {
        let host = normalize_host(host);
        if let Ok(ip) = host.parse::<IpAddr>() {
            self.check_addresses(&[ip])?;
        }
        if let Some(rule) = self.deny.iter().find(|r| rule_matches(r, &host)) {
            return Err(PolicyDenied::DenyRule(rule.clone()));
        }
        if !self.allow.is_empty() && !self.allow.iter().any(|r| rule_matches(r, &host)) {
            return Err(PolicyDenied::NotAllowed);
        }
        Ok(())
    }

    /// Applied to resolved destination addresses before connecting.
    pub fn check_addresses(&self, addrs: &[IpAddr]) -> Result<(), PolicyDenied> {
        if self.deny_private && addrs.iter().any(|ip| is_private_ip(*ip)) {
            Err(PolicyDenied::PrivateAddress)
        } else {
            Ok(())
        }
    }
}

fn rule_matches(rule: &str, host: &str) -> bool {
    match rule.strip_prefix('.') {
        Some(suffix) => {
            let suffix = suffix.trim_start_matches('.');
            host == suffix
                || (host.len() > suffix.len()
                    && host.ends_with(suffix)
                    && host.as_bytes()[host.len() - suffix.len() - 1] == b'.')
        }
        None => rule == host,
    }
}

pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_private_v4(v4),
            None => is_private_v6(v6),
        },
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        // 240.0.0.0/4 reserved
        || ip.octets()[0] >= 240
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
        // 2001:db8::/32 documentation
        || (first == 0x2001 && ip.segments()[1] == 0x0db8)
}
