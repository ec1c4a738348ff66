use crate::common::host_matcher::normalize_host;
use std::fmt::{Display, Formatter};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// Domain name with port or pure socket address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NetworkAddr {
    Raw(SocketAddr),
    DomainName { domain_name: String, port: u16 },
}

impl Display for NetworkAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkAddr::Raw(addr) => write!(f, "{}", addr),
            NetworkAddr::DomainName { domain_name, port } => write!(f, "{}:{}", domain_name, port),
        }
    }
}

impl NetworkAddr {
    pub fn new(host: &str, port: u16) -> Self {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        match host.parse::<IpAddr>() {
            Ok(ip) => NetworkAddr::Raw(SocketAddr::new(ip, port)),
            Err(_) => NetworkAddr::DomainName {
                domain_name: normalize_host(host),
                port,
            },
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            NetworkAddr::Raw(addr) => addr.port(),
            NetworkAddr::DomainName { port, .. } => *port,
        }
    }

    /// Host without port; IPv6 literals are not bracketed.
    pub fn host(&self) -> String {
        match self {
            NetworkAddr::Raw(addr) => addr.ip().to_string(),
            NetworkAddr::DomainName { domain_name, .. } => domain_name.clone(),
        }
    }

    /// Host as it appears in an authority (`[v6]` bracketed).
    pub fn authority_host(&self) -> String {
        match self {
            NetworkAddr::Raw(SocketAddr::V6(addr)) => format!("[{}]", addr.ip()),
            _ => self.host(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddrParseError {
    MissingPort,
    InvalidPort,
    EmptyHost,
}

impl Display for AddrParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AddrParseError::MissingPort => f.write_str("expected host:port"),
            AddrParseError::InvalidPort => f.write_str("invalid port"),
            AddrParseError::EmptyHost => f.write_str("empty host"),
        }
    }
}

impl FromStr for NetworkAddr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s.rsplit_once(':').ok_or(AddrParseError::MissingPort)?;
        // a bare IPv6 address without brackets has no port
        if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
            return Err(AddrParseError::MissingPort);
        }
        let port = port
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or(AddrParseError::InvalidPort)?;
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if bare.is_empty() {
            return Err(AddrParseError::EmptyHost);
        }
        Ok(NetworkAddr::new(bare, port))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Scheme::Http => f.write_str("http"),
            Scheme::Https => f.write_str("https"),
        }
    }
}

/// Facts about one inbound request that rules are matched against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub host: String,
    pub port: u16,
    pub scheme: Scheme,
    pub method: String,
    pub path: String,
    pub is_connect: bool,
}

impl RequestContext {
    pub fn connect(target: &NetworkAddr) -> Self {
        Self {
            host: target.host(),
            port: target.port(),
            scheme: Scheme::Https,
            method: "CONNECT".to_string(),
            path: String::new(),
            is_connect: true,
        }
    }

    pub fn http(method: &str, target: &NetworkAddr, path: &str) -> Self {
        Self {
            host: target.host(),
            port: target.port(),
            scheme: Scheme::Http,
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            is_connect: false,
        }
    }

    pub fn target(&self) -> NetworkAddr {
        NetworkAddr::new(&self.host, self.port)
    }
}
