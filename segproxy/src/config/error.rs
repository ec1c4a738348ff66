use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("File error: {0}")]
    File(#[from] FileError),
    #[error("DNS error: {0}")]
    Dns(#[from] DnsConfigError),
    #[error("Rule error: {0}")]
    Rule(#[from] RuleParseError),
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum DnsConfigError {
    #[error("--dns-port requires --dns-server")]
    PortWithoutServer,
    #[error("--dns-transport requires --dns-server")]
    TransportWithoutServer,
    #[error("DNS port must be between 1 and 65535")]
    InvalidPort,
    #[error("Invalid DNS server: {0}")]
    InvalidServer(String),
}

#[derive(Error, Debug)]
pub enum FileError {
    #[error("{0}: cannot open file ({1})")]
    Io(String, std::io::Error),
    #[error("{0} deserialization error: {1}")]
    Serde(String, serde_yaml::Error),
}

/// A rule line that could not be loaded. `origin` is a file path or `inline`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{origin}:{line} {reason}")]
pub struct RuleParseError {
    pub origin: String,
    pub line: usize,
    pub reason: String,
}

impl RuleParseError {
    pub fn new(origin: impl Into<String>, line: usize, reason: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            line,
            reason: reason.into(),
        }
    }
}
