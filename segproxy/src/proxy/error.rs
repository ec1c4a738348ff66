use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("DNS query to {0} timed out")]
    Timeout(String),
    #[error("DNS server {0} unreachable: {1}")]
    Unreachable(String, std::io::Error),
    #[error("NXDOMAIN for {0}")]
    NxDomain(String),
    #[error("DNS server returned {0}")]
    ServerFailure(String),
    #[error("No DNS answers for {0}")]
    NoAnswers(String),
    #[error("Malformed DNS reply: {0}")]
    Malformed(String),
    #[error("Invalid DNS name {0}")]
    InvalidName(String),
    #[error("System resolver failed: {0}")]
    System(std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Connect timed out")]
    Timeout,
    #[error("Connection refused by {0}")]
    Refused(String),
    #[error("Destination {0} unreachable: {1}")]
    Unreachable(String, std::io::Error),
    #[error("No address to connect")]
    NoAddress,
}

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("Upstream proxy IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Upstream proxy handshake timed out")]
    Timeout,
    #[error("Upstream proxy CONNECT failed with status {0}")]
    Rejected(u16),
    #[error("Malformed upstream proxy response: {0}")]
    Malformed(&'static str),
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Idle timeout")]
    IdleTimeout,
}

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Request headers too large")]
    TooLarge,
    #[error("Client closed before sending a full request")]
    Incomplete,
    #[error("Timed out reading request")]
    Timeout,
    #[error("{0}")]
    Invalid(String),
}

/// Failure while opening the outbound leg of a session.
#[derive(Error, Debug)]
pub enum OutboundError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}
