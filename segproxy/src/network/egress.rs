use crate::proxy::error::ConnectError;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Opens the outbound stream for a session.
#[async_trait]
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Tries `addrs` in order, all within one `timeout`.
    async fn connect(
        &self,
        addrs: &[SocketAddr],
        timeout: Duration,
    ) -> Result<Self::Stream, ConnectError>;
}

#[derive(Debug, Default, Clone)]
pub struct Egress;

impl Egress {
    async fn walk(addrs: &[SocketAddr]) -> Result<TcpStream, ConnectError> {
        let mut last: Option<(SocketAddr, io::Error)> = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    // chunk boundaries must reach the wire as written
                    stream
                        .set_nodelay(true)
                        .map_err(|e| ConnectError::Unreachable(addr.to_string(), e))?;
                    return Ok(stream);
                }
                Err(e) => {
                    tracing::debug!("Connect to {} failed: {}", addr, e);
                    last = Some((*addr, e));
                }
            }
        }
        match last {
            None => Err(ConnectError::NoAddress),
            Some((addr, e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
                Err(ConnectError::Refused(addr.to_string()))
            }
            Some((addr, e)) => Err(ConnectError::Unreachable(addr.to_string(), e)),
        }
    }
}

#[async_trait]
impl Connector for Egress {
    type Stream = TcpStream;

    async fn connect(
        &self,
        addrs: &[SocketAddr],
        timeout: Duration,
    ) -> Result<Self::Stream, ConnectError> {
        tokio::time::timeout(timeout, Self::walk(addrs))
            .await
            .map_err(|_| ConnectError::Timeout)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn closed_port() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    #[tokio::test]
    async fn test_walk_addresses() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap();
        let closed = closed_port().await;
        let stream = Egress
            .connect(&[closed, open], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(stream.peer_addr().unwrap(), open);
        assert!(stream.nodelay().unwrap());
    }

    #[tokio::test]
    async fn test_connect_errors() {
        let closed = closed_port().await;
        assert!(matches!(
            Egress.connect(&[closed], Duration::from_secs(5)).await,
            Err(ConnectError::Refused(_))
        ));
        assert!(matches!(
            Egress.connect(&[], Duration::from_secs(5)).await,
            Err(ConnectError::NoAddress)
        ));
    }
}
