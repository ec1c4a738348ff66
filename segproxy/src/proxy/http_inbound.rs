use crate::common::find_head_end;
use crate::network::egress::Connector;
use crate::proxy::error::RequestError;
use crate::proxy::{Dispatcher, NetworkAddr, RequestContext};
use httparse::Request;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use url::Url;

pub const MAX_REQUEST_HEAD: usize = 64 * 1024;
const MAX_HEADERS: usize = 96;

/// Parsed request line and headers of one proxied request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// Uppercased.
    pub method: String,
    pub target: NetworkAddr,
    /// Path and query; empty for CONNECT.
    pub path: String,
    /// Minor version of HTTP/1.x.
    pub version: u8,
    pub headers: Vec<(String, Vec<u8>)>,
}

impl RequestHead {
    pub fn is_connect(&self) -> bool {
        self.method == "CONNECT"
    }

    pub fn context(&self) -> RequestContext {
        if self.is_connect() {
            RequestContext::connect(&self.target)
        } else {
            RequestContext::http(&self.method, &self.target, &self.path)
        }
    }
}

/// Parses a complete request head: CONNECT with a `host:port` authority, or any
/// other method with an absolute-form `http://` URL.
pub fn parse_request_head(buf: &[u8]) -> Result<RequestHead, RequestError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = Request::new(headers.as_mut());
    match req.parse(buf) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Err(RequestError::Incomplete),
        Err(e) => return Err(RequestError::Invalid(format!("Malformed request: {}", e))),
    }
    let method = req
        .method
        .ok_or_else(|| RequestError::Invalid("Missing method".to_string()))?
        .to_ascii_uppercase();
    let raw_target = req
        .path
        .ok_or_else(|| RequestError::Invalid("Missing request target".to_string()))?;
    let version = req.version.unwrap_or(1);
    let headers = req
        .headers
        .iter()
        .map(|h| (h.name.to_string(), h.value.to_vec()))
        .collect();

    if method == "CONNECT" {
        let target = raw_target
            .parse::<NetworkAddr>()
            .map_err(|_| RequestError::Invalid("CONNECT target must be host:port".to_string()))?;
        return Ok(RequestHead {
            method,
            target,
            path: String::new(),
            version,
            headers,
        });
    }

    let not_absolute =
        || RequestError::Invalid("Only absolute-form http:// URLs are supported".to_string());
    let url = Url::parse(raw_target).map_err(|_| not_absolute())?;
    if url.scheme() != "http" {
        return Err(not_absolute());
    }
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| RequestError::Invalid("Missing host in URL".to_string()))?;
    let port = url.port_or_known_default().unwrap_or(80);
    let mut path = match url.path() {
        "" => "/".to_string(),
        p => p.to_string(),
    };
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }
    Ok(RequestHead {
        method,
        target: NetworkAddr::new(host, port),
        path,
        version,
        headers,
    })
}

/// Reads until the end of the request head, within `timeout`.
/// Returns the head and whatever the client already sent after it.
pub async fn read_request_head<S>(
    stream: &mut S,
    timeout: Duration,
) -> Result<(RequestHead, Vec<u8>), RequestError>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let read = async {
        let mut buf = Vec::with_capacity(1024);
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(end) = find_head_end(&buf) {
                if end > MAX_REQUEST_HEAD {
                    return Err(RequestError::TooLarge);
                }
                let head = parse_request_head(&buf[..end])?;
                return Ok((head, buf.split_off(end)));
            }
            if buf.len() > MAX_REQUEST_HEAD {
                return Err(RequestError::TooLarge);
            }
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(RequestError::Incomplete);
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    };
    tokio::time::timeout(timeout, read)
        .await
        .map_err(|_| RequestError::Timeout)?
}

pub struct HttpInbound<C: Connector> {
    server: TcpListener,
    permits: Arc<Semaphore>,
    max_connections: usize,
    dispatcher: Arc<Dispatcher<C>>,
}

impl<C: Connector + 'static> HttpInbound<C> {
    pub async fn new(
        host: &str,
        port: u16,
        max_connections: usize,
        dispatcher: Arc<Dispatcher<C>>,
    ) -> io::Result<Self> {
        let server = TcpListener::bind((host, port)).await?;
        Ok(Self {
            server,
            permits: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            dispatcher,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.server.local_addr()
    }

    pub async fn run(self) {
        loop {
            let (socket, addr) = match self.server.accept().await {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!("[HttpInbound] accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                tracing::warn!(
                    "Connection limit {} reached, closing {}",
                    self.max_connections,
                    addr
                );
                drop(socket);
                continue;
            };
            let disp = self.dispatcher.clone();
            tokio::spawn(async move {
                disp.submit_tcp(socket, addr).await;
                drop(permit);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::Scheme;
    use tokio::io::{duplex, AsyncWriteExt};

    #[test]
    fn test_parse_connect() {
        let req = parse_request_head(
            b"CONNECT Sub.Example.com:443 HTTP/1.1\r\nHost: sub.example.com:443\r\n\r\n",
        )
        .unwrap();
        assert!(req.is_connect());
        assert_eq!(req.target, NetworkAddr::new("sub.example.com", 443));
        let ctx = req.context();
        assert_eq!(ctx.scheme, Scheme::Https);
        assert_eq!(ctx.method, "CONNECT");
        assert_eq!(ctx.path, "");

        let req = parse_request_head(b"CONNECT [::1]:8443 HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.target, NetworkAddr::Raw("[::1]:8443".parse().unwrap()));
    }

    #[test]
    fn test_parse_absolute_form() {
        let req = parse_request_head(b"get http://example.com HTTP/1.0\r\nX-A: 1\r\n\r\n").unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.target, NetworkAddr::new("example.com", 80));
        assert_eq!(req.path, "/");
        assert_eq!(req.version, 0);
        assert_eq!(req.headers, vec![("X-A".to_string(), b"1".to_vec())]);
        let ctx = req.context();
        assert_eq!(ctx.scheme, Scheme::Http);
        assert!(!ctx.is_connect);

        let req = parse_request_head(b"POST http://[2001:db8::1]:8080/a/b?x=1&y HTTP/1.1\r\n\r\n")
            .unwrap();
        assert_eq!(req.target.port(), 8080);
        assert_eq!(req.target.host(), "2001:db8::1");
        assert_eq!(req.path, "/a/b?x=1&y");
    }

    #[test]
    fn test_parse_rejects() {
        let cases: [(&[u8], &str); 6] = [
            (b"GET / HTTP/1.1\r\nHost: a.com\r\n\r\n", "absolute-form"),
            (b"GET https://a.com/ HTTP/1.1\r\n\r\n", "absolute-form"),
            (b"CONNECT a.com HTTP/1.1\r\n\r\n", "host:port"),
            (b"CONNECT a.com:0 HTTP/1.1\r\n\r\n", "host:port"),
            (b"CONNECT :443 HTTP/1.1\r\n\r\n", "host:port"),
            (b"HELLO\r\n\r\n", "Malformed"),
        ];
        for (raw, expected) in cases {
            match parse_request_head(raw) {
                Err(RequestError::Invalid(msg)) => assert!(msg.contains(expected), "{}", msg),
                other => panic!("{:?}: {:?}", String::from_utf8_lossy(raw), other),
            }
        }
    }

    #[tokio::test]
    async fn test_read_request_head_keeps_leftover() {
        let (mut client, mut server) = duplex(1024);
        client
            .write_all(b"POST http://a.com/ HTTP/1.1\r\nContent-Length: 4\r\n")
            .await
            .unwrap();
        let reader = tokio::spawn(async move {
            read_request_head(&mut server, Duration::from_secs(5)).await
        });
        client.write_all(b"\r\nbodyMORE").await.unwrap();
        let (head, leftover) = reader.await.unwrap().unwrap();
        assert_eq!(head.method, "POST");
        assert_eq!(leftover, b"bodyMORE");
    }

    #[tokio::test]
    async fn test_read_request_head_limits() {
        let (mut client, mut server) = duplex(128 * 1024);
        client.write_all(b"GET http://a.com/ HTTP/1.1\r\n").await.unwrap();
        client
            .write_all(format!("X-Big: {}\r\n", "a".repeat(MAX_REQUEST_HEAD)).as_bytes())
            .await
            .unwrap();
        assert!(matches!(
            read_request_head(&mut server, Duration::from_secs(5)).await,
            Err(RequestError::TooLarge)
        ));

        let (client, mut server) = duplex(1024);
        drop(client);
        assert!(matches!(
            read_request_head(&mut server, Duration::from_secs(5)).await,
            Err(RequestError::Incomplete)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_request_head_timeout() {
        let (_client, mut server) = duplex(1024);
        assert!(matches!(
            read_request_head(&mut server, Duration::from_secs(60)).await,
            Err(RequestError::Timeout)
        ));
    }
}
