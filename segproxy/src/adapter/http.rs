use crate::common::find_head_end;
use crate::proxy::error::UpstreamError;
use crate::proxy::{NetworkAddr, RequestHead};
use httparse::Response;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const MAX_RESPONSE_HEAD: usize = 64 * 1024;

const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "te",
    "trailer",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
    "host",
];

/// Opens a CONNECT tunnel to `target` through an already connected upstream proxy.
/// Returns bytes the proxy sent after its response head; they belong to the tunnel.
pub async fn upstream_connect<S>(
    stream: &mut S,
    target: &NetworkAddr,
    timeout: Duration,
) -> Result<Vec<u8>, UpstreamError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    tokio::time::timeout(timeout, handshake(stream, target))
        .await
        .map_err(|_| UpstreamError::Timeout)?
}

async fn handshake<S>(stream: &mut S, target: &NetworkAddr) -> Result<Vec<u8>, UpstreamError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let req = format!(
        "CONNECT {0} HTTP/1.1\r\n\
        Host: {0}\r\n\
        Proxy-Connection: Keep-Alive\r\n\r\n",
        target
    );
    stream.write_all(req.as_bytes()).await?;
    stream.flush().await?;

    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(end) = find_head_end(&buf) {
            break end;
        }
        if buf.len() > MAX_RESPONSE_HEAD {
            return Err(UpstreamError::Malformed("response head too long"));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(UpstreamError::Malformed("EOF before response head"));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut resp = Response::new(headers.as_mut());
    resp.parse(&buf[..head_end])
        .map_err(|_| UpstreamError::Malformed("parse response failed"))?;
    match resp.code {
        Some(200) => Ok(buf.split_off(head_end)),
        Some(code) => Err(UpstreamError::Rejected(code)),
        None => Err(UpstreamError::Malformed("missing status code")),
    }
}

/// Request head sent on behalf of the client: origin-form when talking to the
/// destination, absolute-form when talking to an upstream proxy.
pub fn forward_head(req: &RequestHead, absolute_form: bool) -> Vec<u8> {
    let host = req.target.authority_host();
    let host_header = match req.target.port() {
        80 => host,
        port => format!("{}:{}", host, port),
    };
    let request_target = if absolute_form {
        format!("http://{}{}", host_header, req.path)
    } else {
        req.path.clone()
    };

    // names listed in Connection are hop-by-hop too
    let listed: Vec<String> = req
        .headers
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("connection"))
        .flat_map(|(_, value)| {
            String::from_utf8_lossy(value)
                .split(',')
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
        })
        .collect();

    let mut out = Vec::with_capacity(512);
    out.extend_from_slice(
        format!("{} {} HTTP/1.{}\r\n", req.method, request_target, req.version).as_bytes(),
    );
    out.extend_from_slice(format!("Host: {}\r\n", host_header).as_bytes());
    for (name, value) in &req.headers {
        let lower = name.to_ascii_lowercase();
        if HOP_BY_HOP.contains(&lower.as_str()) || listed.contains(&lower) {
            continue;
        }
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"Connection: close\r\n\r\n");
    out
}
