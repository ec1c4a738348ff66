use crate::adapter::{forward_head, relay, upstream_connect, SegmentPlan};
use crate::common::id_gen::request_id;
use crate::dispatch::{Decision, Route, Segmentation};
use crate::network::dns::DnsTrace;
use crate::network::egress::Connector;
use crate::proxy::error::{OutboundError, RelayError, RequestError};
use crate::proxy::response::{Response, CONNECTION_ESTABLISHED};
use crate::proxy::{read_request_head, Dispatcher, RequestHead};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

/// Client bytes buffered while resolving and connecting.
const MAX_PENDING: usize = 64 * 1024;

/// Where a session is. Every connection walks
/// `ParseRequest -> Decide -> Resolve -> Connect -> Relay | Respond -> Closed`,
/// possibly jumping to `Respond` or `Closed` early.
enum Stage<T> {
    ParseRequest,
    Decide {
        req: RequestHead,
        pending: Vec<u8>,
    },
    Resolve {
        routed: Routed,
        pending: Vec<u8>,
    },
    Connect {
        routed: Routed,
        addrs: Vec<SocketAddr>,
        pending: Vec<u8>,
    },
    Relay {
        upstream: T,
        prefix: Vec<u8>,
        segmentation: Segmentation,
    },
    Respond(Response),
    Closed,
}

struct Routed {
    req: RequestHead,
    decision: Decision,
}

/// One `ACCESS` line, filled in as the session advances.
#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub rid: String,
    pub client: SocketAddr,
    pub method: String,
    pub target: String,
    pub action: &'static str,
    pub rule: String,
    pub score: Option<i64>,
    pub status: Option<u16>,
    pub outcome: &'static str,
    pub up: u64,
    pub down: u64,
    pub dns: Option<DnsTrace>,
    pub started: Instant,
}

impl AccessRecord {
    fn new(client: SocketAddr) -> Self {
        Self {
            rid: request_id(),
            client,
            method: "-".to_string(),
            target: "-".to_string(),
            action: "-",
            rule: "-".to_string(),
            score: None,
            status: None,
            outcome: "ok",
            up: 0,
            down: 0,
            dns: None,
            started: Instant::now(),
        }
    }
}

impl Display for AccessRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ACCESS rid={} client={} method={} target={} action={} rule={} score=",
            self.rid, self.client, self.method, self.target, self.action, self.rule
        )?;
        match self.score {
            Some(score) => write!(f, "{}", score)?,
            None => f.write_str("-")?,
        }
        f.write_str(" status=")?;
        match self.status {
            Some(status) => write!(f, "{}", status)?,
            None => f.write_str("-")?,
        }
        write!(
            f,
            " outcome={} up={} down={} ",
            self.outcome, self.up, self.down
        )?;
        match &self.dns {
            Some(trace) => write!(f, "{}", trace)?,
            None => f.write_str("dns=-")?,
        }
        write!(f, " dur_ms={}", self.started.elapsed().as_millis())
    }
}

pub struct Session<'a, C: Connector, S> {
    dispatcher: &'a Dispatcher<C>,
    client: S,
    conn_id: u64,
    record: AccessRecord,
    /// Nothing worth an access line happened (client left before a request).
    silent: bool,
    /// The client half-closed after its request; nothing more will come from it.
    client_eof: bool,
}

impl<'a, C, S> Session<'a, C, S>
where
    C: Connector,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(dispatcher: &'a Dispatcher<C>, client: S, src: SocketAddr, conn_id: u64) -> Self {
        Self {
            dispatcher,
            client,
            conn_id,
            record: AccessRecord::new(src),
            silent: false,
            client_eof: false,
        }
    }

    pub async fn run(mut self) {
        let mut stage = Stage::ParseRequest;
        loop {
            stage = match stage {
                Stage::ParseRequest => self.parse_request().await,
                Stage::Decide { req, pending } => self.decide(req, pending),
                Stage::Resolve { routed, pending } => self.resolve(routed, pending).await,
                Stage::Connect {
                    routed,
                    addrs,
                    pending,
                } => self.connect(routed, addrs, pending).await,
                Stage::Relay {
                    upstream,
                    prefix,
                    segmentation,
                } => self.forward(upstream, prefix, &segmentation).await,
                Stage::Respond(resp) => self.respond(resp).await,
                Stage::Closed => break,
            }
        }
        self.finish();
    }

    async fn parse_request(&mut self) -> Stage<C::Stream> {
        match read_request_head(&mut self.client, self.dispatcher.idle_timeout).await {
            Ok((req, pending)) => {
                tracing::info!(
                    "[C{:05}] rid={} {} {} from {}",
                    self.conn_id,
                    self.record.rid,
                    req.method,
                    req.target,
                    self.record.client
                );
                self.record.method = req.method.clone();
                self.record.target = req.target.to_string();
                Stage::Decide { req, pending }
            }
            Err(e @ (RequestError::Invalid(_) | RequestError::TooLarge)) => {
                tracing::info!("[C{:05}] Bad request: {}", self.conn_id, e);
                self.record.outcome = "bad_request";
                Stage::Respond(Response::BadRequest(e.to_string()))
            }
            Err(e) => {
                tracing::debug!("[C{:05}] No request: {}", self.conn_id, e);
                self.silent = true;
                Stage::Closed
            }
        }
    }

    fn decide(&mut self, req: RequestHead, pending: Vec<u8>) -> Stage<C::Stream> {
        if let Err(denied) = self.dispatcher.policy.check_host(&req.target.host()) {
            tracing::info!("[C{:05}] {} denied: {}", self.conn_id, req.target, denied);
            self.record.action = "deny";
            self.record.outcome = "denied";
            return Stage::Respond(Response::Forbidden(denied.to_string()));
        }
        let decision = self.dispatcher.engine.decide(&req.context());
        tracing::debug!("[C{:05}] {} {}", self.conn_id, req.target, decision.explain);
        self.record.action = decision.route.action();
        self.record.rule = decision.rule_label();
        self.record.score = Some(decision.score);
        if let Route::Block { reason } = &decision.route {
            let msg = match reason {
                Some(reason) => format!("Blocked by rule: {}", reason),
                None => "Blocked by rule".to_string(),
            };
            tracing::info!("[C{:05}] {} blocked by {}", self.conn_id, req.target, self.record.rule);
            self.record.outcome = "blocked";
            return Stage::Respond(Response::Forbidden(msg));
        }
        Stage::Resolve {
            routed: Routed { req, decision },
            pending,
        }
    }

    async fn resolve(&mut self, routed: Routed, mut pending: Vec<u8>) -> Stage<C::Stream> {
        let dispatcher = self.dispatcher;
        // the name to look up is the next hop, not necessarily the destination
        let (hop, direct) = match &routed.decision.route {
            Route::Direct { target } => (target.clone(), true),
            Route::Upstream { proxy, .. } => (proxy.clone(), false),
            Route::Block { .. } => {
                return Stage::Respond(Response::Forbidden("Blocked by rule".to_string()))
            }
        };
        let host = hop.host();
        let lookup = dispatcher.dns.resolve(&host);
        let watched = watch_client(&mut self.client, &mut pending, &mut self.client_eof, lookup);
        let resolved = match watched.await {
            Some(r) => r,
            None => return self.client_gone("resolve"),
        };
        let resolved = match resolved {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("[C{:05}] Resolve {} failed: {}", self.conn_id, host, e);
                self.record.outcome = "dns_error";
                return Stage::Respond(Response::BadGateway(format!(
                    "DNS resolution failed for {}",
                    host
                )));
            }
        };
        self.record.dns = resolved.trace;
        if direct {
            if let Err(denied) = dispatcher.policy.check_addresses(&resolved.addrs) {
                tracing::info!("[C{:05}] {} denied: {}", self.conn_id, host, denied);
                self.record.outcome = "denied";
                return Stage::Respond(Response::Forbidden(denied.to_string()));
            }
        }
        let addrs = resolved
            .addrs
            .into_iter()
            .map(|ip| SocketAddr::new(ip, hop.port()))
            .collect();
        Stage::Connect {
            routed,
            addrs,
            pending,
        }
    }

    async fn connect(
        &mut self,
        routed: Routed,
        addrs: Vec<SocketAddr>,
        mut pending: Vec<u8>,
    ) -> Stage<C::Stream> {
        let dispatcher = self.dispatcher;
        let tunnel_via = match &routed.decision.route {
            Route::Upstream { target, .. } if routed.req.is_connect() => Some(target),
            _ => None,
        };
        let open = async {
            let mut stream = dispatcher
                .connector
                .connect(&addrs, dispatcher.connect_timeout)
                .await?;
            let leftover = match tunnel_via {
                Some(target) => {
                    upstream_connect(&mut stream, target, dispatcher.connect_timeout).await?
                }
                None => vec![],
            };
            Ok::<_, OutboundError>((stream, leftover))
        };
        let watched = watch_client(&mut self.client, &mut pending, &mut self.client_eof, open);
        let opened = match watched.await {
            Some(r) => r,
            None => return self.client_gone("connect"),
        };
        let (upstream, leftover) = match opened {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(
                    "[C{:05}] Connect to {} failed: {}",
                    self.conn_id,
                    routed.req.target,
                    e
                );
                let msg = match e {
                    OutboundError::Connect(_) => "Upstream connection failed",
                    OutboundError::Upstream(_) => "Upstream proxy CONNECT failed",
                };
                self.record.outcome = "connect_error";
                return Stage::Respond(Response::BadGateway(msg.to_string()));
            }
        };

        let prefix = if routed.req.is_connect() {
            let mut established = CONNECTION_ESTABLISHED.to_vec();
            established.extend_from_slice(&leftover);
            if let Err(e) = write_and_flush(&mut self.client, &established).await {
                tracing::debug!("[C{:05}] Client write failed: {}", self.conn_id, e);
                self.record.outcome = "client_closed";
                return Stage::Closed;
            }
            self.record.status = Some(200);
            pending
        } else {
            let absolute = matches!(routed.decision.route, Route::Upstream { .. });
            let mut prefix = forward_head(&routed.req, absolute);
            prefix.extend_from_slice(&pending);
            prefix
        };
        Stage::Relay {
            upstream,
            prefix,
            segmentation: routed.decision.segmentation,
        }
    }

    async fn forward(
        &mut self,
        upstream: C::Stream,
        prefix: Vec<u8>,
        segmentation: &Segmentation,
    ) -> Stage<C::Stream> {
        let plan = SegmentPlan::new(segmentation);
        let stats = relay(
            &mut self.client,
            upstream,
            prefix,
            plan,
            self.dispatcher.idle_timeout,
            self.client_eof,
        )
        .await;
        self.record.up = stats.up;
        self.record.down = stats.down;
        match stats.result {
            Ok(()) => {}
            Err(RelayError::IdleTimeout) => self.record.outcome = "idle_timeout",
            Err(e) => {
                tracing::debug!("[C{:05}] Relay ended: {}", self.conn_id, e);
                self.record.outcome = "relay_error";
            }
        }
        tracing::debug!(
            "[C{:05}] Closed, up={} down={}",
            self.conn_id,
            stats.up,
            stats.down
        );
        Stage::Closed
    }

    async fn respond(&mut self, resp: Response) -> Stage<C::Stream> {
        self.record.status = Some(resp.status());
        if let Err(e) = write_and_flush(&mut self.client, &resp.to_bytes()).await {
            tracing::debug!("[C{:05}] Client write failed: {}", self.conn_id, e);
        }
        let _ = self.client.shutdown().await;
        Stage::Closed
    }

    fn client_gone(&mut self, during: &str) -> Stage<C::Stream> {
        tracing::debug!("[C{:05}] Client left during {}", self.conn_id, during);
        self.record.outcome = "client_closed";
        Stage::Closed
    }

    fn finish(&self) {
        if self.dispatcher.access_log && !self.silent {
            tracing::info!(target: "segproxy::access", "{}", self.record);
        }
    }
}

async fn write_and_flush<S>(client: &mut S, data: &[u8]) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    client.write_all(data).await?;
    client.flush().await
}

/// Drives `fut` while still reading the client, so a client that fails
/// cancels it. Bytes read meanwhile are kept in `pending`. A half-close only
/// sets `eof` and stops the reading. `None` if reading the client failed first.
async fn watch_client<S, F>(
    client: &mut S,
    pending: &mut Vec<u8>,
    eof: &mut bool,
    fut: F,
) -> Option<F::Output>
where
    S: AsyncRead + Unpin,
    F: Future,
{
    tokio::pin!(fut);
    let mut buf = [0u8; 4096];
    loop {
        if *eof || pending.len() >= MAX_PENDING {
            return Some(fut.await);
        }
        let room = (MAX_PENDING - pending.len()).min(buf.len());
        tokio::select! {
            out = &mut fut => return Some(out),
            r = client.read(&mut buf[..room]) => match r {
                Ok(0) => *eof = true,
                Ok(n) => pending.extend_from_slice(&buf[..n]),
                Err(_) => return None,
            }
        }
    }
}
