use crate::config::DnsTransportKind;
use crate::proxy::error::ResolutionError;
use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

/// Raw message exchange with a DNS server; one call per query.
#[async_trait]
pub trait DnsTransport: Send + Sync {
    async fn exchange_udp(&self, server: SocketAddr, query: &[u8]) -> io::Result<Vec<u8>>;
    async fn exchange_tcp(&self, server: SocketAddr, query: &[u8]) -> io::Result<Vec<u8>>;
}

pub struct TokioDnsTransport;

#[async_trait]
impl DnsTransport for TokioDnsTransport {
    async fn exchange_udp(&self, server: SocketAddr, query: &[u8]) -> io::Result<Vec<u8>> {
        let local: SocketAddr = match server {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;
        socket.send(query).await?;
        let mut buf = vec![0u8; 4096];
        let n = socket.recv(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }

    async fn exchange_tcp(&self, server: SocketAddr, query: &[u8]) -> io::Result<Vec<u8>> {
        let mut stream = TcpStream::connect(server).await?;
        let len = u16::try_from(query.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "DNS query too long"))?;
        let mut payload = Vec::with_capacity(query.len() + 2);
        payload.extend_from_slice(&len.to_be_bytes());
        payload.extend_from_slice(query);
        stream.write_all(&payload).await?;
        let len = stream.read_u16().await? as usize;
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainAnswer {
    pub addrs: Vec<IpAddr>,
    pub ttl: Duration,
    /// TCP if any query ended up on TCP.
    pub transport: DnsTransportKind,
    pub fallback: bool,
}

struct TypeAnswer {
    addrs: Vec<IpAddr>,
    min_ttl: Option<u32>,
    truncated: bool,
}

/// Queries one configured server directly, A then AAAA.
pub struct PlainDnsResolver {
    server: SocketAddr,
    transport: DnsTransportKind,
    timeout: Duration,
    io: Arc<dyn DnsTransport>,
}

impl PlainDnsResolver {
    pub fn new(
        server: SocketAddr,
        transport: DnsTransportKind,
        timeout: Duration,
        io: Arc<dyn DnsTransport>,
    ) -> Self {
        Self {
            server,
            transport,
            timeout,
            io,
        }
    }

    pub fn transport(&self) -> DnsTransportKind {
        self.transport
    }

    pub async fn resolve(&self, host: &str) -> Result<PlainAnswer, ResolutionError> {
        let name =
            Name::from_ascii(host).map_err(|_| ResolutionError::InvalidName(host.to_string()))?;
        let mut addrs = Vec::new();
        let mut min_ttl: Option<u32> = None;
        let mut transport = self.transport;
        let mut fallback = false;
        let mut first_err = None;
        for rtype in [RecordType::A, RecordType::AAAA] {
            let (answer, used, retried) = match self.query_type(host, &name, rtype).await {
                Ok(r) => r,
                Err(e @ ResolutionError::NxDomain(_)) => return Err(e),
                // some servers fail AAAA for v4-only hosts; keep the other family
                Err(e) => {
                    tracing::debug!("DNS query {} {} gave no answers: {}", host, rtype, e);
                    first_err.get_or_insert(e);
                    continue;
                }
            };
            for addr in answer.addrs {
                if !addrs.contains(&addr) {
                    addrs.push(addr);
                }
            }
            if let Some(ttl) = answer.min_ttl {
                min_ttl = Some(min_ttl.map_or(ttl, |m| m.min(ttl)));
            }
            if used == DnsTransportKind::Tcp {
                transport = DnsTransportKind::Tcp;
            }
            fallback |= retried;
        }
        if addrs.is_empty() {
            let err = first_err.unwrap_or_else(|| ResolutionError::NoAnswers(host.to_string()));
            return Err(err);
        }
        Ok(PlainAnswer {
            addrs,
            ttl: Duration::from_secs(min_ttl.unwrap_or(0) as u64),
            transport,
            fallback,
        })
    }

    async fn query_type(
        &self,
        host: &str,
        name: &Name,
        rtype: RecordType,
    ) -> Result<(TypeAnswer, DnsTransportKind, bool), ResolutionError> {
        let txid: u16 = rand::random();
        let query = build_query(name, rtype, txid)?;
        if self.transport == DnsTransportKind::Tcp {
            let data = self.exchange(DnsTransportKind::Tcp, &query).await?;
            let answer = parse_response(host, &data, txid, rtype)?;
            return Ok((answer, DnsTransportKind::Tcp, false));
        }
        let udp = match self.exchange(DnsTransportKind::Udp, &query).await {
            Ok(data) => parse_response(host, &data, txid, rtype),
            Err(e) => Err(e),
        };
        let err = match udp {
            Ok(answer) if !answer.truncated => {
                return Ok((answer, DnsTransportKind::Udp, false));
            }
            // a definitive negative answer is not retried
            Err(e @ (ResolutionError::NxDomain(_) | ResolutionError::ServerFailure(_))) => {
                return Err(e)
            }
            Ok(_) => "truncated".to_string(),
            Err(e) => e.to_string(),
        };
        tracing::debug!(
            "UDP DNS query {} {} failed ({}), retrying over TCP",
            host,
            rtype,
            err
        );
        let data = self.exchange(DnsTransportKind::Tcp, &query).await?;
        let answer = parse_response(host, &data, txid, rtype)?;
        Ok((answer, DnsTransportKind::Tcp, true))
    }

    async fn exchange(
        &self,
        transport: DnsTransportKind,
        query: &[u8],
    ) -> Result<Vec<u8>, ResolutionError> {
        let fut = async {
            match transport {
                DnsTransportKind::Udp => self.io.exchange_udp(self.server, query).await,
                DnsTransportKind::Tcp => self.io.exchange_tcp(self.server, query).await,
            }
        };
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(e)) => Err(ResolutionError::Unreachable(self.server.to_string(), e)),
            Err(_) => Err(ResolutionError::Timeout(self.server.to_string())),
        }
    }
}

fn build_query(name: &Name, rtype: RecordType, txid: u16) -> Result<Vec<u8>, ResolutionError> {
    let mut msg = Message::new();
    msg.set_id(txid)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(name.clone(), rtype));
    msg.to_vec()
        .map_err(|e| ResolutionError::Malformed(e.to_string()))
}

fn parse_response(
    host: &str,
    data: &[u8],
    txid: u16,
    rtype: RecordType,
) -> Result<TypeAnswer, ResolutionError> {
    let msg = Message::from_vec(data).map_err(|e| ResolutionError::Malformed(e.to_string()))?;
    if msg.id() != txid {
        return Err(ResolutionError::Malformed(
            "transaction id mismatch".to_string(),
        ));
    }
    if msg.message_type() != MessageType::Response {
        return Err(ResolutionError::Malformed("not a response".to_string()));
    }
    if msg.truncated() {
        return Ok(TypeAnswer {
            addrs: vec![],
            min_ttl: None,
            truncated: true,
        });
    }
    match msg.response_code() {
        ResponseCode::NoError => {}
        ResponseCode::NXDomain => return Err(ResolutionError::NxDomain(host.to_string())),
        code => return Err(ResolutionError::ServerFailure(format!("{:?}", code))),
    }
    let mut addrs = Vec::new();
    let mut min_ttl: Option<u32> = None;
    for record in msg.answers() {
        if record.record_type() != rtype || record.dns_class() != DNSClass::IN {
            continue;
        }
        let addr = match record.data() {
            Some(RData::A(a)) => IpAddr::V4(a.0),
            Some(RData::AAAA(a)) => IpAddr::V6(a.0),
            _ => continue,
        };
        addrs.push(addr);
        min_ttl = Some(min_ttl.map_or(record.ttl(), |m| m.min(record.ttl())));
    }
    Ok(TypeAnswer {
        addrs,
        min_ttl,
        truncated: false,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use hickory_proto::rr::rdata::{A, AAAA};
    use hickory_proto::rr::Record;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum Behavior {
        Answer,
        Truncated,
        Hang,
        WrongId,
        NxDomain,
        ServFail,
        Refused,
    }

    /// Answers every A/AAAA query from fixed record lists.
    pub(crate) struct FakeTransport {
        pub udp: Behavior,
        pub tcp: Behavior,
        pub v4: Vec<Ipv4Addr>,
        pub v6: Vec<Ipv6Addr>,
        pub ttl: u32,
        /// Overrides both transports for AAAA queries.
        pub aaaa: Option<Behavior>,
        pub udp_calls: AtomicUsize,
        pub tcp_calls: AtomicUsize,
        pub servers: Mutex<Vec<SocketAddr>>,
    }

    impl FakeTransport {
        pub fn new(udp: Behavior, tcp: Behavior) -> Self {
            Self {
                udp,
                tcp,
                v4: vec![Ipv4Addr::new(93, 184, 216, 34)],
                v6: vec![],
                ttl: 300,
                aaaa: None,
                udp_calls: AtomicUsize::new(0),
                tcp_calls: AtomicUsize::new(0),
                servers: Mutex::new(vec![]),
            }
        }

        pub fn calls(&self) -> (usize, usize) {
            (
                self.udp_calls.load(Ordering::SeqCst),
                self.tcp_calls.load(Ordering::SeqCst),
            )
        }

        async fn respond(&self, behavior: Behavior, query: &[u8]) -> io::Result<Vec<u8>> {
            let req = Message::from_vec(query).unwrap();
            let q = req.queries()[0].clone();
            let behavior = match (q.query_type(), self.aaaa) {
                (RecordType::AAAA, Some(b)) => b,
                _ => behavior,
            };
            let mut resp = Message::new();
            resp.set_id(req.id())
                .set_message_type(MessageType::Response)
                .set_op_code(OpCode::Query)
                .set_recursion_desired(true)
                .set_recursion_available(true)
                .add_query(q.clone());
            match behavior {
                Behavior::Hang => std::future::pending::<()>().await,
                Behavior::Refused => {
                    return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
                }
                Behavior::WrongId => {
                    resp.set_id(req.id().wrapping_add(1));
                }
                Behavior::Truncated => {
                    resp.set_truncated(true);
                }
                Behavior::NxDomain => {
                    resp.set_response_code(ResponseCode::NXDomain);
                }
                Behavior::ServFail => {
                    resp.set_response_code(ResponseCode::ServFail);
                }
                Behavior::Answer => {
                    let records: Vec<Record> = match q.query_type() {
                        RecordType::A => self
                            .v4
                            .iter()
                            .map(|ip| {
                                Record::from_rdata(q.name().clone(), self.ttl, RData::A(A(*ip)))
                            })
                            .collect(),
                        RecordType::AAAA => self
                            .v6
                            .iter()
                            .map(|ip| {
                                let rdata = RData::AAAA(AAAA(*ip));
                                Record::from_rdata(q.name().clone(), self.ttl, rdata)
                            })
                            .collect(),
                        _ => vec![],
                    };
                    resp.add_answers(records);
                }
            }
            Ok(resp.to_vec().unwrap())
        }
    }

    #[async_trait]
    impl DnsTransport for FakeTransport {
        async fn exchange_udp(&self, server: SocketAddr, query: &[u8]) -> io::Result<Vec<u8>> {
            self.udp_calls.fetch_add(1, Ordering::SeqCst);
            self.servers.lock().unwrap().push(server);
            self.respond(self.udp, query).await
        }

        async fn exchange_tcp(&self, server: SocketAddr, query: &[u8]) -> io::Result<Vec<u8>> {
            self.tcp_calls.fetch_add(1, Ordering::SeqCst);
            self.servers.lock().unwrap().push(server);
            self.respond(self.tcp, query).await
        }
    }

    fn resolver(fake: Arc<FakeTransport>, transport: DnsTransportKind) -> PlainDnsResolver {
        PlainDnsResolver::new(
            "10.0.0.53:5353".parse().unwrap(),
            transport,
            Duration::from_secs(2),
            fake,
        )
    }

    #[tokio::test]
    async fn test_udp_success() {
        let fake = Arc::new(FakeTransport {
            v6: vec!["2606:2800::1".parse().unwrap()],
            ..FakeTransport::new(Behavior::Answer, Behavior::Answer)
        });
        let answer = resolver(fake.clone(), DnsTransportKind::Udp)
            .resolve("example.com")
            .await
            .unwrap();
        assert_eq!(
            answer.addrs,
            vec![
                "93.184.216.34".parse::<IpAddr>().unwrap(),
                "2606:2800::1".parse().unwrap()
            ]
        );
        assert_eq!(answer.ttl, Duration::from_secs(300));
        assert_eq!(answer.transport, DnsTransportKind::Udp);
        assert!(!answer.fallback);
        assert_eq!(fake.calls(), (2, 0));
        assert!(fake
            .servers
            .lock()
            .unwrap()
            .iter()
            .all(|s| s.port() == 5353));
    }

    #[tokio::test]
    async fn test_truncated_falls_back_once() {
        let fake = Arc::new(FakeTransport::new(Behavior::Truncated, Behavior::Answer));
        let answer = resolver(fake.clone(), DnsTransportKind::Udp)
            .resolve("example.com")
            .await
            .unwrap();
        assert_eq!(answer.transport, DnsTransportKind::Tcp);
        assert!(answer.fallback);
        // one UDP try and one TCP retry per record type
        assert_eq!(fake.calls(), (2, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back_once() {
        let fake = Arc::new(FakeTransport::new(Behavior::Hang, Behavior::Answer));
        let answer = resolver(fake.clone(), DnsTransportKind::Udp)
            .resolve("example.com")
            .await
            .unwrap();
        assert!(answer.fallback);
        assert_eq!(fake.calls(), (2, 2));

        let fake = Arc::new(FakeTransport::new(Behavior::Hang, Behavior::Hang));
        let err = resolver(fake.clone(), DnsTransportKind::Udp)
            .resolve("example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Timeout(_)));
        // each record type still gets its single retry
        assert_eq!(fake.calls(), (2, 2));
    }

    #[tokio::test]
    async fn test_wrong_id_falls_back() {
        let fake = Arc::new(FakeTransport::new(Behavior::WrongId, Behavior::Answer));
        assert!(resolver(fake.clone(), DnsTransportKind::Udp)
            .resolve("example.com")
            .await
            .is_ok());
        assert_eq!(fake.calls(), (2, 2));

        let fake = Arc::new(FakeTransport::new(Behavior::Refused, Behavior::WrongId));
        let err = resolver(fake.clone(), DnsTransportKind::Udp)
            .resolve("example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_tcp_only() {
        let fake = Arc::new(FakeTransport::new(Behavior::Answer, Behavior::Answer));
        let answer = resolver(fake.clone(), DnsTransportKind::Tcp)
            .resolve("example.com")
            .await
            .unwrap();
        assert_eq!(answer.transport, DnsTransportKind::Tcp);
        assert!(!answer.fallback);
        assert_eq!(fake.calls(), (0, 2));

        let fake = Arc::new(FakeTransport::new(Behavior::Answer, Behavior::Refused));
        let err = resolver(fake.clone(), DnsTransportKind::Tcp)
            .resolve("example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Unreachable(..)));
        assert_eq!(fake.calls(), (0, 2));
    }

    #[tokio::test]
    async fn test_aaaa_failure_keeps_v4() {
        let fake = Arc::new(FakeTransport {
            aaaa: Some(Behavior::ServFail),
            ..FakeTransport::new(Behavior::Answer, Behavior::Answer)
        });
        let answer = resolver(fake.clone(), DnsTransportKind::Udp)
            .resolve("v4only.example")
            .await
            .unwrap();
        assert_eq!(answer.addrs, vec![IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))]);
        assert_eq!(answer.ttl, Duration::from_secs(300));
        assert!(!answer.fallback);
        assert_eq!(fake.calls(), (2, 0));

        let fake = Arc::new(FakeTransport {
            aaaa: Some(Behavior::Refused),
            ..FakeTransport::new(Behavior::Answer, Behavior::Answer)
        });
        let answer = resolver(fake.clone(), DnsTransportKind::Udp)
            .resolve("v4only.example")
            .await
            .unwrap();
        assert_eq!(answer.addrs.len(), 1);
        // the refused AAAA over UDP is retried once over TCP
        assert_eq!(answer.transport, DnsTransportKind::Udp);
        assert_eq!(fake.calls(), (2, 1));

        let fake = Arc::new(FakeTransport {
            v4: vec![],
            aaaa: Some(Behavior::ServFail),
            ..FakeTransport::new(Behavior::Answer, Behavior::Answer)
        });
        let err = resolver(fake, DnsTransportKind::Udp)
            .resolve("nothing.example")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::ServerFailure(_)));
    }

    #[tokio::test]
    async fn test_negative_answers() {
        let fake = Arc::new(FakeTransport::new(Behavior::NxDomain, Behavior::Answer));
        let err = resolver(fake.clone(), DnsTransportKind::Udp)
            .resolve("missing.example")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::NxDomain(_)));
        assert_eq!(fake.calls(), (1, 0));

        let fake = Arc::new(FakeTransport {
            v4: vec![],
            ..FakeTransport::new(Behavior::Answer, Behavior::Answer)
        });
        let err = resolver(fake, DnsTransportKind::Udp)
            .resolve("empty.example")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::NoAnswers(_)));
    }
}
