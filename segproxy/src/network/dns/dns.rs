use crate::common::host_matcher::normalize_host;
use crate::config::{DnsSettings, DnsTransportKind};
use crate::network::dns::{DnsCache, DnsTransport, PlainDnsResolver};
use crate::proxy::error::ResolutionError;
use std::fmt::{Display, Formatter};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Fixed reuse window for answers from the system resolver, which exposes no TTL.
pub const FIXED_SYSTEM_TTL: Duration = Duration::from_secs(60);
const SYSTEM_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsTrace {
    pub custom: bool,
    pub cache_hit: bool,
    pub transport: DnsTransportKind,
    pub fallback: bool,
}

impl Display for DnsTrace {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "dns={} cache={} transport={} fallback={}",
            if self.custom { "custom" } else { "system" },
            if self.cache_hit { "hit" } else { "miss" },
            match self.transport {
                DnsTransportKind::Udp => "udp",
                DnsTransportKind::Tcp => "tcp",
            },
            self.fallback as u8
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub addrs: Vec<IpAddr>,
    /// `None` for IP literals, which never touch DNS.
    pub trace: Option<DnsTrace>,
}

pub enum DnsBackend {
    System,
    Custom(PlainDnsResolver),
}

pub struct Dns {
    cache: Arc<DnsCache>,
    backend: DnsBackend,
}

impl Dns {
    pub fn new(cache: Arc<DnsCache>, backend: DnsBackend) -> Self {
        Self { cache, backend }
    }

    pub fn with_settings(
        settings: &DnsSettings,
        cache: Arc<DnsCache>,
        transport: Arc<dyn DnsTransport>,
    ) -> Self {
        let backend = match settings.server {
            Some(server) => {
                tracing::debug!(
                    "DNS resolver=plain server={} transport={:?}",
                    server,
                    settings.transport
                );
                DnsBackend::Custom(PlainDnsResolver::new(
                    server,
                    settings.transport,
                    settings.timeout,
                    transport,
                ))
            }
            None => {
                tracing::debug!("DNS resolver=system");
                DnsBackend::System
            }
        };
        Self::new(cache, backend)
    }

    fn base_trace(&self) -> DnsTrace {
        match &self.backend {
            DnsBackend::System => DnsTrace {
                custom: false,
                cache_hit: false,
                transport: DnsTransportKind::Udp,
                fallback: false,
            },
            DnsBackend::Custom(r) => DnsTrace {
                custom: true,
                cache_hit: false,
                transport: r.transport(),
                fallback: false,
            },
        }
    }

    pub async fn resolve(&self, host: &str) -> Result<Resolved, ResolutionError> {
        let host = normalize_host(host.trim_start_matches('[').trim_end_matches(']'));
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(Resolved {
                addrs: vec![ip],
                trace: None,
            });
        }
        if let Some(addrs) = self.cache.get(&host) {
            tracing::debug!("DNS cache hit host={}", host);
            return Ok(Resolved {
                addrs,
                trace: Some(DnsTrace {
                    cache_hit: true,
                    ..self.base_trace()
                }),
            });
        }
        let mut trace = self.base_trace();
        let (addrs, ttl) = match &self.backend {
            DnsBackend::System => (system_lookup(&host).await?, FIXED_SYSTEM_TTL),
            DnsBackend::Custom(r) => {
                let answer = r.resolve(&host).await?;
                trace.transport = answer.transport;
                trace.fallback = answer.fallback;
                (answer.addrs, answer.ttl)
            }
        };
        tracing::debug!("DNS resolved host={} addrs={}", host, addrs.len());
        self.cache.insert(&host, addrs.clone(), ttl);
        Ok(Resolved {
            addrs,
            trace: Some(trace),
        })
    }
}

async fn system_lookup(host: &str) -> Result<Vec<IpAddr>, ResolutionError> {
    let lookup = tokio::net::lookup_host((host, 0));
    let iter = match tokio::time::timeout(SYSTEM_TIMEOUT, lookup).await {
        Ok(r) => r.map_err(ResolutionError::System)?,
        Err(_) => return Err(ResolutionError::Timeout("system resolver".to_string())),
    };
    let mut addrs = Vec::new();
    for sa in iter {
        if !addrs.contains(&sa.ip()) {
            addrs.push(sa.ip());
        }
    }
    if addrs.is_empty() {
        return Err(ResolutionError::NoAnswers(host.to_string()));
    }
    Ok(addrs)
}
