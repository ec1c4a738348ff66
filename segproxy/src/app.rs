use crate::config::{load_dispatching, ProxySettings};
use crate::dispatch::{DecisionEngine, HostPolicy};
use crate::external;
use crate::network::dns::{Dns, DnsCache, TokioDnsTransport};
use crate::network::egress::Egress;
use crate::proxy::{Dispatcher, HttpInbound};
use anyhow::anyhow;
use std::sync::Arc;
use tokio::select;

pub struct App {
    inbound: HttpInbound<Egress>,
}

impl App {
    /// Create a running App instance.
    pub async fn create(settings: ProxySettings) -> anyhow::Result<Self> {
        // tracing
        external::init_tracing(&settings.log_level)?;

        let dispatching = Arc::new(load_dispatching(&settings)?);
        tracing::info!(
            "Loaded {} segment rules, default {}",
            dispatching.rules().len(),
            dispatching.default_segmentation()
        );

        // the only cache of the process, shared by every session through Dns
        let dns_cache = Arc::new(DnsCache::new(settings.dns.cache_size));
        let dns = Arc::new(Dns::with_settings(
            &settings.dns,
            dns_cache,
            Arc::new(TokioDnsTransport),
        ));
        let policy = HostPolicy::new(
            settings.allow_domains.clone(),
            settings.deny_domains.clone(),
            settings.deny_private,
        );
        let dispatcher = Arc::new(Dispatcher::new(
            DecisionEngine::new(dispatching),
            policy,
            dns,
            Egress,
            settings.connect_timeout,
            settings.idle_timeout,
            settings.access_log,
        ));

        let inbound = HttpInbound::new(
            &settings.listen_host,
            settings.listen_port,
            settings.max_connections,
            dispatcher,
        )
        .await
        .map_err(|e| {
            anyhow!(
                "Listen on {}:{} failed: {}",
                settings.listen_host,
                settings.listen_port,
                e
            )
        })?;
        tracing::info!(
            "Proxy listening on {} (max {} connections)",
            inbound.local_addr()?,
            settings.max_connections
        );
        Ok(Self { inbound })
    }

    pub async fn serve_command(self) {
        select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = self.inbound.run() => {}
        }
    }
}
