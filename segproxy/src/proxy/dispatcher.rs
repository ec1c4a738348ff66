use crate::common::id_gen::IdGenerator;
use crate::dispatch::{DecisionEngine, HostPolicy};
use crate::network::dns::Dns;
use crate::network::egress::{Connector, Egress};
use crate::proxy::Session;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// State shared by every session: how to decide, resolve and connect.
pub struct Dispatcher<C = Egress> {
    pub(super) engine: DecisionEngine,
    pub(super) policy: HostPolicy,
    pub(super) dns: Arc<Dns>,
    pub(super) connector: C,
    pub(super) connect_timeout: Duration,
    pub(super) idle_timeout: Duration,
    pub(super) access_log: bool,
    conn_ids: IdGenerator,
}

impl<C: Connector> Dispatcher<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: DecisionEngine,
        policy: HostPolicy,
        dns: Arc<Dns>,
        connector: C,
        connect_timeout: Duration,
        idle_timeout: Duration,
        access_log: bool,
    ) -> Self {
        Self {
            engine,
            policy,
            dns,
            connector,
            connect_timeout,
            idle_timeout,
            access_log,
            conn_ids: IdGenerator::default(),
        }
    }

    /// Runs one client connection to completion.
    pub async fn submit_tcp<S>(&self, client: S, src: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let conn_id = self.conn_ids.get();
        Session::new(self, client, src, conn_id).run().await;
    }
}
