mod cache;
#[allow(clippy::module_inception)]
mod dns;
pub(crate) mod plain;

pub use cache::DnsCache;
pub use dns::{Dns, DnsBackend, DnsTrace, Resolved, FIXED_SYSTEM_TTL};
pub use plain::{DnsTransport, PlainAnswer, PlainDnsResolver, TokioDnsTransport};
