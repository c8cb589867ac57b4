//! # DNS lookups
//!
//! `DnsLookup` implementations used for DNS blacklist queries.
//!
//! - [`SystemLookup`] goes through the platform resolver (`getaddrinfo`).
//! - [`HickoryLookup`] (feature `spam-dnsbl`) talks DNS directly and can
//!   tell a missing record apart from a failed query.

use std::net::IpAddr;

use async_trait::async_trait;
use tracing::debug;

use domains::DnsLookup;

/// Resolver backed by `tokio::net::lookup_host`.
///
/// `getaddrinfo` reports NXDOMAIN and SERVFAIL through the same error kind,
/// so every resolution failure is treated as "no records". Only the lookup
/// timeout enforced by the caller is transient with this resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLookup;

#[async_trait]
impl DnsLookup for SystemLookup {
    async fn lookup(&self, name: &str) -> anyhow::Result<Vec<IpAddr>> {
        match tokio::net::lookup_host((name, 0u16)).await {
            Ok(addrs) => Ok(addrs.map(|addr| addr.ip()).collect()),
            Err(err) => {
                debug!(name, error = %err, "No address for name");
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(feature = "spam-dnsbl")]
pub use hickory::HickoryLookup;

#[cfg(feature = "spam-dnsbl")]
mod hickory {
    use std::net::IpAddr;

    use async_trait::async_trait;
    use hickory_resolver::config::ResolverConfig;
    use hickory_resolver::name_server::TokioConnectionProvider;
    use hickory_resolver::TokioResolver;
    use tracing::debug;

    use domains::DnsLookup;

    /// Resolver backed by hickory, using the host's resolv.conf.
    pub struct HickoryLookup {
        resolver: TokioResolver,
    }

    impl HickoryLookup {
        pub fn from_system_conf() -> anyhow::Result<Self> {
            let resolver = TokioResolver::builder_tokio()?.build();
            Ok(Self { resolver })
        }

        pub fn with_config(config: ResolverConfig) -> Self {
            let resolver =
                TokioResolver::builder_with_config(config, TokioConnectionProvider::default()).build();
            Self { resolver }
        }
    }

    #[async_trait]
    impl DnsLookup for HickoryLookup {
        async fn lookup(&self, name: &str) -> anyhow::Result<Vec<IpAddr>> {
            match self.resolver.lookup_ip(name).await {
                Ok(found) => Ok(found.iter().collect()),
                Err(err) if err.is_no_records_found() => {
                    debug!(name, "No records");
                    Ok(Vec::new())
                }
                Err(err) => Err(err.into()),
            }
        }
    }
}
