//! # Ports
//!
//! Contracts the admission services depend on. Storage, DNS and media
//! adapters implement these; the services never see a concrete backend.

use std::net::IpAddr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::Result;
use crate::models::{BanEntry, BlacklistEntry, CountryBlock, PerceptualHash};

/// Persistence contract for network bans.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BanRepository: Send + Sync {
    async fn load_all(&self) -> anyhow::Result<Vec<BanEntry>>;
    async fn create(&self, entry: &BanEntry) -> anyhow::Result<()>;
    /// Deletes and returns the entry, or `None` if the id is unknown.
    async fn delete(&self, id: Uuid) -> anyhow::Result<Option<BanEntry>>;
}

/// Persistence contract for DNS reputation list configuration.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BlacklistRepository: Send + Sync {
    async fn load_all(&self) -> anyhow::Result<Vec<BlacklistEntry>>;
    /// Inserts or replaces the entry with the same host.
    async fn upsert(&self, entry: &BlacklistEntry) -> anyhow::Result<()>;
    async fn delete(&self, host: &str) -> anyhow::Result<Option<BlacklistEntry>>;
}

/// Persistence contract for banned image fingerprints.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BannedImageRepository: Send + Sync {
    async fn load_all(&self) -> anyhow::Result<Vec<PerceptualHash>>;
    async fn create(&self, hash: &PerceptualHash) -> anyhow::Result<()>;
    /// Deletes every stored hash with this value. Returns how many were removed.
    async fn delete_value(&self, value: u64) -> anyhow::Result<usize>;
}

/// Source of country address allocations.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CountryRepository: Send + Sync {
    async fn load_all(&self) -> anyhow::Result<Vec<CountryBlock>>;
}

/// Forward DNS resolution.
///
/// Implementations return `Ok(vec![])` when the name definitively does not
/// exist and `Err` only for transient failures.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DnsLookup: Send + Sync {
    async fn lookup(&self, name: &str) -> anyhow::Result<Vec<IpAddr>>;
}

/// Computes a perceptual hash from raw upload bytes.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait ImageHasher: Send + Sync {
    /// Fails with `DomainError::InvalidImage` when the bytes do not decode.
    fn hash(&self, bytes: &[u8]) -> Result<PerceptualHash>;
}

/// Wall-clock source, injected so windows and TTLs can be tested.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
