//! # ReputationCache
//!
//! DNS blacklist checks with a per-name verdict cache.
//!
//! An address `a.b.c.d` is looked up on list `bl.example.org` as
//! `d.c.b.a.bl.example.org`; IPv6 addresses use reversed nibbles. Any answer
//! means "listed". Lookup failures and timeouts count as "not listed" and are
//! not cached, so a resolver outage never blocks legitimate users.

use std::fmt::Write as _;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use domains::{BlacklistEntry, BlacklistRepository, Clock, DnsLookup, DomainError, Result};

/// Verdicts older than this many seconds are looked up again.
pub const DEFAULT_RETENTION_SECS: i64 = 7200;

pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
struct CachedVerdict {
    listed: bool,
    observed_at: DateTime<Utc>,
    /// Cache generation the lookup started in.
    generation: u64,
}

pub struct ReputationCache {
    resolver: Arc<dyn DnsLookup>,
    repo: Arc<dyn BlacklistRepository>,
    clock: Arc<dyn Clock>,
    cache: DashMap<String, CachedVerdict>,
    lists: ArcSwap<Vec<BlacklistEntry>>,
    /// Bumped by every cache clear. Verdicts from older generations are misses.
    generation: AtomicU64,
    /// Serializes list reloads with admin writes.
    writer: Mutex<()>,
    retention: TimeDelta,
    lookup_timeout: Duration,
}

impl ReputationCache {
    pub fn new(
        resolver: Arc<dyn DnsLookup>,
        repo: Arc<dyn BlacklistRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resolver,
            repo,
            clock,
            cache: DashMap::new(),
            lists: ArcSwap::from_pointee(Vec::new()),
            generation: AtomicU64::new(0),
            writer: Mutex::new(()),
            retention: TimeDelta::seconds(DEFAULT_RETENTION_SECS),
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    pub fn with_retention(mut self, retention: TimeDelta) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Whether `ip` is listed on `list_host`. Unparseable input is not listed.
    pub async fn is_listed_on(&self, ip: &str, list_host: &str) -> bool {
        let Some(name) = query_name(ip, list_host) else {
            debug!(ip, list = list_host, "Address cannot be checked against DNSBL");
            return false;
        };

        let generation = self.generation.load(Ordering::Acquire);

        // Copy the verdict out so no map guard is held across the lookup.
        let cached = self.cache.get(&name).map(|entry| *entry);
        if let Some(verdict) = cached {
            let fresh = self.clock.now() - verdict.observed_at < self.retention;
            if fresh && verdict.generation == generation {
                debug!(name = %name, listed = verdict.listed, "DNSBL cache hit");
                return verdict.listed;
            }
        }

        let lookup = self.resolver.lookup(&name);
        let listed = match tokio::time::timeout(self.lookup_timeout, lookup).await {
            Ok(Ok(addrs)) => !addrs.is_empty(),
            Ok(Err(err)) => {
                warn!(name = %name, error = %err, "DNSBL lookup failed, treating as not listed");
                return false;
            }
            Err(_) => {
                warn!(
                    name = %name,
                    timeout_ms = self.lookup_timeout.as_millis() as u64,
                    "DNSBL lookup timed out, treating as not listed"
                );
                return false;
            }
        };

        debug!(name = %name, listed, "DNSBL lookup");
        // A clear that ran during the lookup leaves this verdict stale.
        if self.generation.load(Ordering::Acquire) == generation {
            let verdict = CachedVerdict { listed, observed_at: self.clock.now(), generation };
            self.cache.insert(name, verdict);
        }
        listed
    }

    /// Fails with `Blacklisted` on the first applicable list that has `ip`.
    pub async fn is_listed(&self, ip: &str, read_only: bool) -> Result<()> {
        let lists = self.lists.load_full();
        for list in lists.iter().filter(|list| list.applies_to(read_only)) {
            if self.is_listed_on(ip, &list.host).await {
                info!(ip, list = %list.host, "Request from blacklisted address");
                return Err(DomainError::Blacklisted { ip: ip.to_string(), list: list.host.clone() });
            }
        }
        Ok(())
    }

    /// Reloads the list configuration, keeping cached verdicts.
    /// On failure the previous configuration stays active.
    pub async fn reload_lists(&self) -> Result<usize> {
        let _guard = self.writer.lock().await;
        self.reload_locked().await
    }

    /// Drops every cached verdict and reloads the list configuration.
    pub async fn clear_cache(&self) -> Result<()> {
        let _guard = self.writer.lock().await;
        self.clear_locked().await
    }

    /// Adds or replaces a list, then clears the cache.
    pub async fn add_list(&self, entry: BlacklistEntry) -> Result<()> {
        let _guard = self.writer.lock().await;
        self.repo.upsert(&entry).await.map_err(DomainError::Storage)?;
        info!(list = %entry.host, disabled = entry.disabled, allow_read = entry.allow_read, "DNSBL saved");
        self.clear_locked().await
    }

    /// Removes a list by host, then clears the cache.
    pub async fn remove_list(&self, host: &str) -> Result<BlacklistEntry> {
        let _guard = self.writer.lock().await;
        let removed = self
            .repo
            .delete(host)
            .await
            .map_err(DomainError::Storage)?
            .ok_or_else(|| DomainError::NotFound { entity: "blacklist", id: host.to_string() })?;
        info!(list = %host, "DNSBL removed");
        self.clear_locked().await?;
        Ok(removed)
    }

    // Callers hold `writer`.
    async fn reload_locked(&self) -> Result<usize> {
        let lists = self.repo.load_all().await.map_err(DomainError::Storage)?;
        let count = lists.len();
        self.lists.store(Arc::new(lists));
        Ok(count)
    }

    async fn clear_locked(&self) -> Result<()> {
        let count = self.reload_locked().await?;
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.cache.clear();
        info!(lists = count, "DNSBL cache cleared");
        Ok(())
    }

    /// The active list configuration.
    pub fn lists(&self) -> Arc<Vec<BlacklistEntry>> {
        self.lists.load_full()
    }
}

/// Builds the DNSBL query name for `ip` on `list_host`.
pub fn query_name(ip: &str, list_host: &str) -> Option<String> {
    let list_host = list_host.trim().trim_matches('.');
    if list_host.is_empty() {
        return None;
    }
    let addr: IpAddr = ip.trim().parse().ok()?;
    let mut name = String::new();
    match addr.to_canonical() {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            let _ = write!(name, "{d}.{c}.{b}.{a}.");
        }
        IpAddr::V6(v6) => {
            for byte in v6.octets().iter().rev() {
                let _ = write!(name, "{:x}.{:x}.", byte & 0x0f, byte >> 4);
            }
        }
    }
    name.push_str(list_host);
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::testing::ManualClock;
    use domains::{MockBlacklistRepository, MockDnsLookup};
    use mockall::predicate::eq;

    fn listed_answer() -> anyhow::Result<Vec<IpAddr>> {
        Ok(vec!["127.0.0.2".parse().unwrap()])
    }

    fn cache_with(
        resolver: MockDnsLookup,
        repo: MockBlacklistRepository,
    ) -> (ReputationCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::epoch());
        (ReputationCache::new(Arc::new(resolver), Arc::new(repo), clock.clone()), clock)
    }

    fn repo_with(lists: Vec<BlacklistEntry>) -> MockBlacklistRepository {
        let mut repo = MockBlacklistRepository::new();
        repo.expect_load_all().returning(move || Ok(lists.clone()));
        repo
    }

    #[test]
    fn test_query_name_reverses_octets() {
        assert_eq!(query_name("1.2.3.4", "example.org").as_deref(), Some("4.3.2.1.example.org"));
        assert_eq!(
            query_name("203.0.113.9", "bl.example.org.").as_deref(),
            Some("9.113.0.203.bl.example.org")
        );
        assert_eq!(
            query_name("::ffff:1.2.3.4", "example.org").as_deref(),
            Some("4.3.2.1.example.org")
        );
    }

    #[test]
    fn test_query_name_ipv6_nibbles() {
        let name = query_name("2001:db8::567:89ab", "bl.example.org").unwrap();
        assert_eq!(
            name,
            "b.a.9.8.7.6.5.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.8.b.d.0.1.0.0.2.bl.example.org"
        );
    }

    #[test]
    fn test_query_name_rejects_garbage() {
        assert_eq!(query_name("1.2.3", "example.org"), None);
        assert_eq!(query_name("localhost", "example.org"), None);
        assert_eq!(query_name("1.2.3.4", ""), None);
    }

    #[tokio::test]
    async fn test_verdict_is_cached_for_retention_window() {
        let mut resolver = MockDnsLookup::new();
        resolver
            .expect_lookup()
            .with(eq("9.113.0.203.bl.example.org"))
            .times(2)
            .returning(|_| listed_answer());
        let (cache, clock) = cache_with(resolver, MockBlacklistRepository::new());

        assert!(cache.is_listed_on("203.0.113.9", "bl.example.org").await);
        clock.advance_secs(7199);
        assert!(cache.is_listed_on("203.0.113.9", "bl.example.org").await);
        clock.advance_secs(2);
        assert!(cache.is_listed_on("203.0.113.9", "bl.example.org").await);
    }

    #[tokio::test]
    async fn test_negative_verdict_is_cached() {
        let mut resolver = MockDnsLookup::new();
        resolver.expect_lookup().times(1).returning(|_| Ok(vec![]));
        let (cache, _) = cache_with(resolver, MockBlacklistRepository::new());

        assert!(!cache.is_listed_on("192.0.2.1", "bl.example.org").await);
        assert!(!cache.is_listed_on("192.0.2.1", "bl.example.org").await);
    }

    #[tokio::test]
    async fn test_lookup_failure_fails_open_and_is_retried() {
        let mut resolver = MockDnsLookup::new();
        resolver
            .expect_lookup()
            .times(2)
            .returning(|_| Err(anyhow::anyhow!("SERVFAIL")));
        let (cache, _) = cache_with(resolver, MockBlacklistRepository::new());

        assert!(!cache.is_listed_on("192.0.2.1", "bl.example.org").await);
        assert!(!cache.is_listed_on("192.0.2.1", "bl.example.org").await);
    }

    #[tokio::test]
    async fn test_lookup_timeout_fails_open() {
        struct Hanging;

        #[async_trait::async_trait]
        impl DnsLookup for Hanging {
            async fn lookup(&self, _name: &str) -> anyhow::Result<Vec<IpAddr>> {
                std::future::pending().await
            }
        }

        let clock = Arc::new(ManualClock::epoch());
        let cache = ReputationCache::new(Arc::new(Hanging), Arc::new(MockBlacklistRepository::new()), clock)
            .with_lookup_timeout(Duration::from_millis(50));

        assert!(!cache.is_listed_on("192.0.2.1", "bl.example.org").await);
    }

    #[tokio::test]
    async fn test_is_listed_skips_disabled_and_read_exempt_lists() {
        let disabled = BlacklistEntry { host: "off.example".into(), disabled: true, allow_read: false };
        let read_ok = BlacklistEntry { host: "read.example".into(), disabled: false, allow_read: true };

        let mut resolver = MockDnsLookup::new();
        // Only the read-exempt list is ever queried, and only for the write request.
        resolver
            .expect_lookup()
            .with(eq("1.2.0.192.read.example"))
            .times(1)
            .returning(|_| listed_answer());
        let (cache, _) = cache_with(resolver, repo_with(vec![disabled, read_ok]));
        cache.reload_lists().await.unwrap();

        cache.is_listed("192.0.2.1", true).await.unwrap();
        let err = cache.is_listed("192.0.2.1", false).await.unwrap_err();
        assert!(matches!(err, DomainError::Blacklisted { ref list, .. } if list == "read.example"));
    }

    #[tokio::test]
    async fn test_is_listed_stops_at_first_match() {
        let mut resolver = MockDnsLookup::new();
        resolver
            .expect_lookup()
            .with(eq("1.2.0.192.first.example"))
            .times(1)
            .returning(|_| listed_answer());
        let lists = vec![BlacklistEntry::new("first.example"), BlacklistEntry::new("second.example")];
        let (cache, _) = cache_with(resolver, repo_with(lists));
        cache.reload_lists().await.unwrap();

        assert!(cache.is_listed("192.0.2.1", false).await.is_err());
    }

    #[tokio::test]
    async fn test_clear_cache_forces_new_lookup() {
        let mut resolver = MockDnsLookup::new();
        resolver.expect_lookup().times(2).returning(|_| Ok(vec![]));
        let (cache, _) = cache_with(resolver, repo_with(vec![BlacklistEntry::new("bl.example.org")]));

        cache.is_listed_on("192.0.2.1", "bl.example.org").await;
        cache.clear_cache().await.unwrap();
        assert_eq!(cache.lists().len(), 1);
        cache.is_listed_on("192.0.2.1", "bl.example.org").await;
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_lists() {
        let mut repo = MockBlacklistRepository::new();
        let mut calls = 0;
        repo.expect_load_all().returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(vec![BlacklistEntry::new("bl.example.org")])
            } else {
                Err(anyhow::anyhow!("database is down"))
            }
        });
        let (cache, _) = cache_with(MockDnsLookup::new(), repo);

        cache.reload_lists().await.unwrap();
        assert!(matches!(cache.clear_cache().await, Err(DomainError::Storage(_))));
        assert_eq!(cache.lists()[0].host, "bl.example.org");
    }

    /// Resolver that parks every lookup until released.
    struct GatedLookup {
        calls: std::sync::atomic::AtomicUsize,
        started: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl DnsLookup for GatedLookup {
        async fn lookup(&self, _name: &str) -> anyhow::Result<Vec<IpAddr>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            self.release.notified().await;
            listed_answer()
        }
    }

    #[tokio::test]
    async fn test_lookup_racing_a_clear_is_not_cached() {
        let resolver = Arc::new(GatedLookup {
            calls: Default::default(),
            started: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let cache = Arc::new(ReputationCache::new(
            resolver.clone(),
            Arc::new(repo_with(vec![BlacklistEntry::new("bl.example.org")])),
            Arc::new(ManualClock::epoch()),
        ));

        let pending = tokio::spawn({
            let cache = cache.clone();
            async move { cache.is_listed_on("192.0.2.1", "bl.example.org").await }
        });
        resolver.started.notified().await;
        cache.clear_cache().await.unwrap();
        resolver.release.notify_one();
        assert!(pending.await.unwrap());

        // The verdict from before the clear must not be served.
        let again = tokio::spawn({
            let cache = cache.clone();
            async move { cache.is_listed_on("192.0.2.1", "bl.example.org").await }
        });
        resolver.started.notified().await;
        resolver.release.notify_one();
        assert!(again.await.unwrap());
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }

    /// List store whose `load_all` reads its rows, then waits before returning them.
    #[derive(Default)]
    struct SlowListRepo {
        rows: parking_lot::Mutex<Vec<BlacklistEntry>>,
        loads: std::sync::atomic::AtomicUsize,
        loading: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl BlacklistRepository for SlowListRepo {
        async fn load_all(&self) -> anyhow::Result<Vec<BlacklistEntry>> {
            let rows = self.rows.lock().clone();
            if self.loads.fetch_add(1, Ordering::SeqCst) == 0 {
                self.loading.notify_one();
                self.release.notified().await;
            }
            Ok(rows)
        }

        async fn upsert(&self, entry: &BlacklistEntry) -> anyhow::Result<()> {
            let mut rows = self.rows.lock();
            rows.retain(|row| row.host != entry.host);
            rows.push(entry.clone());
            Ok(())
        }

        async fn delete(&self, host: &str) -> anyhow::Result<Option<BlacklistEntry>> {
            let mut rows = self.rows.lock();
            let pos = rows.iter().position(|row| row.host == host);
            Ok(pos.map(|pos| rows.remove(pos)))
        }
    }

    #[tokio::test]
    async fn test_list_added_during_reload_survives() {
        let repo = Arc::new(SlowListRepo::default());
        let cache = Arc::new(ReputationCache::new(
            Arc::new(MockDnsLookup::new()),
            repo.clone(),
            Arc::new(ManualClock::epoch()),
        ));

        let reload = tokio::spawn({
            let cache = cache.clone();
            async move { cache.reload_lists().await }
        });
        repo.loading.notified().await;
        let add = tokio::spawn({
            let cache = cache.clone();
            async move { cache.add_list(BlacklistEntry::new("bl.example.org")).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        repo.release.notify_one();

        reload.await.unwrap().unwrap();
        add.await.unwrap().unwrap();
        assert_eq!(cache.lists().len(), 1);
        assert_eq!(cache.lists()[0].host, "bl.example.org");
    }

    #[tokio::test]
    async fn test_remove_unknown_list_is_not_found() {
        let mut repo = MockBlacklistRepository::new();
        repo.expect_delete().returning(|_| Ok(None));
        let (cache, _) = cache_with(MockDnsLookup::new(), repo);

        let err = cache.remove_list("nope.example").await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "blacklist", .. }));
    }
}
