//! # BanRegistry
//!
//! Per-scope CIDR tries answering "is this address banned here?".
//!
//! The set of tries is published through an `ArcSwap`. Readers take a
//! snapshot without locking; writers build the next version from the current
//! one and swap it in, so a reader never sees a half-applied change.
//! Writers are serialized by an async mutex held across the storage call.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::TimeDelta;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use domains::{BanEntry, BanRepository, BanScope, BoardId, Cidr, Clock, DomainError, Result};

use crate::cidr_trie::PrefixTrie;

/// Number of ban entries sharing one exact prefix.
type EntryCount = u32;

type ScopeTries = HashMap<BanScope, Arc<PrefixTrie<EntryCount>>>;

pub struct BanRegistry {
    repo: Arc<dyn BanRepository>,
    clock: Arc<dyn Clock>,
    tries: ArcSwap<ScopeTries>,
    writer: Mutex<()>,
}

impl BanRegistry {
    /// Creates an empty registry. Call [`BanRegistry::refresh`] to load the
    /// persisted bans.
    pub fn new(repo: Arc<dyn BanRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo,
            clock,
            tries: ArcSwap::from_pointee(HashMap::new()),
            writer: Mutex::new(()),
        }
    }

    /// Rebuilds every scope from `entries` and publishes the result in one swap.
    pub async fn load(&self, entries: &[BanEntry]) {
        let _guard = self.writer.lock().await;
        self.publish_snapshot(entries);
    }

    /// Reloads from storage. On failure the current tries stay in place.
    pub async fn refresh(&self) -> Result<usize> {
        let _guard = self.writer.lock().await;
        let entries = self.repo.load_all().await.map_err(DomainError::Storage)?;
        self.publish_snapshot(&entries);
        Ok(entries.len())
    }

    fn publish_snapshot(&self, entries: &[BanEntry]) {
        let mut building: HashMap<BanScope, PrefixTrie<EntryCount>> = HashMap::new();
        for entry in entries {
            let trie = building.entry(entry.scope).or_default();
            let count = trie.get(entry.network).copied().unwrap_or(0);
            trie.insert(entry.network, count + 1);
        }
        let tries: ScopeTries = building
            .into_iter()
            .map(|(scope, trie)| (scope, Arc::new(trie)))
            .collect();
        info!(entries = entries.len(), scopes = tries.len(), "Ban list loaded");
        self.tries.store(Arc::new(tries));
    }

    /// Bans `cidr` (or a bare address, as a host network) in `scope`.
    ///
    /// `expiry` is stored as `now + ttl_secs` for display; it is not enforced.
    pub async fn insert(&self, cidr: &str, scope: BanScope, ttl_secs: i64) -> Result<BanEntry> {
        let network = Cidr::parse_lenient(cidr)?;
        let created_at = self.clock.now();
        let expiry = TimeDelta::try_seconds(ttl_secs)
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);
        let entry = BanEntry { id: Uuid::new_v4(), network, scope, created_at, expiry };

        let _guard = self.writer.lock().await;
        self.repo.create(&entry).await.map_err(DomainError::Storage)?;
        self.modify(scope, |trie| {
            let count = trie.get(network).copied().unwrap_or(0);
            trie.insert(network, count + 1);
        });

        info!(id = %entry.id, network = %network, scope = %scope, expiry = %entry.expiry, "Ban added");
        Ok(entry)
    }

    /// Removes the ban with this id from storage and from its scope's trie.
    pub async fn remove(&self, id: Uuid) -> Result<BanEntry> {
        let _guard = self.writer.lock().await;
        let entry = self
            .repo
            .delete(id)
            .await
            .map_err(DomainError::Storage)?
            .ok_or_else(|| DomainError::NotFound { entity: "ban", id: id.to_string() })?;

        self.modify(entry.scope, |trie| match trie.get(entry.network).copied() {
            Some(count) if count > 1 => {
                trie.insert(entry.network, count - 1);
            }
            Some(_) => {
                trie.remove(entry.network);
            }
            None => warn!(id = %id, network = %entry.network, "Removed ban was not loaded"),
        });

        info!(id = %id, network = %entry.network, scope = %entry.scope, "Ban removed");
        Ok(entry)
    }

    /// Copies the scope's trie, applies `change`, and publishes the new set.
    /// Callers must hold `writer`.
    fn modify(&self, scope: BanScope, change: impl FnOnce(&mut PrefixTrie<EntryCount>)) {
        let current = self.tries.load();
        let mut trie = current.get(&scope).map(|t| PrefixTrie::clone(t)).unwrap_or_default();
        change(&mut trie);

        let mut next = ScopeTries::clone(&current);
        if trie.is_empty() {
            next.remove(&scope);
        } else {
            next.insert(scope, Arc::new(trie));
        }
        self.tries.store(Arc::new(next));
    }

    /// Whether `ip` falls in a global ban or a ban on `board`.
    pub fn is_banned(&self, ip: &str, board: BoardId) -> Result<bool> {
        self.is_banned_in(ip, BanScope::Board(board))
    }

    /// Like [`BanRegistry::is_banned`], for any scope. `Global` only
    /// consults global bans.
    pub fn is_banned_in(&self, ip: &str, scope: BanScope) -> Result<bool> {
        let addr: IpAddr = ip
            .trim()
            .parse()
            .map_err(|_| DomainError::InvalidAddress(ip.to_string()))?;
        let tries = self.tries.load();

        let hit = |scope: BanScope| tries.get(&scope).is_some_and(|trie| trie.contains(addr));
        let banned = hit(BanScope::Global) || (scope != BanScope::Global && hit(scope));
        debug!(ip = %addr, scope = %scope, banned, "Ban check");
        Ok(banned)
    }

    /// Fails with `Banned` if `ip` is banned in `scope`.
    pub fn check(&self, ip: &str, scope: BanScope) -> Result<()> {
        if self.is_banned_in(ip, scope)? {
            return Err(DomainError::Banned { ip: ip.to_string() });
        }
        Ok(())
    }

    /// Persisted bans, for operator display.
    pub async fn list(&self) -> Result<Vec<BanEntry>> {
        self.repo.load_all().await.map_err(DomainError::Storage)
    }
}
