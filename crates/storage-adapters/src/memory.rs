//! # In-memory repositories
//!
//! Process-local implementations of the persistence ports, backed by
//! `DashMap`. They are seeded from a [`crate::Snapshot`] at startup and
//! lose their contents on exit.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use uuid::Uuid;

use domains::{
    BanEntry, BanRepository, BannedImageRepository, BlacklistEntry, BlacklistRepository,
    PerceptualHash,
};

#[derive(Default)]
pub struct MemoryBanRepository {
    entries: DashMap<Uuid, BanEntry>,
}

impl MemoryBanRepository {
    pub fn new(entries: impl IntoIterator<Item = BanEntry>) -> Self {
        Self { entries: entries.into_iter().map(|entry| (entry.id, entry)).collect() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl BanRepository for MemoryBanRepository {
    /// Returns entries oldest first.
    async fn load_all(&self) -> anyhow::Result<Vec<BanEntry>> {
        let mut entries: Vec<BanEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by_key(|entry| (entry.created_at, entry.id));
        Ok(entries)
    }

    async fn create(&self, entry: &BanEntry) -> anyhow::Result<()> {
        if self.entries.contains_key(&entry.id) {
            anyhow::bail!("ban {} already exists", entry.id);
        }
        self.entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<Option<BanEntry>> {
        Ok(self.entries.remove(&id).map(|(_, entry)| entry))
    }
}

#[derive(Default)]
pub struct MemoryBlacklistRepository {
    entries: DashMap<String, BlacklistEntry>,
}

impl MemoryBlacklistRepository {
    pub fn new(entries: impl IntoIterator<Item = BlacklistEntry>) -> Self {
        Self { entries: entries.into_iter().map(|entry| (entry.host.clone(), entry)).collect() }
    }
}

#[async_trait]
impl BlacklistRepository for MemoryBlacklistRepository {
    /// Returns entries sorted by host.
    async fn load_all(&self) -> anyhow::Result<Vec<BlacklistEntry>> {
        let mut entries: Vec<BlacklistEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.host.cmp(&b.host));
        Ok(entries)
    }

    async fn upsert(&self, entry: &BlacklistEntry) -> anyhow::Result<()> {
        self.entries.insert(entry.host.clone(), entry.clone());
        Ok(())
    }

    async fn delete(&self, host: &str) -> anyhow::Result<Option<BlacklistEntry>> {
        Ok(self.entries.remove(host).map(|(_, entry)| entry))
    }
}

#[derive(Default)]
pub struct MemoryBannedImageRepository {
    hashes: DashSet<PerceptualHash>,
}

impl MemoryBannedImageRepository {
    pub fn new(hashes: impl IntoIterator<Item = PerceptualHash>) -> Self {
        Self { hashes: hashes.into_iter().collect() }
    }
}

#[async_trait]
impl BannedImageRepository for MemoryBannedImageRepository {
    async fn load_all(&self) -> anyhow::Result<Vec<PerceptualHash>> {
        let mut hashes: Vec<PerceptualHash> = self.hashes.iter().map(|h| *h).collect();
        hashes.sort_by_key(|hash| hash.value);
        Ok(hashes)
    }

    async fn create(&self, hash: &PerceptualHash) -> anyhow::Result<()> {
        self.hashes.insert(*hash);
        Ok(())
    }

    async fn delete_value(&self, value: u64) -> anyhow::Result<usize> {
        let mut removed = 0;
        self.hashes.retain(|hash| {
            let keep = hash.value != value;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}
