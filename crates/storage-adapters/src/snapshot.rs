//! # Snapshot
//!
//! JSON document used to seed the in-memory repositories at startup:
//!
//! ```json
//! { "bans": [...], "blacklists": [...], "banned_images": [...] }
//! ```
//!
//! Every section is optional.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

use domains::{BanEntry, BlacklistEntry, PerceptualHash};

use crate::memory::{MemoryBanRepository, MemoryBannedImageRepository, MemoryBlacklistRepository};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub bans: Vec<BanEntry>,
    pub blacklists: Vec<BlacklistEntry>,
    pub banned_images: Vec<PerceptualHash>,
}

impl Snapshot {
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading snapshot {}", path.display()))?;
        let snapshot: Self = serde_json::from_slice(&raw)
            .with_context(|| format!("parsing snapshot {}", path.display()))?;

        info!(
            path = %path.display(),
            bans = snapshot.bans.len(),
            blacklists = snapshot.blacklists.len(),
            banned_images = snapshot.banned_images.len(),
            "Snapshot loaded"
        );
        Ok(snapshot)
    }

    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        let raw = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, raw)
            .await
            .with_context(|| format!("writing snapshot {}", path.display()))
    }

    pub fn into_repositories(
        self,
    ) -> (MemoryBanRepository, MemoryBlacklistRepository, MemoryBannedImageRepository) {
        (
            MemoryBanRepository::new(self.bans),
            MemoryBlacklistRepository::new(self.blacklists),
            MemoryBannedImageRepository::new(self.banned_images),
        )
    }
}
