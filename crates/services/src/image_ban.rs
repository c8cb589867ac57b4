//! # ImageBanMatcher
//!
//! Rejects uploads whose perceptual hash is close to a banned one.
//!
//! The banned set is read on every upload and written only by moderators,
//! so it sits behind a read-mostly `RwLock`. Storage calls happen before the
//! lock is taken. Reloads and moderator writes are serialized by an async
//! writer mutex held across the storage call.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info};

use domains::{BannedImageRepository, DomainError, HashKind, PerceptualHash, Result};

/// Default Hamming-distance threshold for 64-bit average hashes.
pub const DEFAULT_IMAGE_THRESHOLD: u32 = 16;

pub struct ImageBanMatcher {
    repo: Arc<dyn BannedImageRepository>,
    banned: RwLock<Vec<PerceptualHash>>,
    threshold: AtomicU32,
    writer: Mutex<()>,
}

impl ImageBanMatcher {
    pub fn new(repo: Arc<dyn BannedImageRepository>, threshold: u32) -> Self {
        Self {
            repo,
            banned: RwLock::new(Vec::new()),
            threshold: AtomicU32::new(threshold),
            writer: Mutex::new(()),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold.load(Ordering::Relaxed)
    }

    pub fn set_threshold(&self, threshold: u32) {
        self.threshold.store(threshold, Ordering::Relaxed);
    }

    /// Reloads the banned set from storage. On failure the current set stays.
    pub async fn refresh(&self) -> Result<usize> {
        let _guard = self.writer.lock().await;
        let hashes = self.repo.load_all().await.map_err(DomainError::Storage)?;
        let count = hashes.len();
        *self.banned.write() = hashes;
        Ok(count)
    }

    /// Bans the image `hash` was computed from.
    pub async fn ban_image(&self, hash: PerceptualHash) -> Result<()> {
        let _guard = self.writer.lock().await;
        let already_banned = self.banned.read().contains(&hash);
        if already_banned {
            debug!(hash = hash.value, kind = ?hash.kind, "Image hash already banned");
            return Ok(());
        }
        self.repo.create(&hash).await.map_err(DomainError::Storage)?;

        let mut banned = self.banned.write();
        if !banned.contains(&hash) {
            banned.push(hash);
        }
        info!(hash = hash.value, kind = ?hash.kind, "Image hash banned");
        Ok(())
    }

    /// Bans a raw hash value, taken to be an average hash.
    pub async fn add_banned_hash(&self, value: u64) -> Result<()> {
        self.ban_image(PerceptualHash::new(value, HashKind::Average)).await
    }

    /// Unbans every stored hash with this value.
    pub async fn remove_banned_hash(&self, value: u64) -> Result<()> {
        let _guard = self.writer.lock().await;
        let removed = self.repo.delete_value(value).await.map_err(DomainError::Storage)?;
        let mut banned = self.banned.write();
        let before = banned.len();
        banned.retain(|hash| hash.value != value);

        if removed == 0 && banned.len() == before {
            return Err(DomainError::NotFound { entity: "image hash", id: value.to_string() });
        }
        info!(hash = value, "Image hash unbanned");
        Ok(())
    }

    /// Fails with `ImageBanned` on the first banned hash of the same kind
    /// strictly closer than the threshold.
    pub fn is_image_banned(&self, hash: &PerceptualHash) -> Result<()> {
        let threshold = self.threshold();
        let banned = self.banned.read();
        let hit = banned
            .iter()
            .filter_map(|candidate| candidate.distance(hash))
            .find(|distance| *distance < threshold);

        match hit {
            Some(distance) => {
                info!(hash = hash.value, distance, threshold, "Banned image rejected");
                Err(DomainError::ImageBanned { distance })
            }
            None => Ok(()),
        }
    }

    pub fn banned_hashes(&self) -> Vec<PerceptualHash> {
        self.banned.read().clone()
    }
}
