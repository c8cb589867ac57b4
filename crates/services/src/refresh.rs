//! # Refresher
//!
//! Periodically reloads bans, blacklist configuration, banned image hashes
//! and country blocks from storage. Each reload publishes atomically; a
//! failed reload keeps the previous state and is retried on the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ban_registry::BanRegistry;
use crate::geo::CountryIndex;
use crate::image_ban::ImageBanMatcher;
use crate::reputation::ReputationCache;

pub struct Refresher {
    bans: Arc<BanRegistry>,
    reputation: Arc<ReputationCache>,
    images: Arc<ImageBanMatcher>,
    countries: Option<Arc<CountryIndex>>,
    period: Duration,
}

impl Refresher {
    pub fn new(
        bans: Arc<BanRegistry>,
        reputation: Arc<ReputationCache>,
        images: Arc<ImageBanMatcher>,
        period: Duration,
    ) -> Self {
        Self { bans, reputation, images, countries: None, period }
    }

    pub fn with_countries(mut self, countries: Arc<CountryIndex>) -> Self {
        self.countries = Some(countries);
        self
    }

    /// Reloads every source once. Returns the number of sources that failed.
    pub async fn run_once(&self) -> usize {
        let mut failures = 0;

        match self.bans.refresh().await {
            Ok(count) => debug!(count, "Bans reloaded"),
            Err(err) => {
                warn!(error = %err, "Ban reload failed, keeping previous list");
                failures += 1;
            }
        }
        match self.reputation.reload_lists().await {
            Ok(count) => debug!(count, "Blacklists reloaded"),
            Err(err) => {
                warn!(error = %err, "Blacklist reload failed, keeping previous lists");
                failures += 1;
            }
        }
        match self.images.refresh().await {
            Ok(count) => debug!(count, "Banned image hashes reloaded"),
            Err(err) => {
                warn!(error = %err, "Image hash reload failed, keeping previous set");
                failures += 1;
            }
        }
        if let Some(countries) = &self.countries {
            if let Err(err) = countries.refresh().await {
                warn!(error = %err, "Country reload failed, keeping previous index");
                failures += 1;
            }
        }

        failures
    }

    /// Runs [`Refresher::run_once`] every period until `shutdown` is cancelled.
    /// The first reload happens one period after spawning.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.period, self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(period_secs = self.period.as_secs(), "Refresher started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
            info!("Refresher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_ban::DEFAULT_IMAGE_THRESHOLD;
    use domains::testing::ManualClock;
    use domains::{
        BanEntry, BanScope, BlacklistEntry, BoardId, MockBanRepository, MockBannedImageRepository,
        MockBlacklistRepository, MockDnsLookup,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn refresher(ban_repo: MockBanRepository) -> (Refresher, Arc<BanRegistry>) {
        let clock = Arc::new(ManualClock::epoch());
        let bans = Arc::new(BanRegistry::new(Arc::new(ban_repo), clock.clone()));

        let mut list_repo = MockBlacklistRepository::new();
        list_repo.expect_load_all().returning(|| Ok(vec![BlacklistEntry::new("bl.example.org")]));
        let reputation = Arc::new(ReputationCache::new(
            Arc::new(MockDnsLookup::new()),
            Arc::new(list_repo),
            clock,
        ));

        let mut image_repo = MockBannedImageRepository::new();
        image_repo.expect_load_all().returning(|| Err(anyhow::anyhow!("unavailable")));
        let images = Arc::new(ImageBanMatcher::new(Arc::new(image_repo), DEFAULT_IMAGE_THRESHOLD));

        (Refresher::new(bans.clone(), reputation, images, Duration::from_millis(20)), bans)
    }

    fn global_ban(network: &str) -> BanEntry {
        let now = chrono::Utc::now();
        BanEntry {
            id: uuid::Uuid::new_v4(),
            network: network.parse().unwrap(),
            scope: BanScope::Global,
            created_at: now,
            expiry: now,
        }
    }

    #[tokio::test]
    async fn test_run_once_reports_failures_and_loads_the_rest() {
        let mut ban_repo = MockBanRepository::new();
        ban_repo.expect_load_all().returning(|| Ok(vec![global_ban("10.0.0.0/8")]));
        let (refresher, bans) = refresher(ban_repo);

        assert_eq!(refresher.run_once().await, 1);
        assert!(bans.is_banned("10.1.1.1", BoardId(1)).unwrap());
        assert_eq!(refresher.reputation.lists().len(), 1);
    }

    #[tokio::test]
    async fn test_spawned_task_reloads_until_cancelled() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let mut ban_repo = MockBanRepository::new();
        ban_repo.expect_load_all().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![global_ban("172.16.0.0/12")])
        });
        let (refresher, bans) = refresher(ban_repo);

        let shutdown = CancellationToken::new();
        let handle = refresher.spawn(shutdown.clone());
        tokio::time::sleep(Duration::from_millis(120)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let seen = loads.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected several reloads, got {seen}");
        assert!(bans.is_banned("172.16.0.1", BoardId(1)).unwrap());

        // No further reloads once stopped.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(loads.load(Ordering::SeqCst), seen);
    }
}
