//! # gatekeeper
//!
//! Admission-control sidecar for the board. Reads one JSON request per line
//! on stdin and answers with one JSON verdict per line on stdout. Logs go to
//! stderr.
//!
//! Usage: `gatekeeper [settings-file]`

mod protocol;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::TimeDelta;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use configs::{LimitSettings, LogFormat, LogSettings, RateLimitSettings, ResolverKind, Settings};
use domains::{Clock, DnsLookup, SystemClock};
use services::{
    AdmissionGate, BanRegistry, CountryIndex, ImageBanMatcher, LimitPolicy, RateLimitPolicies,
    RateLimits, Refresher, ReputationCache,
};
use storage_adapters::{Snapshot, SystemLookup, ZoneDirectory};

use crate::protocol::Handler;

fn init_tracing(log: &LogSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let registry = tracing_subscriber::registry().with(filter);
    match log.format {
        LogFormat::Json => registry.with(fmt::layer().json().with_writer(std::io::stderr)).init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
    }
}

fn policy(limit: LimitSettings) -> LimitPolicy {
    LimitPolicy::new(limit.max_attempts, limit.window_secs)
}

fn policies(settings: &RateLimitSettings) -> RateLimitPolicies {
    RateLimitPolicies {
        login: policy(settings.login),
        account: policy(settings.account),
        registration: policy(settings.registration),
        thread: policy(settings.thread),
        post: policy(settings.post),
    }
}

/// Pushes the hot-reloadable parts of `settings` into running components.
/// Resolver, storage and logging changes need a restart.
fn apply_settings(settings: &Settings, limits: &RateLimits, images: &ImageBanMatcher) {
    limits.reconfigure(policies(&settings.rate_limits));
    if images.threshold() != settings.images.threshold {
        info!(
            from = images.threshold(),
            to = settings.images.threshold,
            "Image threshold reconfigured"
        );
        images.set_threshold(settings.images.threshold);
    }
}

/// Re-reads the settings every `period` until `shutdown` is cancelled.
/// An unreadable or invalid file keeps the running configuration.
fn spawn_settings_reload(
    path: Option<PathBuf>,
    limits: Arc<RateLimits>,
    images: Arc<ImageBanMatcher>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => match Settings::load(path.as_deref()) {
                    Ok(settings) => {
                        debug!("Settings reloaded");
                        apply_settings(&settings, &limits, &images);
                    }
                    Err(err) => warn!(error = %err, "Settings reload failed, keeping current values"),
                },
            }
        }
    })
}

fn resolver(kind: ResolverKind) -> anyhow::Result<Arc<dyn DnsLookup>> {
    match kind {
        ResolverKind::System => Ok(Arc::new(SystemLookup)),
        #[cfg(feature = "spam-dnsbl")]
        ResolverKind::Hickory => Ok(Arc::new(storage_adapters::HickoryLookup::from_system_conf()?)),
        #[cfg(not(feature = "spam-dnsbl"))]
        ResolverKind::Hickory => anyhow::bail!("hickory resolver requires the spam-dnsbl feature"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_path = std::env::args_os().nth(1).map(PathBuf::from);
    let settings = Settings::load(settings_path.as_deref()).context("loading settings")?;
    init_tracing(&settings.log);

    // 1. Storage, seeded from the snapshot when one is configured
    let snapshot = match &settings.storage.snapshot_path {
        Some(path) => Snapshot::load(path).await?,
        None => Snapshot::default(),
    };
    let (ban_repo, list_repo, image_repo) = snapshot.into_repositories();

    // 2. Admission components
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let limits = Arc::new(RateLimits::new(policies(&settings.rate_limits), clock.clone()));
    let bans = Arc::new(BanRegistry::new(Arc::new(ban_repo), clock.clone()));
    let retention = i64::try_from(settings.reputation.retention_secs).unwrap_or(i64::MAX);
    let reputation = Arc::new(
        ReputationCache::new(resolver(settings.reputation.resolver)?, Arc::new(list_repo), clock)
            .with_retention(TimeDelta::try_seconds(retention).unwrap_or(TimeDelta::MAX))
            .with_lookup_timeout(settings.reputation.lookup_timeout()),
    );
    let images = Arc::new(ImageBanMatcher::new(Arc::new(image_repo), settings.images.threshold));
    let countries = settings
        .storage
        .zones_dir
        .as_ref()
        .map(|dir| Arc::new(CountryIndex::new(Arc::new(ZoneDirectory::new(dir)))));

    // 3. Initial load; refusing to start is better than admitting everyone
    bans.refresh().await.context("loading bans")?;
    reputation.reload_lists().await.context("loading blacklists")?;
    images.refresh().await.context("loading banned images")?;
    if let Some(countries) = &countries {
        countries.refresh().await.context("loading country zones")?;
    }

    // 4. Background refresh
    let mut refresher =
        Refresher::new(bans.clone(), reputation.clone(), images.clone(), settings.refresh.interval());
    if let Some(countries) = &countries {
        refresher = refresher.with_countries(countries.clone());
    }
    let shutdown = CancellationToken::new();
    let refresh_task = refresher.spawn(shutdown.clone());
    let reload_task = spawn_settings_reload(
        settings_path,
        limits.clone(),
        images.clone(),
        settings.refresh.interval(),
        shutdown.clone(),
    );

    let handler = Handler::new(AdmissionGate::new(limits, bans, reputation, images), countries);
    info!(
        resolver = ?settings.reputation.resolver,
        threshold = settings.images.threshold,
        "Gatekeeper ready"
    );

    // 5. Serve stdin until EOF or Ctrl-C
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let verdict = handler.handle_line(&line).await;
                let mut out = serde_json::to_vec(&verdict)?;
                out.push(b'\n');
                stdout.write_all(&out).await?;
                stdout.flush().await?;
            }
        }
    }

    shutdown.cancel();
    if let Err(err) = refresh_task.await {
        warn!(error = %err, "Refresher task ended abnormally");
    }
    if let Err(err) = reload_task.await {
        warn!(error = %err, "Settings reload task ended abnormally");
    }
    info!("Gatekeeper stopped");
    Ok(())
}
