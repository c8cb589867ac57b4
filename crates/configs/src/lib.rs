//! # configs
//!
//! Runtime settings for the gatekeeper, layered in this order (later wins):
//!
//! 1. built-in defaults,
//! 2. an optional settings file (format picked from the extension),
//! 3. `GATEKEEPER__*` environment variables, `__` separating sections,
//!    e.g. `GATEKEEPER__RATE_LIMITS__LOGIN__MAX_ATTEMPTS=5`.
//!
//! A `.env` file in the working directory is read first, if present.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const ENV_PREFIX: &str = "GATEKEEPER";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Attempts allowed per window. `max_attempts = 0` disables the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSettings {
    pub max_attempts: u32,
    pub window_secs: u64,
}

impl LimitSettings {
    const fn new(max_attempts: u32, window_secs: u64) -> Self {
        Self { max_attempts, window_secs }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub login: LimitSettings,
    pub account: LimitSettings,
    pub registration: LimitSettings,
    pub thread: LimitSettings,
    pub post: LimitSettings,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            login: LimitSettings::new(10, 300),
            account: LimitSettings::new(5, 600),
            registration: LimitSettings::new(3, 3600),
            thread: LimitSettings::new(3, 600),
            post: LimitSettings::new(20, 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverKind {
    /// Platform resolver via `getaddrinfo`.
    #[default]
    System,
    /// hickory, reading the host's resolv.conf. Needs the `spam-dnsbl` build.
    Hickory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationSettings {
    /// How long a definitive blacklist verdict is reused.
    pub retention_secs: u64,
    pub lookup_timeout_ms: u64,
    pub resolver: ResolverKind,
}

impl Default for ReputationSettings {
    fn default() -> Self {
        Self { retention_secs: 7200, lookup_timeout_ms: 2000, resolver: ResolverKind::System }
    }
}

impl ReputationSettings {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSettings {
    /// Uploads strictly closer than this Hamming distance are rejected.
    pub threshold: u32,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self { threshold: 16 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSettings {
    pub interval_secs: u64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

impl RefreshSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// JSON snapshot seeding bans, blacklists and banned images.
    pub snapshot_path: Option<PathBuf>,
    /// Directory of `<cc>.zone` files. Country lookup is off when unset.
    pub zones_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    pub format: LogFormat,
    /// `EnvFilter` directives; `RUST_LOG` takes precedence when set.
    pub filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { format: LogFormat::Json, filter: "info".to_owned() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Settings {
    pub rate_limits: RateLimitSettings,
    pub reputation: ReputationSettings,
    pub images: ImageSettings,
    pub refresh: RefreshSettings,
    pub storage: StorageSettings,
    pub log: LogSettings,
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);
        if let Some(path) = path {
            debug!(path = %path.display(), "Reading settings file");
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh.interval_secs == 0 {
            return Err(ConfigError::Invalid("refresh.interval_secs must be positive".into()));
        }
        if self.images.threshold > 64 {
            return Err(ConfigError::Invalid(format!(
                "images.threshold must be at most 64, got {}",
                self.images.threshold
            )));
        }
        if self.reputation.lookup_timeout_ms == 0 {
            return Err(ConfigError::Invalid("reputation.lookup_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}
