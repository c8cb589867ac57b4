//! # Rate Limiting
//!
//! Fixed-window attempt counters, one [`RateLimiter`] per sensitive action.
//!
//! The window is shared by every key of a limiter: when it elapses, all
//! counters of that limiter reset together.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use domains::{Clock, DomainError, Result};

/// Attempts allowed per window. `max_attempts == 0` disables the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    pub max_attempts: u32,
    pub window_secs: u64,
}

impl LimitPolicy {
    pub const DISABLED: LimitPolicy = LimitPolicy { max_attempts: 0, window_secs: 0 };

    pub fn new(max_attempts: u32, window_secs: u64) -> Self {
        Self { max_attempts, window_secs }
    }

    fn window(&self) -> TimeDelta {
        TimeDelta::try_seconds(i64::try_from(self.window_secs).unwrap_or(i64::MAX))
            .unwrap_or(TimeDelta::MAX)
    }
}

struct LimiterState {
    policy: LimitPolicy,
    last_reset: DateTime<Utc>,
    counts: HashMap<String, u32>,
}

pub struct RateLimiter {
    name: &'static str,
    clock: Arc<dyn Clock>,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(name: &'static str, policy: LimitPolicy, clock: Arc<dyn Clock>) -> Self {
        let last_reset = clock.now();
        Self {
            name,
            clock,
            state: Mutex::new(LimiterState { policy, last_reset, counts: HashMap::new() }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Records one attempt for `key`, failing with `RateLimited` once the
    /// key has used up the current window.
    pub fn try_acquire(&self, key: &str) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        // 1. Disabled limiters never refuse.
        if state.policy.max_attempts == 0 {
            return Ok(());
        }

        // 2. Shared window reset.
        if now - state.last_reset >= state.policy.window() {
            if !state.counts.is_empty() {
                debug!(limiter = self.name, keys = state.counts.len(), "Rate limit window reset");
            }
            state.counts.clear();
            state.last_reset = now;
        }

        // 3. Check and count.
        let max_attempts = state.policy.max_attempts;
        let count = state.counts.entry(key.to_string()).or_insert(0);
        if *count >= max_attempts {
            debug!(limiter = self.name, key, "Rate limited");
            return Err(DomainError::RateLimited { limiter: self.name });
        }
        *count += 1;
        Ok(())
    }

    /// Applies a new policy to subsequent attempts. Existing counts are kept.
    pub fn reconfigure(&self, policy: LimitPolicy) {
        let mut state = self.state.lock();
        if state.policy != policy {
            info!(
                limiter = self.name,
                max_attempts = policy.max_attempts,
                window_secs = policy.window_secs,
                "Rate limit reconfigured"
            );
            state.policy = policy;
        }
    }

    pub fn policy(&self) -> LimitPolicy {
        self.state.lock().policy
    }
}

/// Policies for every named limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicies {
    pub login: LimitPolicy,
    pub account: LimitPolicy,
    pub registration: LimitPolicy,
    pub thread: LimitPolicy,
    pub post: LimitPolicy,
}

/// The named limiter instances.
///
/// `login`, `registration`, `thread` and `post` are keyed by client IP;
/// `account` is keyed by account name.
pub struct RateLimits {
    pub login: RateLimiter,
    pub account: RateLimiter,
    pub registration: RateLimiter,
    pub thread: RateLimiter,
    pub post: RateLimiter,
}

impl RateLimits {
    pub fn new(policies: RateLimitPolicies, clock: Arc<dyn Clock>) -> Self {
        Self {
            login: RateLimiter::new("login", policies.login, clock.clone()),
            account: RateLimiter::new("account", policies.account, clock.clone()),
            registration: RateLimiter::new("registration", policies.registration, clock.clone()),
            thread: RateLimiter::new("thread", policies.thread, clock.clone()),
            post: RateLimiter::new("post", policies.post, clock),
        }
    }

    pub fn reconfigure(&self, policies: RateLimitPolicies) {
        self.login.reconfigure(policies.login);
        self.account.reconfigure(policies.account);
        self.registration.reconfigure(policies.registration);
        self.thread.reconfigure(policies.thread);
        self.post.reconfigure(policies.post);
    }
}
