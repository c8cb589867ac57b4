//! # AdmissionGate
//!
//! Runs every content-creating or authenticating request through the
//! checks in order of cost: rate limit, bans, DNS blacklists. The first
//! failure is returned and the caller must not perform the action.
//!
//! # Developer Note
//! Blacklist lookups fail open while malformed addresses and undecodable
//! images fail closed. Keep that split when adding checks.

use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use domains::{BanScope, BoardId, DomainError, ImageHasher, PerceptualHash, Result};

use crate::ban_registry::BanRegistry;
use crate::image_ban::ImageBanMatcher;
use crate::rate_limit::{RateLimiter, RateLimits};
use crate::reputation::ReputationCache;

/// What the client is trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Login,
    Registration,
    /// Password or settings change, limited per account name.
    AccountChange,
    NewThread,
    NewPost,
    /// Non-mutating request; only DNS blacklists without a read exemption apply.
    Read,
}

impl Action {
    pub fn is_read_only(self) -> bool {
        matches!(self, Self::Read)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AdmissionRequest<'a> {
    pub action: Action,
    pub ip: &'a str,
    /// Board the action targets; `None` for site-wide actions such as login.
    pub board: Option<BoardId>,
    /// Account name, used as the key for `AccountChange`.
    pub account: Option<&'a str>,
    /// Logged-in accounts are not subject to IP bans.
    pub authenticated: bool,
}

impl<'a> AdmissionRequest<'a> {
    pub fn new(action: Action, ip: &'a str) -> Self {
        Self { action, ip, board: None, account: None, authenticated: false }
    }

    pub fn on_board(mut self, board: BoardId) -> Self {
        self.board = Some(board);
        self
    }

    pub fn for_account(mut self, account: &'a str) -> Self {
        self.account = Some(account);
        self
    }

    pub fn authenticated(mut self) -> Self {
        self.authenticated = true;
        self
    }

    fn scope(&self) -> BanScope {
        self.board.map_or(BanScope::Global, BanScope::Board)
    }
}

pub struct AdmissionGate {
    limits: Arc<RateLimits>,
    bans: Arc<BanRegistry>,
    reputation: Arc<ReputationCache>,
    images: Arc<ImageBanMatcher>,
}

impl AdmissionGate {
    pub fn new(
        limits: Arc<RateLimits>,
        bans: Arc<BanRegistry>,
        reputation: Arc<ReputationCache>,
        images: Arc<ImageBanMatcher>,
    ) -> Self {
        Self { limits, bans, reputation, images }
    }

    fn limiter_for(&self, action: Action) -> Option<&RateLimiter> {
        match action {
            Action::Login => Some(&self.limits.login),
            Action::Registration => Some(&self.limits.registration),
            Action::AccountChange => Some(&self.limits.account),
            Action::NewThread => Some(&self.limits.thread),
            Action::NewPost => Some(&self.limits.post),
            Action::Read => None,
        }
    }

    /// Checks a request. `Ok(())` means the action may proceed.
    pub async fn admit(&self, request: &AdmissionRequest<'_>) -> Result<()> {
        // 0. Malformed addresses are rejected on every path.
        request
            .ip
            .trim()
            .parse::<IpAddr>()
            .map_err(|_| DomainError::InvalidAddress(request.ip.to_string()))?;

        // 1. Rate limit: cheapest, purely local.
        if let Some(limiter) = self.limiter_for(request.action) {
            let key = match request.action {
                Action::AccountChange => request.account.unwrap_or(request.ip),
                _ => request.ip,
            };
            limiter.try_acquire(key)?;
        }

        // 2. Network bans.
        if !request.authenticated && !request.action.is_read_only() {
            self.bans.check(request.ip, request.scope())?;
        }

        // 3. DNS blacklists: may wait on the network.
        self.reputation.is_listed(request.ip, request.action.is_read_only()).await?;

        debug!(action = ?request.action, ip = request.ip, board = ?request.board, "Request admitted");
        Ok(())
    }

    /// Checks an already-hashed upload against the banned image set.
    pub fn check_upload(&self, hash: &PerceptualHash) -> Result<()> {
        self.images.is_image_banned(hash)
    }

    /// Hashes and checks an upload. Bytes that do not decode are rejected.
    pub fn screen_upload(&self, hasher: &dyn ImageHasher, bytes: &[u8]) -> Result<PerceptualHash> {
        let hash = hasher.hash(bytes)?;
        self.check_upload(&hash)?;
        Ok(hash)
    }

    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    pub fn bans(&self) -> &BanRegistry {
        &self.bans
    }

    pub fn reputation(&self) -> &ReputationCache {
        &self.reputation
    }

    pub fn images(&self) -> &ImageBanMatcher {
        &self.images
    }
}
