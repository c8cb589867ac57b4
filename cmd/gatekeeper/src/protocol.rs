//! JSON-lines request/verdict format spoken on stdin/stdout.
//!
//! ```text
//! > {"action":"new_post","ip":"203.0.113.9","board":3,"image_hash":1234}
//! < {"allowed":false,"code":"image_banned","reason":"image is banned (distance 2)"}
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use domains::{BoardId, DomainError, HashKind, PerceptualHash};
use services::{Action, AdmissionGate, AdmissionRequest, CountryIndex};

#[derive(Debug, Deserialize)]
pub struct Request {
    pub action: Action,
    pub ip: String,
    #[serde(default)]
    pub board: Option<u32>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub authenticated: bool,
    /// Perceptual hash of an attached image, computed by the caller.
    #[serde(default)]
    pub image_hash: Option<u64>,
    #[serde(default)]
    pub hash_kind: HashKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Country of the address, when a zone directory is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl Verdict {
    fn allowed(country: Option<String>) -> Self {
        Self { allowed: true, code: None, reason: None, country }
    }

    fn denied(err: &DomainError) -> Self {
        Self { allowed: false, code: Some(err.code()), reason: Some(err.to_string()), country: None }
    }

    fn bad_request(reason: String) -> Self {
        Self { allowed: false, code: Some("bad_request"), reason: Some(reason), country: None }
    }
}

pub struct Handler {
    gate: AdmissionGate,
    countries: Option<Arc<CountryIndex>>,
}

impl Handler {
    pub fn new(gate: AdmissionGate, countries: Option<Arc<CountryIndex>>) -> Self {
        Self { gate, countries }
    }

    pub async fn handle_line(&self, line: &str) -> Verdict {
        match serde_json::from_str::<Request>(line) {
            Ok(request) => self.handle(&request).await,
            Err(err) => {
                warn!(error = %err, "Malformed request line");
                Verdict::bad_request(err.to_string())
            }
        }
    }

    pub async fn handle(&self, request: &Request) -> Verdict {
        match self.evaluate(request).await {
            Ok(()) => {
                let country = self
                    .countries
                    .as_ref()
                    .and_then(|index| index.country_of(&request.ip))
                    .map(|code| code.to_string());
                Verdict::allowed(country)
            }
            Err(err) => {
                if !err.is_rejection() {
                    warn!(error = %err, ip = %request.ip, "Admission check failed");
                }
                debug!(action = ?request.action, ip = %request.ip, code = err.code(), "Request denied");
                Verdict::denied(&err)
            }
        }
    }

    async fn evaluate(&self, request: &Request) -> domains::Result<()> {
        let mut admission = AdmissionRequest::new(request.action, &request.ip);
        if let Some(board) = request.board {
            admission = admission.on_board(BoardId(board));
        }
        if let Some(account) = request.account.as_deref() {
            admission = admission.for_account(account);
        }
        if request.authenticated {
            admission = admission.authenticated();
        }

        self.gate.admit(&admission).await?;
        if let Some(value) = request.image_hash {
            self.gate.check_upload(&PerceptualHash::new(value, request.hash_kind))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    use async_trait::async_trait;
    use domains::{BanScope, CountryBlock, DnsLookup, SystemClock};
    use services::{BanRegistry, ImageBanMatcher, LimitPolicy, RateLimitPolicies, RateLimits, ReputationCache};
    use storage_adapters::{MemoryBanRepository, MemoryBannedImageRepository, MemoryBlacklistRepository};

    struct NothingListed;

    #[async_trait]
    impl DnsLookup for NothingListed {
        async fn lookup(&self, _name: &str) -> anyhow::Result<Vec<IpAddr>> {
            Ok(vec![])
        }
    }

    async fn handler() -> Handler {
        let clock = Arc::new(SystemClock);
        let policy = LimitPolicy::new(2, 60);
        let limits = Arc::new(RateLimits::new(
            RateLimitPolicies { login: policy, account: policy, registration: policy, thread: policy, post: policy },
            clock.clone(),
        ));
        let bans = Arc::new(BanRegistry::new(Arc::new(MemoryBanRepository::default()), clock.clone()));
        bans.insert("192.0.2.0/24", BanScope::Global, 3600).await.unwrap();

        let reputation = Arc::new(ReputationCache::new(
            Arc::new(NothingListed),
            Arc::new(MemoryBlacklistRepository::default()),
            clock,
        ));
        let images = Arc::new(ImageBanMatcher::new(Arc::new(MemoryBannedImageRepository::default()), 16));
        images.add_banned_hash(0xFF00).await.unwrap();

        let countries = Arc::new(CountryIndex::new(Arc::new(storage_adapters::ZoneDirectory::new("/nonexistent"))));
        countries.load([CountryBlock { network: "203.0.113.0/24".parse().unwrap(), country: "fr".into() }]);

        Handler::new(AdmissionGate::new(limits, bans, reputation, images), Some(countries))
    }

    #[tokio::test]
    async fn test_allowed_request_carries_country() {
        let handler = handler().await;
        let verdict = handler.handle_line(r#"{"action":"new_post","ip":"203.0.113.9","board":3}"#).await;
        assert_eq!(verdict, Verdict::allowed(Some("fr".into())));
        assert_eq!(serde_json::to_string(&verdict).unwrap(), r#"{"allowed":true,"country":"fr"}"#);
    }

    #[tokio::test]
    async fn test_banned_request() {
        let handler = handler().await;
        let verdict = handler.handle_line(r#"{"action":"new_thread","ip":"192.0.2.1","board":1}"#).await;
        assert!(!verdict.allowed);
        assert_eq!(verdict.code, Some("banned"));
    }

    #[tokio::test]
    async fn test_banned_image_hash() {
        let handler = handler().await;
        let verdict = handler
            .handle_line(r#"{"action":"new_post","ip":"198.51.100.1","image_hash":65281}"#)
            .await;
        assert_eq!(verdict.code, Some("image_banned"));

        let other_kind = handler
            .handle_line(r#"{"action":"new_post","ip":"198.51.100.2","image_hash":65281,"hash_kind":"difference"}"#)
            .await;
        assert!(other_kind.allowed);
    }

    #[tokio::test]
    async fn test_malformed_lines() {
        let handler = handler().await;
        assert_eq!(handler.handle_line("not json").await.code, Some("bad_request"));
        assert_eq!(handler.handle_line(r#"{"action":"dance","ip":"1.2.3.4"}"#).await.code, Some("bad_request"));
        assert_eq!(
            handler.handle_line(r#"{"action":"login","ip":"1.2.3"}"#).await.code,
            Some("invalid_address")
        );
    }

    #[tokio::test]
    async fn test_rate_limit_over_the_wire() {
        let handler = handler().await;
        let line = r#"{"action":"login","ip":"198.51.100.7"}"#;
        assert!(handler.handle_line(line).await.allowed);
        assert!(handler.handle_line(line).await.allowed);
        assert_eq!(handler.handle_line(line).await.code, Some("rate_limited"));
    }
}
