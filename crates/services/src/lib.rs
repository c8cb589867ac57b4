//! # services
//!
//! Admission-control logic for the board: network bans, DNS blacklists,
//! rate limits and banned-image matching, composed by [`AdmissionGate`].
//! Everything here talks to the outside world through `domains` ports.

pub mod admission;
pub mod ban_registry;
pub mod cidr_trie;
pub mod geo;
pub mod image_ban;
pub mod rate_limit;
pub mod refresh;
pub mod reputation;

pub use admission::{Action, AdmissionGate, AdmissionRequest};
pub use ban_registry::BanRegistry;
pub use cidr_trie::PrefixTrie;
pub use geo::CountryIndex;
pub use image_ban::{ImageBanMatcher, DEFAULT_IMAGE_THRESHOLD};
pub use rate_limit::{LimitPolicy, RateLimitPolicies, RateLimiter, RateLimits};
pub use refresh::Refresher;
pub use reputation::{query_name, ReputationCache, DEFAULT_LOOKUP_TIMEOUT, DEFAULT_RETENTION_SECS};
