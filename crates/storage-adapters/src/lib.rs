//! # storage-adapters
//!
//! Concrete implementations of the `domains` ports: in-memory repositories
//! seeded from a JSON snapshot, DNS resolvers, perceptual image hashers and
//! the zone-file country source.

pub mod dns;
pub mod image_hash;
pub mod memory;
pub mod snapshot;
pub mod zones;

#[cfg(feature = "spam-dnsbl")]
pub use dns::HickoryLookup;
pub use dns::SystemLookup;
pub use image_hash::{AverageHasher, DifferenceHasher};
pub use memory::{MemoryBanRepository, MemoryBannedImageRepository, MemoryBlacklistRepository};
pub use snapshot::Snapshot;
pub use zones::ZoneDirectory;
