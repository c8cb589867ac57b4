//! # CountryIndex
//!
//! Maps client addresses to a country code for post flags.

use std::net::IpAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::info;

use domains::{CountryBlock, CountryRepository, DomainError, Result};

use crate::cidr_trie::PrefixTrie;

/// Code used by zone lists for unallocated or reserved space.
const UNKNOWN_COUNTRY: &str = "zz";

pub struct CountryIndex {
    repo: Arc<dyn CountryRepository>,
    trie: ArcSwap<PrefixTrie<Arc<str>>>,
}

impl CountryIndex {
    pub fn new(repo: Arc<dyn CountryRepository>) -> Self {
        Self { repo, trie: ArcSwap::from_pointee(PrefixTrie::new()) }
    }

    /// Rebuilds the index from storage and publishes it in one swap.
    pub async fn refresh(&self) -> Result<usize> {
        let blocks = self.repo.load_all().await.map_err(DomainError::Storage)?;
        Ok(self.load(blocks))
    }

    pub fn load(&self, blocks: impl IntoIterator<Item = CountryBlock>) -> usize {
        let trie: PrefixTrie<Arc<str>> = blocks
            .into_iter()
            .filter(|block| !block.country.eq_ignore_ascii_case(UNKNOWN_COUNTRY))
            .map(|block| (block.network, Arc::from(block.country.to_ascii_lowercase())))
            .collect();
        let count = trie.len();
        info!(blocks = count, "Country blocks loaded");
        self.trie.store(Arc::new(trie));
        count
    }

    /// Country of the most specific block containing `ip`.
    pub fn country_of(&self, ip: &str) -> Option<Arc<str>> {
        let addr: IpAddr = ip.trim().parse().ok()?;
        let trie = self.trie.load();
        trie.longest_match(addr).map(|(_, country)| country.clone())
    }
}
