//! Shared fixtures for the end-to-end tests in `tests/`.

use std::collections::HashSet;
use std::io::Cursor;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use uuid::Uuid;

use domains::{BanEntry, BanScope, DnsLookup};

/// DNS double answering `127.0.0.2` for a fixed set of names and counting
/// every query it receives.
#[derive(Default)]
pub struct ScriptedDns {
    listed: HashSet<String>,
    failing: HashSet<String>,
    queries: AtomicUsize,
}

impl ScriptedDns {
    pub fn listing(names: &[&str]) -> Self {
        Self { listed: names.iter().map(|n| n.to_string()).collect(), ..Self::default() }
    }

    /// Makes queries for `name` fail as a transient error.
    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_owned());
        self
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DnsLookup for ScriptedDns {
    async fn lookup(&self, name: &str) -> anyhow::Result<Vec<IpAddr>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(name) {
            anyhow::bail!("SERVFAIL for {name}");
        }
        if self.listed.contains(name) {
            return Ok(vec![IpAddr::from([127, 0, 0, 2])]);
        }
        Ok(vec![])
    }
}

pub fn ban_entry(network: &str, scope: BanScope, created_at: DateTime<Utc>) -> BanEntry {
    BanEntry {
        id: Uuid::new_v4(),
        network: network.parse().expect("valid test network"),
        scope,
        created_at,
        expiry: created_at + TimeDelta::hours(1),
    }
}

/// PNG of a `size`×`size` grayscale image split into a dark left half and
/// a light right half.
pub fn split_png(size: u32, dark: u8, light: u8) -> Vec<u8> {
    let image = GrayImage::from_fn(size, size, |x, _| Luma([if x < size / 2 { dark } else { light }]));
    encode_png(image)
}

/// PNG of a `size`×`size` image with a dark top half and a light bottom half.
pub fn stacked_png(size: u32, dark: u8, light: u8) -> Vec<u8> {
    let image = GrayImage::from_fn(size, size, |_, y| Luma([if y < size / 2 { dark } else { light }]));
    encode_png(image)
}

fn encode_png(image: GrayImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageLuma8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("in-memory PNG encoding");
    bytes
}
