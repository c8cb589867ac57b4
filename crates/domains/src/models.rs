//! # Domain Models
//!
//! Value types shared by every stage of the admission pipeline.
//! Identifiers are UUID v4, assigned when an entry is created.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{DomainError, Result};

/// Numeric identifier of a board (e.g. /b/ is board 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoardId(pub u32);

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "board#{}", self.0)
    }
}

/// Where a ban applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanScope {
    Global,
    Board(BoardId),
}

impl fmt::Display for BanScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Board(id) => id.fmt(f),
        }
    }
}

/// An IPv4 or IPv6 network: base address plus prefix length.
///
/// The base address is always stored with host bits cleared, so
/// `10.1.2.3/8` and `10.0.0.0/8` are the same network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cidr {
    network: IpAddr,
    prefix_len: u8,
}

impl Cidr {
    /// IPv4-mapped IPv6 prefixes of /96 or longer become the equivalent
    /// IPv4 prefix; shorter ones are rejected, since queries are always
    /// matched in their IPv4 form.
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self> {
        let (addr, prefix_len) = match addr {
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) if (96..=128).contains(&prefix_len) => (IpAddr::V4(v4), prefix_len - 96),
                Some(_) => return Err(DomainError::InvalidAddress(format!("{addr}/{prefix_len}"))),
                None => (addr, prefix_len),
            },
            IpAddr::V4(_) => (addr, prefix_len),
        };
        let (bits, width) = address_bits(addr);
        if prefix_len > width {
            return Err(DomainError::InvalidAddress(format!("{addr}/{prefix_len}")));
        }
        Ok(Self {
            network: address_from_bits(bits & prefix_mask(prefix_len, width), width),
            prefix_len,
        })
    }

    /// A single-address network (/32 or /128). IPv4-mapped IPv6 input
    /// becomes plain IPv4.
    pub fn host(addr: IpAddr) -> Self {
        let addr = addr.to_canonical();
        let (_, width) = address_bits(addr);
        Self { network: addr, prefix_len: width }
    }

    /// Parses `a.b.c.d/n`, falling back to a bare address as a host network.
    pub fn parse_lenient(input: &str) -> Result<Self> {
        let input = input.trim();
        if let Ok(cidr) = input.parse::<Cidr>() {
            return Ok(cidr);
        }
        input
            .parse::<IpAddr>()
            .map(Self::host)
            .map_err(|_| DomainError::InvalidAddress(input.to_string()))
    }

    pub fn network(&self) -> IpAddr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn is_ipv4(&self) -> bool {
        self.network.is_ipv4()
    }

    /// Network bits, left-aligned within the address width.
    pub fn bits(&self) -> (u128, u8) {
        address_bits(self.network)
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        let addr = addr.to_canonical();
        if addr.is_ipv4() != self.is_ipv4() {
            return false;
        }
        let (bits, width) = address_bits(addr);
        let (network, _) = self.bits();
        bits & prefix_mask(self.prefix_len, width) == network
    }
}

impl FromStr for Cidr {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || DomainError::InvalidAddress(s.to_string());
        let (addr, len) = s.trim().split_once('/').ok_or_else(invalid)?;
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        let len: u8 = len.parse().map_err(|_| invalid())?;
        Cidr::new(addr, len)
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl TryFrom<String> for Cidr {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self> {
        Cidr::parse_lenient(&value)
    }
}

impl From<Cidr> for String {
    fn from(value: Cidr) -> Self {
        value.to_string()
    }
}

/// Returns the address as an integer together with its bit width (32 or 128).
pub fn address_bits(addr: IpAddr) -> (u128, u8) {
    match addr {
        IpAddr::V4(v4) => (u128::from(u32::from(v4)), 32),
        IpAddr::V6(v6) => (u128::from(v6), 128),
    }
}

fn address_from_bits(bits: u128, width: u8) -> IpAddr {
    if width == 32 {
        IpAddr::V4(Ipv4Addr::from(bits as u32))
    } else {
        IpAddr::V6(Ipv6Addr::from(bits))
    }
}

fn prefix_mask(prefix_len: u8, width: u8) -> u128 {
    let full = if width >= 128 { u128::MAX } else { (1u128 << width) - 1 };
    match prefix_len {
        0 => 0,
        n if n >= width => full,
        n => full & !(full >> n),
    }
}

/// Represents a moderation action against a network.
///
/// `expiry` is recorded and shown to operators; containment checks do not
/// consult it. A ban stays in force until it is removed by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanEntry {
    pub id: Uuid,
    pub network: Cidr,
    pub scope: BanScope,
    pub created_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
}

impl BanEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }
}

/// A third-party DNS reputation list, e.g. `zen.spamhaus.org`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    /// DNS suffix appended to the reversed address. Unique.
    pub host: String,
    #[serde(default)]
    pub disabled: bool,
    /// Skip this list for read-only requests.
    #[serde(default)]
    pub allow_read: bool,
}

impl BlacklistEntry {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into(), disabled: false, allow_read: false }
    }

    /// Whether this list must be consulted for a request of the given kind.
    pub fn applies_to(&self, read_only: bool) -> bool {
        !self.disabled && !(self.allow_read && read_only)
    }
}

/// Perceptual hashing algorithm a hash was produced with. Hashes of
/// different kinds are never compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashKind {
    #[default]
    Average,
    Difference,
}

/// A 64-bit perceptual fingerprint of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PerceptualHash {
    pub value: u64,
    #[serde(default)]
    pub kind: HashKind,
}

impl PerceptualHash {
    pub fn new(value: u64, kind: HashKind) -> Self {
        Self { value, kind }
    }

    /// Hamming distance, or `None` when the algorithms differ.
    pub fn distance(&self, other: &PerceptualHash) -> Option<u32> {
        (self.kind == other.kind).then(|| (self.value ^ other.value).count_ones())
    }
}

/// One network block of a country's address allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryBlock {
    pub network: Cidr,
    /// ISO 3166-1 alpha-2, lowercase (e.g. "fr").
    pub country: String,
}
