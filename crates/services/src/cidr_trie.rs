//! # PrefixTrie
//!
//! Binary radix trie keyed by address bits, one root per address family.
//!
//! Children are reference-counted so a cloned trie shares every node with
//! its source. Mutating the clone copies only the nodes on the touched path
//! (`Arc::make_mut`), which keeps copy-on-write publication cheap.

use std::net::IpAddr;
use std::sync::Arc;

use domains::{address_bits, Cidr};

#[derive(Debug, Clone)]
struct Node<V> {
    value: Option<V>,
    children: [Option<Arc<Node<V>>>; 2],
}

impl<V> Default for Node<V> {
    fn default() -> Self {
        Self { value: None, children: [None, None] }
    }
}

impl<V> Node<V> {
    fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.iter().all(Option::is_none)
    }
}

#[derive(Debug, Clone)]
pub struct PrefixTrie<V> {
    v4: Arc<Node<V>>,
    v6: Arc<Node<V>>,
    len: usize,
}

impl<V> Default for PrefixTrie<V> {
    fn default() -> Self {
        Self { v4: Arc::default(), v6: Arc::default(), len: 0 }
    }
}

/// Bit `depth` of `bits`, counting from the most significant bit of `width`.
fn bit_at(bits: u128, width: u8, depth: u8) -> usize {
    ((bits >> (width - 1 - depth)) & 1) as usize
}

impl<V: Clone> PrefixTrie<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of prefixes holding a value.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn root(&self, v4: bool) -> &Node<V> {
        if v4 {
            &self.v4
        } else {
            &self.v6
        }
    }

    fn root_mut(&mut self, v4: bool) -> &mut Arc<Node<V>> {
        if v4 {
            &mut self.v4
        } else {
            &mut self.v6
        }
    }

    /// Stores `value` at exactly `cidr`, returning the value it replaced.
    pub fn insert(&mut self, cidr: Cidr, value: V) -> Option<V> {
        let (bits, width) = cidr.bits();
        let mut node = Arc::make_mut(self.root_mut(cidr.is_ipv4()));
        for depth in 0..cidr.prefix_len() {
            let slot = &mut node.children[bit_at(bits, width, depth)];
            node = Arc::make_mut(slot.get_or_insert_with(Arc::default));
        }
        let previous = node.value.replace(value);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Value stored at exactly `cidr`. Wider or narrower prefixes do not match.
    pub fn get(&self, cidr: Cidr) -> Option<&V> {
        let (bits, width) = cidr.bits();
        let mut node = self.root(cidr.is_ipv4());
        for depth in 0..cidr.prefix_len() {
            node = node.children[bit_at(bits, width, depth)].as_deref()?;
        }
        node.value.as_ref()
    }

    /// Removes the value stored at exactly `cidr` and prunes empty branches.
    pub fn remove(&mut self, cidr: Cidr) -> Option<V> {
        // Avoid copying shared nodes for a prefix that is not there.
        self.get(cidr)?;
        let (bits, width) = cidr.bits();
        let removed = remove_at(self.root_mut(cidr.is_ipv4()), bits, width, 0, cidr.prefix_len());
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    /// True if any stored prefix contains `addr`.
    pub fn contains(&self, addr: IpAddr) -> bool {
        let addr = addr.to_canonical();
        let (bits, width) = address_bits(addr);
        let mut node = self.root(addr.is_ipv4());
        for depth in 0..width {
            if node.value.is_some() {
                return true;
            }
            match node.children[bit_at(bits, width, depth)].as_deref() {
                Some(child) => node = child,
                None => return false,
            }
        }
        node.value.is_some()
    }

    /// The most specific stored prefix containing `addr`, as (prefix length, value).
    pub fn longest_match(&self, addr: IpAddr) -> Option<(u8, &V)> {
        let addr = addr.to_canonical();
        let (bits, width) = address_bits(addr);
        let mut node = self.root(addr.is_ipv4());
        let mut best = node.value.as_ref().map(|v| (0, v));
        for depth in 0..width {
            match node.children[bit_at(bits, width, depth)].as_deref() {
                Some(child) => {
                    node = child;
                    if let Some(value) = &node.value {
                        best = Some((depth + 1, value));
                    }
                }
                None => break,
            }
        }
        best
    }
}

fn remove_at<V: Clone>(
    slot: &mut Arc<Node<V>>,
    bits: u128,
    width: u8,
    depth: u8,
    prefix_len: u8,
) -> Option<V> {
    let node = Arc::make_mut(slot);
    if depth == prefix_len {
        return node.value.take();
    }
    let idx = bit_at(bits, width, depth);
    let child = node.children[idx].as_mut()?;
    let removed = remove_at(child, bits, width, depth + 1, prefix_len);
    if node.children[idx].as_ref().is_some_and(|c| c.is_empty()) {
        node.children[idx] = None;
    }
    removed
}

impl<V: Clone> FromIterator<(Cidr, V)> for PrefixTrie<V> {
    fn from_iter<I: IntoIterator<Item = (Cidr, V)>>(iter: I) -> Self {
        let mut trie = Self::new();
        for (cidr, value) in iter {
            trie.insert(cidr, value);
        }
        trie
    }
}
