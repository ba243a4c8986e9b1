//! Wildcard Interface Matchers
//!
//! A wildcard name (`prefix#`) registered against a group becomes a matcher
//! that binds interfaces to the group as they appear on the host. Matchers
//! are indexed by prefix bit-length so that every matcher sharing a name
//! prefix can be found with one probe per candidate length.

use crate::group::{Mode, RelayType};
use std::collections::BTreeMap;

/// Wildcard suffix marking a name prefix
pub const WILDCARD: char = '#';

/// Strip the wildcard suffix, returning the prefix of a wildcard name
pub fn wildcard_prefix(name: &str) -> Option<&str> {
    name.strip_suffix(WILDCARD)
}

/// Role a matched interface plays in its group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Push source (or plain member of a mesh group)
    Source,
    /// Push destination (or plain member of a mesh group)
    Destination,
}

/// Link state seen on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    /// Link name
    pub name: String,
    /// Stable link index
    pub index: u32,
    /// Whether the link is up
    pub up: bool,
}

impl LinkInfo {
    /// Create a link description
    pub fn new(name: impl Into<String>, index: u32, up: bool) -> Self {
        LinkInfo {
            name: name.into(),
            index,
            up,
        }
    }
}

/// Wildcard rule binding a name prefix to a group role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceMatcher {
    prefix: String,
    group: String,
    role: Role,
    mode: Mode,
    relay_type: RelayType,
}

impl InterfaceMatcher {
    /// Create a matcher
    pub fn new(prefix: &str, group: &str, role: Role, mode: Mode, relay_type: RelayType) -> Self {
        InterfaceMatcher {
            prefix: prefix.to_string(),
            group: group.to_string(),
            role,
            mode,
            relay_type,
        }
    }

    /// Name prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Owning group name (the template name for source matchers)
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Role of matched interfaces
    pub fn role(&self) -> Role {
        self.role
    }

    /// Mode mirrored from the owning group
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Relay type mirrored from the owning group
    pub fn relay_type(&self) -> RelayType {
        self.relay_type
    }

    /// Prefix length in bits
    pub fn bit_len(&self) -> usize {
        self.prefix.len() * 8
    }

    /// Check whether `name` carries this matcher's prefix
    pub fn matches(&self, name: &str) -> bool {
        name.starts_with(&self.prefix)
    }

    fn same_rule(&self, other: &InterfaceMatcher) -> bool {
        self.prefix == other.prefix && self.group == other.group && self.role == other.role
    }
}

/// Outcome of inserting a matcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherInsert {
    /// New matcher stored
    Inserted,
    /// Equivalent matcher existed; mode and relay type refreshed
    Updated,
}

/// Prefix-searchable matcher index
#[derive(Debug, Clone, Default)]
pub struct MatcherTable {
    by_bits: BTreeMap<usize, BTreeMap<String, Vec<InterfaceMatcher>>>,
    count: usize,
}

impl MatcherTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a matcher, or update an equivalent one in place
    pub fn insert(&mut self, matcher: InterfaceMatcher) -> MatcherInsert {
        let bucket = self
            .by_bits
            .entry(matcher.bit_len())
            .or_default()
            .entry(matcher.prefix.clone())
            .or_default();

        if let Some(existing) = bucket.iter_mut().find(|m| m.same_rule(&matcher)) {
            existing.mode = matcher.mode;
            existing.relay_type = matcher.relay_type;
            return MatcherInsert::Updated;
        }

        bucket.push(matcher);
        self.count += 1;
        MatcherInsert::Inserted
    }

    /// All matchers registered with exactly this prefix
    pub fn with_prefix(&self, prefix: &str) -> &[InterfaceMatcher] {
        self.by_bits
            .get(&(prefix.len() * 8))
            .and_then(|by_prefix| by_prefix.get(prefix))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every matcher whose prefix matches `name`, longest prefix first
    pub fn matching(&self, name: &str) -> Vec<&InterfaceMatcher> {
        let mut found = Vec::new();
        for (&bits, by_prefix) in self.by_bits.iter().rev() {
            let len = bits / 8;
            if len > name.len() || !name.is_char_boundary(len) {
                continue;
            }
            if let Some(bucket) = by_prefix.get(&name[..len]) {
                found.extend(bucket.iter());
            }
        }
        found
    }

    /// First matcher under the longest prefix matching `name`
    pub fn longest_match(&self, name: &str) -> Option<&InterfaceMatcher> {
        self.matching(name).into_iter().next()
    }

    /// Remove every matcher owned by `group`
    pub fn remove_group(&mut self, group: &str) -> usize {
        let mut removed = 0;
        for by_prefix in self.by_bits.values_mut() {
            for bucket in by_prefix.values_mut() {
                let before = bucket.len();
                bucket.retain(|m| m.group != group);
                removed += before - bucket.len();
            }
            by_prefix.retain(|_, bucket| !bucket.is_empty());
        }
        self.by_bits.retain(|_, by_prefix| !by_prefix.is_empty());
        self.count -= removed;
        removed
    }

    /// Iterate over all matchers
    pub fn iter(&self) -> impl Iterator<Item = &InterfaceMatcher> {
        self.by_bits
            .values()
            .flat_map(|by_prefix| by_prefix.values())
            .flat_map(|bucket| bucket.iter())
    }

    /// Number of matchers
    pub fn len(&self) -> usize {
        self.count
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
