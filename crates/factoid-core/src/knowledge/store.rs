//! In-memory factoid store: canonical entries plus the alias table.
//!
//! ## Data model
//!
//! | Mapping    | Key          | Value          |
//! |------------|--------------|----------------|
//! | `factoids` | canonical key| body text      |
//! | `aliases`  | alias key    | canonical key  |
//!
//! An alias key never exists as a canonical key at the same time, and every
//! alias points directly at a canonical key. The store itself does no locking;
//! callers hold the shared `RwLock` around it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Number of alias redirections [`FactoidStore::resolve`] follows before giving up.
///
/// Aliases always point at canonical keys, so one hop is enough. A longer chain
/// means the state was edited outside the admin commands and is reported as
/// not found rather than chased.
pub const MAX_ALIAS_HOPS: usize = 1;

/// Canonical factoids and their aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactoidStore {
    #[serde(default)]
    factoids: HashMap<String, String>,
    #[serde(default)]
    aliases: HashMap<String, String>,
}

impl FactoidStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from raw mappings (used by persistence on load).
    pub fn from_parts(factoids: HashMap<String, String>, aliases: HashMap<String, String>) -> Self {
        Self { factoids, aliases }
    }

    /// Returns the body stored under the canonical `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.factoids.get(key).map(String::as_str)
    }

    /// Returns the canonical key the alias `key` points at.
    pub fn get_alias(&self, key: &str) -> Option<&str> {
        self.aliases.get(key).map(String::as_str)
    }

    pub fn contains_factoid(&self, key: &str) -> bool {
        self.factoids.contains_key(key)
    }

    pub fn contains_alias(&self, key: &str) -> bool {
        self.aliases.contains_key(key)
    }

    /// Inserts or replaces a canonical entry. Returns the previous body.
    pub fn set(&mut self, key: impl Into<String>, body: impl Into<String>) -> Option<String> {
        let key = key.into();
        let prev = self.factoids.insert(key.clone(), body.into());
        tracing::debug!(
            target: "factoid::store",
            key = %key,
            action = if prev.is_some() { "UPDATE" } else { "INSERT" },
            "factoid stored"
        );
        prev
    }

    /// Removes a canonical entry. Aliases are left alone; see [`Self::delete_cascade`].
    pub fn delete(&mut self, key: &str) -> Option<String> {
        self.factoids.remove(key)
    }

    /// Points `alias` at `canonical`. Returns the previous target.
    pub fn set_alias(&mut self, alias: impl Into<String>, canonical: impl Into<String>) -> Option<String> {
        self.aliases.insert(alias.into(), canonical.into())
    }

    pub fn delete_alias(&mut self, alias: &str) -> Option<String> {
        self.aliases.remove(alias)
    }

    /// Removes a canonical entry together with every alias pointing at it.
    /// Returns the removed aliases, sorted.
    pub fn delete_cascade(&mut self, key: &str) -> Option<Vec<String>> {
        self.factoids.remove(key)?;
        let mut removed: Vec<String> = self
            .aliases
            .iter()
            .filter(|(_, target)| target.as_str() == key)
            .map(|(alias, _)| alias.clone())
            .collect();
        for alias in &removed {
            self.aliases.remove(alias);
        }
        removed.sort();
        Some(removed)
    }

    /// Moves the body of `old` to `new` and repoints every alias of `old`.
    /// Returns false (and changes nothing) when `old` is not canonical.
    /// Conflict checks on `new` are the caller's job.
    pub fn rename(&mut self, old: &str, new: &str) -> bool {
        let Some(body) = self.factoids.remove(old) else {
            return false;
        };
        self.factoids.insert(new.to_string(), body);
        for target in self.aliases.values_mut() {
            if target == old {
                *target = new.to_string();
            }
        }
        true
    }

    /// Follows `key` to its canonical entry. Returns `(body, canonical_key)`.
    pub fn resolve(&self, key: &str) -> Option<(&str, &str)> {
        let mut current = key;
        for hop in 0..=MAX_ALIAS_HOPS {
            if let Some((name, body)) = self.factoids.get_key_value(current) {
                return Some((body.as_str(), name.as_str()));
            }
            let next = self.aliases.get(current)?;
            if hop == MAX_ALIAS_HOPS {
                tracing::warn!(
                    target: "factoid::store",
                    key = %key,
                    via = %current,
                    next = %next,
                    "alias chain longer than {} hop(s); treating as not found",
                    MAX_ALIAS_HOPS
                );
                return None;
            }
            current = next.as_str();
        }
        None
    }

    /// Canonical entries as `(key, body)`. Order is not guaranteed.
    pub fn factoids(&self) -> impl Iterator<Item = (&str, &str)> {
        self.factoids.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Alias entries as `(alias, canonical_key)`. Order is not guaranteed.
    pub fn aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn factoid_count(&self) -> usize {
        self.factoids.len()
    }

    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }
}
