//! Factoid knowledge base: the store, alias resolution and persistence.
//!
//! Keys are case-normalized, alphabetic-only tokens. Use [`normalize_key`] on
//! anything coming from chat before touching the store.

mod persist;
mod store;

pub use persist::{NoopSaver, PersistError, SledStateSaver, StateSaver};
pub use store::{FactoidStore, MAX_ALIAS_HOPS};

/// Lower-cases a raw key token.
#[inline]
pub fn normalize_key(raw: &str) -> String {
    raw.to_lowercase()
}

/// True when `key` is a non-empty run of ASCII letters.
#[inline]
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphabetic())
}
