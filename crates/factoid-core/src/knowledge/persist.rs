//! Save-state collaborator: writes the two factoid mappings to durable storage
//! after every mutating admin command, and reads them back at startup.

use super::FactoidStore;
use sled::Db;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

const DEFAULT_PATH: &str = "./data/factoids";
const FACTOID_TREE: &str = "factoids";
const ALIAS_TREE: &str = "factoid_aliases";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("factoid storage error: {0}")]
    Sled(#[from] sled::Error),
}

/// Anything that can persist a snapshot of the store.
pub trait StateSaver: Send + Sync {
    fn save(&self, store: &FactoidStore) -> Result<(), PersistError>;
}

/// Discards every snapshot. For tests and embedders that persist elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSaver;

impl StateSaver for NoopSaver {
    fn save(&self, _store: &FactoidStore) -> Result<(), PersistError> {
        Ok(())
    }
}

/// Sled-backed saver with one tree for canonical entries and one for aliases.
pub struct SledStateSaver {
    db: Db,
}

impl SledStateSaver {
    /// Opens or creates the factoid DB at `./data/factoids`.
    pub fn new() -> Result<Self, PersistError> {
        Self::open_path(DEFAULT_PATH)
    }

    /// Opens or creates the factoid DB at the given path.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, PersistError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Reads both trees into a fresh store. Entries that are not UTF-8 are skipped.
    pub fn load(&self) -> Result<FactoidStore, PersistError> {
        let factoids = self.read_tree(FACTOID_TREE)?;
        let aliases = self.read_tree(ALIAS_TREE)?;
        tracing::info!(
            target: "factoid::persist",
            factoids = factoids.len(),
            aliases = aliases.len(),
            "Loaded factoid state"
        );
        Ok(FactoidStore::from_parts(factoids, aliases))
    }

    fn read_tree(&self, name: &str) -> Result<HashMap<String, String>, PersistError> {
        let tree = self.db.open_tree(name)?;
        let mut out = HashMap::new();
        for item in tree.iter() {
            let (k, v) = item?;
            match (String::from_utf8(k.to_vec()), String::from_utf8(v.to_vec())) {
                (Ok(key), Ok(value)) => {
                    out.insert(key, value);
                }
                _ => tracing::warn!(
                    target: "factoid::persist",
                    tree = name,
                    "Skipping entry that is not valid UTF-8"
                ),
            }
        }
        Ok(out)
    }

    /// Makes `name` hold exactly `entries`, in one batch.
    fn replace_tree<'a>(
        &self,
        name: &str,
        entries: impl Iterator<Item = (&'a str, &'a str)>,
    ) -> Result<(), PersistError> {
        let tree = self.db.open_tree(name)?;
        let mut batch = sled::Batch::default();
        let mut keep = std::collections::HashSet::new();
        for (k, v) in entries {
            batch.insert(k.as_bytes(), v.as_bytes());
            keep.insert(k.as_bytes().to_vec());
        }
        for key in tree.iter().keys() {
            let key = key?;
            if !keep.contains(&key[..]) {
                batch.remove(key);
            }
        }
        tree.apply_batch(batch)?;
        Ok(())
    }
}

impl StateSaver for SledStateSaver {
    fn save(&self, store: &FactoidStore) -> Result<(), PersistError> {
        self.replace_tree(FACTOID_TREE, store.factoids())?;
        self.replace_tree(ALIAS_TREE, store.aliases())?;
        self.db.flush()?;
        tracing::debug!(
            target: "factoid::persist",
            factoids = store.factoid_count(),
            aliases = store.alias_count(),
            "Saved factoid state"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_restores_store() {
        let dir = tempfile::tempdir().unwrap();
        let saver = SledStateSaver::open_path(dir.path().join("db")).unwrap();

        let mut store = FactoidStore::new();
        store.set("rust", "https://www.rust-lang.org");
        store.set("tokio", "async runtime");
        store.set_alias("rs", "rust");
        saver.save(&store).unwrap();

        assert_eq!(saver.load().unwrap(), store);
    }

    #[test]
    fn save_drops_removed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let saver = SledStateSaver::open_path(dir.path().join("db")).unwrap();

        let mut store = FactoidStore::new();
        store.set("foo", "bar");
        store.set("baz", "qux");
        store.set_alias("b", "foo");
        saver.save(&store).unwrap();

        store.delete_cascade("foo");
        saver.save(&store).unwrap();

        let loaded = saver.load().unwrap();
        assert_eq!(loaded, store);
        assert!(!loaded.contains_factoid("foo"));
        assert!(!loaded.contains_alias("b"));
    }

    #[test]
    fn load_skips_entries_that_are_not_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let saver = SledStateSaver::open_path(dir.path().join("db")).unwrap();
        let tree = saver.db.open_tree(FACTOID_TREE).unwrap();
        tree.insert("rust", "fast").unwrap();
        tree.insert(&[0xff, 0xfe][..], "broken key").unwrap();
        tree.insert("bad", &[0xc3, 0x28][..]).unwrap();

        let store = saver.load().unwrap();
        assert_eq!(store.factoid_count(), 1);
        assert_eq!(store.get("rust"), Some("fast"));
    }

    #[test]
    fn fresh_db_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let saver = SledStateSaver::open_path(dir.path().join("db")).unwrap();
        let store = saver.load().unwrap();
        assert_eq!(store.factoid_count(), 0);
        assert_eq!(store.alias_count(), 0);
    }
}
