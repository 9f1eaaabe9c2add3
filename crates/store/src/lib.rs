//! Namespaced keyed-JSON document store over sled.
//!
//! The engine persists every model as a JSON document under a string key.
//! Collections isolate key prefixes so graphs, instances, schedules and tasks
//! do not collide, and they nest: `graphs` holds one sub-collection per graph
//! name whose keys are revision numbers. A put is durable (flushed to disk)
//! before it returns; nothing is transactional across keys.
//!
//! Key layout matches the persisted contract: a collection named `c` stores
//! document `k` under `c=k`, so nested keys read like `graphs=g1=0`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use thiserror::Error;
use tracing::trace;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the document store.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying sled database failed.
    #[error("store backend error: {0}")]
    Backend(#[from] sled::Error),

    /// A document could not be encoded or decoded.
    #[error("store codec error for key '{key}': {source}")]
    Codec {
        /// The key whose document failed to round-trip.
        key: String,
        /// Underlying serde error.
        source: serde_json::Error,
    },

    /// Collection names may not contain the key separator characters.
    #[error("collection name '{name}' may not contain '<', '=' or '>'")]
    InvalidCollectionName {
        /// The rejected name.
        name: String,
    },

    /// A stored key was not valid UTF-8.
    #[error("store holds a non-utf8 key under prefix '{prefix}'")]
    CorruptKey {
        /// Prefix being iterated when the key was found.
        prefix: String,
    },
}

/// Separator between a collection name and the keys inside it.
const SEP: char = '=';

/// A sled-backed document store.
///
/// Cloning is cheap; all clones share the same database handle.
#[derive(Clone)]
pub struct Store {
    db: sled::Db,
}

impl Store {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if sled cannot open the path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// An in-memory store for tests.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if sled cannot set up the temporary tree.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Isolate a key prefix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCollectionName`] if `name` contains separator
    /// characters.
    pub fn collection(&self, name: &str) -> Result<Collection> {
        Collection::new(self.db.clone(), String::new(), name)
    }
}

/// A view over one key prefix of the store.
#[derive(Clone)]
pub struct Collection {
    db: sled::Db,
    prefix: String,
}

impl Collection {
    fn new(db: sled::Db, outer_prefix: String, name: &str) -> Result<Self> {
        if name.contains(['<', '=', '>']) {
            return Err(Error::InvalidCollectionName {
                name: name.to_string(),
            });
        }
        Ok(Self {
            db,
            prefix: format!("{outer_prefix}{name}{SEP}"),
        })
    }

    /// A nested view, e.g. the revisions of one graph name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCollectionName`] if `name` contains separator
    /// characters.
    pub fn collection(&self, name: &str) -> Result<Collection> {
        Self::new(self.db.clone(), self.prefix.clone(), name)
    }

    /// Read and decode the document under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] on a sled failure or [`Error::Codec`] if
    /// the stored bytes do not decode as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let full_key = self.full_key(key);
        let Some(bytes) = self.db.get(&full_key)? else {
            return Ok(None);
        };
        let doc = serde_json::from_slice(&bytes).map_err(|source| Error::Codec {
            key: full_key,
            source,
        })?;
        Ok(Some(doc))
    }

    /// Encode and write `doc` under `key`, flushing before returning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if encoding fails or [`Error::Backend`] if
    /// the write or flush fails.
    pub fn put<T: Serialize>(&self, key: &str, doc: &T) -> Result<()> {
        let full_key = self.full_key(key);
        let bytes = serde_json::to_vec(doc).map_err(|source| Error::Codec {
            key: full_key.clone(),
            source,
        })?;
        self.db.insert(full_key.as_bytes(), bytes)?;
        self.db.flush()?;
        trace!(key = %full_key, "stored document");
        Ok(())
    }

    /// Remove the document under `key`, flushing before returning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the removal or flush fails.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.db.remove(self.full_key(key).as_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    /// Iterate every `(key, document)` pair in this collection, in key order.
    /// Keys of nested collections come back with their inner separators,
    /// e.g. `g1=0` when iterating `graphs`.
    pub fn iterate<T: DeserializeOwned>(
        &self,
    ) -> impl Iterator<Item = Result<(String, T)>> + use<T> {
        let prefix = self.prefix.clone();
        self.db
            .scan_prefix(prefix.as_bytes())
            .map(move |entry| match entry {
                Ok((key_bytes, value)) => {
                    let key = decode_key(&prefix, &key_bytes)?;
                    let doc =
                        serde_json::from_slice(&value).map_err(|source| Error::Codec {
                            key: format!("{prefix}{key}"),
                            source,
                        })?;
                    Ok((key, doc))
                }
                Err(err) => Err(Error::Backend(err)),
            })
    }

    /// Iterate the keys of this collection, in order, without decoding
    /// values.
    pub fn keys(&self) -> impl Iterator<Item = Result<String>> + use<> {
        let prefix = self.prefix.clone();
        self.db
            .scan_prefix(prefix.as_bytes())
            .map(move |entry| match entry {
                Ok((key_bytes, _)) => decode_key(&prefix, &key_bytes),
                Err(err) => Err(Error::Backend(err)),
            })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

fn decode_key(prefix: &str, key_bytes: &[u8]) -> Result<String> {
    let full = std::str::from_utf8(key_bytes).map_err(|_| Error::CorruptKey {
        prefix: prefix.to_string(),
    })?;
    Ok(full[prefix.len()..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Doc {
        value: i64,
    }

    fn store() -> Store {
        Store::temporary().unwrap()
    }

    #[test]
    fn test_put_get_delete() {
        let tasks = store().collection("tasks").unwrap();
        assert!(tasks.get::<Doc>("t1").unwrap().is_none());

        tasks.put("t1", &Doc { value: 1 }).unwrap();
        assert_eq!(tasks.get::<Doc>("t1").unwrap(), Some(Doc { value: 1 }));

        tasks.put("t1", &Doc { value: 2 }).unwrap();
        assert_eq!(tasks.get::<Doc>("t1").unwrap(), Some(Doc { value: 2 }));

        tasks.delete("t1").unwrap();
        assert!(tasks.get::<Doc>("t1").unwrap().is_none());
    }

    #[test]
    fn test_collections_do_not_collide() {
        let db = store();
        let graphs = db.collection("graphs").unwrap();
        let instances = db.collection("instances").unwrap();

        graphs.put("x", &Doc { value: 1 }).unwrap();
        instances.put("x", &Doc { value: 2 }).unwrap();

        assert_eq!(graphs.get::<Doc>("x").unwrap(), Some(Doc { value: 1 }));
        assert_eq!(instances.get::<Doc>("x").unwrap(), Some(Doc { value: 2 }));
    }

    #[test]
    fn test_nested_collection_keys() {
        let db = store();
        let graphs = db.collection("graphs").unwrap();
        let g1 = graphs.collection("g1").unwrap();
        let g2 = graphs.collection("g2").unwrap();

        g1.put("0", &Doc { value: 10 }).unwrap();
        g1.put("1", &Doc { value: 11 }).unwrap();
        g2.put("0", &Doc { value: 20 }).unwrap();

        let inner: Vec<(String, Doc)> = g1.iterate().collect::<Result<_>>().unwrap();
        assert_eq!(inner.len(), 2);
        assert_eq!(inner[0].0, "0");
        assert_eq!(inner[1].0, "1");

        // The parent view sees nested keys with their inner separator.
        let outer: Vec<String> = graphs.keys().collect::<Result<_>>().unwrap();
        assert_eq!(outer, vec!["g1=0", "g1=1", "g2=0"]);
    }

    #[test]
    fn test_invalid_collection_name() {
        assert!(matches!(
            store().collection("bad=name"),
            Err(Error::InvalidCollectionName { .. })
        ));
    }

    #[test]
    fn test_durability_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = Store::open(dir.path()).unwrap();
            db.collection("tasks")
                .unwrap()
                .put("t1", &Doc { value: 42 })
                .unwrap();
        }
        let db = Store::open(dir.path()).unwrap();
        assert_eq!(
            db.collection("tasks").unwrap().get::<Doc>("t1").unwrap(),
            Some(Doc { value: 42 })
        );
    }
}
