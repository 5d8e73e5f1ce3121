//! Generic typed sled tree wrapper.
//!
//! [`TypedTree<T>`] serializes values with bincode on write and
//! deserializes on read. Keys are raw bytes; the message stores use
//! fixed-width 20-byte ids and the properties store uses short strings,
//! so sled's lexicographic order matches the domain order directly.

use ledgermail_types::{MailError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A sled tree with bincode-typed values.
pub(crate) struct TypedTree<T> {
    tree: sled::Tree,
    _marker: std::marker::PhantomData<T>,
}

impl<T> TypedTree<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Wraps the given sled tree.
    pub(crate) fn new(tree: sled::Tree) -> Self {
        Self {
            tree,
            _marker: std::marker::PhantomData,
        }
    }

    /// Retrieves and decodes a value by key.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    pub(crate) fn get(&self, key: &[u8]) -> Result<Option<T>> {
        let raw = self.tree.get(key).map_err(|e| MailError::Storage {
            reason: format!("sled get failed: {e}"),
        })?;

        match raw {
            None => Ok(None),
            Some(bytes) => Ok(Some(decode(&bytes)?)),
        }
    }

    /// Encodes and inserts a value.
    pub(crate) fn insert(&self, key: &[u8], value: &T) -> Result<()> {
        let encoded = bincode::serialize(value).map_err(|e| MailError::Storage {
            reason: format!("bincode serialization failed: {e}"),
        })?;

        self.tree
            .insert(key, encoded)
            .map_err(|e| MailError::Storage {
                reason: format!("sled insert failed: {e}"),
            })?;

        Ok(())
    }

    /// Removes a key from the tree.
    ///
    /// Returns `Ok(true)` if the key existed, `Ok(false)` if it did not.
    pub(crate) fn remove(&self, key: &[u8]) -> Result<bool> {
        let prev = self.tree.remove(key).map_err(|e| MailError::Storage {
            reason: format!("sled remove failed: {e}"),
        })?;
        Ok(prev.is_some())
    }

    /// Returns whether the key exists.
    pub(crate) fn contains(&self, key: &[u8]) -> Result<bool> {
        self.tree.contains_key(key).map_err(|e| MailError::Storage {
            reason: format!("sled contains failed: {e}"),
        })
    }

    /// Iterates all entries in key order, decoding lazily.
    ///
    /// Laziness matters for the archive scan: the caller observes
    /// cancellation between records instead of materializing the whole
    /// store first.
    pub(crate) fn iter(&self) -> impl Iterator<Item = Result<(Vec<u8>, T)>> {
        self.tree.iter().map(|item| {
            let (key, value) = item.map_err(|e| MailError::Storage {
                reason: format!("sled iter failed: {e}"),
            })?;
            Ok((key.to_vec(), decode(&value)?))
        })
    }

    /// Collects all entries in key order.
    pub(crate) fn entries(&self) -> Result<Vec<(Vec<u8>, T)>> {
        self.iter().collect()
    }

    /// Flushes this tree's pending writes to disk.
    pub(crate) fn flush(&self) -> Result<()> {
        self.tree.flush().map_err(|e| MailError::Storage {
            reason: format!("sled flush failed: {e}"),
        })?;
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| MailError::Storage {
        reason: format!("bincode deserialization failed: {e}"),
    })
}
