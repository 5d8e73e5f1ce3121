//! Typed facades over the four mail trees.
//!
//! Each facade fixes the key and value shape of one tree and applies
//! its flush policy: the archive and properties stores flush after
//! every mutation (write-through), while the processing and inbox
//! stores leave flushing to engine close (write-back; their mutation
//! rate is far higher).

use ledgermail_types::{EmailHeader, MailError, MessageId, Result, Timestamp};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::records::{ArchiveRecord, ProcessingRecord};
use crate::tree::TypedTree;

// ---------------------------------------------------------------------------
// ProcessingStore
// ---------------------------------------------------------------------------

/// In-flight outbound records, keyed by static message id.
pub struct ProcessingStore {
    tree: TypedTree<ProcessingRecord>,
}

impl ProcessingStore {
    pub(crate) fn new(tree: sled::Tree) -> Self {
        Self {
            tree: TypedTree::new(tree),
        }
    }

    /// Looks up a record by static id.
    pub fn get(&self, id: &MessageId) -> Result<Option<ProcessingRecord>> {
        self.tree.get(id.as_bytes())
    }

    /// Looks up a record by static id, failing if absent.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::NotFound`] if no record exists under `id`.
    pub fn fetch(&self, id: &MessageId) -> Result<ProcessingRecord> {
        self.get(id)?.ok_or(MailError::NotFound { id: *id })
    }

    /// Stores a record under its static id, overwriting any previous
    /// version.
    pub fn insert(&self, record: &ProcessingRecord) -> Result<()> {
        self.tree.insert(record.id.as_bytes(), record)
    }

    /// Removes a record; returns whether it existed.
    pub fn remove(&self, id: &MessageId) -> Result<bool> {
        self.tree.remove(id.as_bytes())
    }

    /// Returns all records in key order.
    pub fn records(&self) -> Result<Vec<ProcessingRecord>> {
        Ok(self
            .tree
            .entries()?
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }

    /// Flushes pending writes; called on engine close.
    pub fn flush(&self) -> Result<()> {
        self.tree.flush()
    }
}

// ---------------------------------------------------------------------------
// ArchiveStore
// ---------------------------------------------------------------------------

/// Finalized and fetched messages, keyed by final content id.
pub struct ArchiveStore {
    tree: TypedTree<ArchiveRecord>,
}

impl ArchiveStore {
    pub(crate) fn new(tree: sled::Tree) -> Self {
        Self {
            tree: TypedTree::new(tree),
        }
    }

    /// Looks up a record by id.
    pub fn get(&self, id: &MessageId) -> Result<Option<ArchiveRecord>> {
        self.tree.get(id.as_bytes())
    }

    /// Returns whether a record exists under `id`.
    pub fn contains(&self, id: &MessageId) -> Result<bool> {
        self.tree.contains(id.as_bytes())
    }

    /// Stores a record under `id` and flushes.
    ///
    /// The key is passed explicitly because the fetch path archives
    /// under the server's inventory id, which for a well-behaved server
    /// equals `record.id`.
    pub fn insert(&self, id: &MessageId, record: &ArchiveRecord) -> Result<()> {
        self.tree.insert(id.as_bytes(), record)?;
        self.tree.flush()
    }

    /// Removes a record and flushes; returns whether it existed.
    pub fn remove(&self, id: &MessageId) -> Result<bool> {
        let existed = self.tree.remove(id.as_bytes())?;
        self.tree.flush()?;
        Ok(existed)
    }

    /// Iterates all records lazily in key order.
    ///
    /// The archive indexing scan uses this to observe cancellation
    /// between records.
    pub fn iter(&self) -> impl Iterator<Item = Result<ArchiveRecord>> {
        self.tree.iter().map(|item| item.map(|(_, record)| record))
    }

    /// Returns all records in key order.
    pub fn records(&self) -> Result<Vec<ArchiveRecord>> {
        self.iter().collect()
    }
}

// ---------------------------------------------------------------------------
// InboxStore
// ---------------------------------------------------------------------------

/// Headers of unarchived mail, keyed by message id.
///
/// Removing a header here is the "mark archived" semantic; the archive
/// record is untouched.
pub struct InboxStore {
    tree: TypedTree<EmailHeader>,
}

impl InboxStore {
    pub(crate) fn new(tree: sled::Tree) -> Self {
        Self {
            tree: TypedTree::new(tree),
        }
    }

    /// Stores a header under its message id.
    pub fn insert(&self, header: &EmailHeader) -> Result<()> {
        self.tree.insert(header.id.as_bytes(), header)
    }

    /// Returns whether a header exists under `id`.
    pub fn contains(&self, id: &MessageId) -> Result<bool> {
        self.tree.contains(id.as_bytes())
    }

    /// Removes a header; returns whether it existed.
    pub fn remove(&self, id: &MessageId) -> Result<bool> {
        self.tree.remove(id.as_bytes())
    }

    /// Returns all headers in key order.
    pub fn headers(&self) -> Result<Vec<EmailHeader>> {
        Ok(self
            .tree
            .entries()?
            .into_iter()
            .map(|(_, header)| header)
            .collect())
    }

    /// Flushes pending writes; called on engine close.
    pub fn flush(&self) -> Result<()> {
        self.tree.flush()
    }
}

// ---------------------------------------------------------------------------
// PropertyStore
// ---------------------------------------------------------------------------

/// Small string-keyed map: schema version and fetch watermarks.
pub struct PropertyStore {
    tree: sled::Tree,
}

/// Key of the schema version property.
const KEY_VERSION: &str = "version";

/// Key prefix of the per-account fetch watermark properties.
const KEY_LAST_FETCH_PREFIX: &str = "last_fetch/";

impl PropertyStore {
    pub(crate) fn new(tree: sled::Tree) -> Self {
        Self { tree }
    }

    /// Reads the stored schema version, if any.
    pub fn version(&self) -> Result<Option<i64>> {
        self.get_value(KEY_VERSION)
    }

    /// Stores the schema version.
    pub fn set_version(&self, version: i64) -> Result<()> {
        self.set_value(KEY_VERSION, &version)
    }

    /// Reads the last successful fetch watermark for an account.
    pub fn last_fetch(&self, account: &str) -> Result<Option<Timestamp>> {
        self.get_value(&format!("{KEY_LAST_FETCH_PREFIX}{account}"))
    }

    /// Stores the fetch watermark for an account.
    pub fn set_last_fetch(&self, account: &str, timestamp: Timestamp) -> Result<()> {
        self.set_value(&format!("{KEY_LAST_FETCH_PREFIX}{account}"), &timestamp)
    }

    fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw = self.tree.get(key).map_err(|e| MailError::Storage {
            reason: format!("sled get failed: {e}"),
        })?;

        match raw {
            None => Ok(None),
            Some(bytes) => {
                let value = bincode::deserialize(&bytes).map_err(|e| MailError::Storage {
                    reason: format!("property '{key}' failed to decode: {e}"),
                })?;
                Ok(Some(value))
            }
        }
    }

    fn set_value<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let encoded = bincode::serialize(value).map_err(|e| MailError::Storage {
            reason: format!("property '{key}' failed to encode: {e}"),
        })?;

        self.tree
            .insert(key, encoded)
            .map_err(|e| MailError::Storage {
                reason: format!("sled insert failed: {e}"),
            })?;

        self.tree.flush().map_err(|e| MailError::Storage {
            reason: format!("sled flush failed: {e}"),
        })?;
        Ok(())
    }
}
