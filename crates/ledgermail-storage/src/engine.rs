//! Storage engine: database lifecycle and schema versioning.
//!
//! The [`StorageEngine`] owns the sled database holding the four mail
//! maps. On [`open`](StorageEngine::open) it pre-creates all trees and
//! validates the schema version stored in the properties map; a
//! mismatch is fatal and aborts the open.

use std::path::Path;

use ledgermail_types::{MailError, Result};

use crate::stores::{ArchiveStore, InboxStore, ProcessingStore, PropertyStore};

/// Current on-disk schema version.
pub const DATABASE_VERSION: i64 = 1;

/// Names of the four mail trees.
const TREE_PROCESSING: &str = "processing";
const TREE_ARCHIVE: &str = "archive";
const TREE_INBOX: &str = "inbox";
const TREE_PROPERTIES: &str = "properties";

// ---------------------------------------------------------------------------
// StorageEngine
// ---------------------------------------------------------------------------

/// Sled-backed storage engine for the mail client.
///
/// # Trees
///
/// - `processing` — in-flight outbound records, keyed by static id
/// - `archive` — finalized and fetched messages, keyed by content id
/// - `inbox` — unarchived message headers, keyed by message id
/// - `properties` — schema version and per-account fetch watermarks
///
/// `processing` and `inbox` are mutation-heavy and run write-back: they
/// are flushed on [`close`](Self::close), not per write. `archive` and
/// `properties` are write-through; their facades flush every mutation.
#[derive(Debug)]
pub struct StorageEngine {
    db: sled::Db,
}

impl StorageEngine {
    /// Opens (or creates) the mail database at `path`.
    ///
    /// If the database is fresh, the current schema version is stored.
    ///
    /// # Errors
    ///
    /// - [`MailError::SchemaMismatch`] if the stored version differs
    ///   from [`DATABASE_VERSION`].
    /// - [`MailError::Storage`] if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path).map_err(|e| MailError::Storage {
            reason: format!("failed to open mail database: {e}"),
        })?;

        // Pre-create all trees so they exist for later access.
        for name in &[TREE_PROCESSING, TREE_ARCHIVE, TREE_INBOX, TREE_PROPERTIES] {
            db.open_tree(name).map_err(|e| MailError::Storage {
                reason: format!("failed to open tree '{name}': {e}"),
            })?;
        }

        let engine = Self { db };
        engine.check_version()?;
        Ok(engine)
    }

    /// Validates the stored schema version, writing it on first open.
    fn check_version(&self) -> Result<()> {
        let properties = self.properties()?;
        match properties.version()? {
            None => properties.set_version(DATABASE_VERSION),
            Some(stored) if stored != DATABASE_VERSION => {
                tracing::error!(
                    stored,
                    supported = DATABASE_VERSION,
                    "unable to open mail client: database is wrong version"
                );
                Err(MailError::SchemaMismatch {
                    stored,
                    supported: DATABASE_VERSION,
                })
            }
            Some(_) => Ok(()),
        }
    }

    /// Returns the processing store (write-back).
    pub fn processing(&self) -> Result<ProcessingStore> {
        Ok(ProcessingStore::new(self.open_tree(TREE_PROCESSING)?))
    }

    /// Returns the archive store (write-through).
    pub fn archive(&self) -> Result<ArchiveStore> {
        Ok(ArchiveStore::new(self.open_tree(TREE_ARCHIVE)?))
    }

    /// Returns the inbox store (write-back).
    pub fn inbox(&self) -> Result<InboxStore> {
        Ok(InboxStore::new(self.open_tree(TREE_INBOX)?))
    }

    /// Returns the properties store (write-through).
    pub fn properties(&self) -> Result<PropertyStore> {
        Ok(PropertyStore::new(self.open_tree(TREE_PROPERTIES)?))
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(|e| MailError::Storage {
            reason: format!("failed to flush mail database: {e}"),
        })?;
        Ok(())
    }

    /// Flushes and releases the database.
    pub fn close(self) -> Result<()> {
        self.flush()
    }

    fn open_tree(&self, name: &str) -> Result<sled::Tree> {
        self.db.open_tree(name).map_err(|e| MailError::Storage {
            reason: format!("failed to open tree '{name}': {e}"),
        })
    }
}
