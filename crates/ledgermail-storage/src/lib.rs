//! Durable mail stores and the in-memory archive index.
//!
//! [`engine::StorageEngine`] owns the sled database and enforces the
//! schema version on open. [`stores`] wraps each named tree in a typed
//! facade; [`records`] defines the persisted record shapes; [`index`]
//! holds the multi-key in-memory projection of the archive.

pub mod engine;
pub mod index;
pub mod records;
pub mod stores;
mod tree;

pub use engine::{StorageEngine, DATABASE_VERSION};
pub use index::{index_archive_scan, IndexGate, IndexRecord, MailIndex};
pub use records::{ArchiveRecord, ProcessingRecord};
pub use stores::{ArchiveStore, InboxStore, ProcessingStore, PropertyStore};
