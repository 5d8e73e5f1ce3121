//! In-memory multi-key index over the archive.
//!
//! Records live in a vector addressed by integer handle; four ordered
//! maps point into it:
//!
//! - unique by message id,
//! - by `(sender, recipient, timestamp)`, where a range over the
//!   sender alone is also valid,
//! - by `(recipient, timestamp)`,
//! - by timestamp.
//!
//! All inserts acquire a single write lock; readers take the read side.
//! The index is populated lazily by a background scan over the archive
//! ([`index_archive_scan`]); until that scan completes, range queries
//! are answered with an empty result and a logged notice, while direct
//! id lookups always work.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use ledgermail_types::{MessageId, Timestamp};

use crate::records::ArchiveRecord;
use crate::stores::ArchiveStore;

// ---------------------------------------------------------------------------
// IndexRecord
// ---------------------------------------------------------------------------

/// The index projection of an archived message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexRecord {
    /// Archive id.
    pub id: MessageId,
    /// Sender account name.
    pub sender: String,
    /// Recipient account name.
    pub recipient: String,
    /// Content timestamp.
    pub timestamp: Timestamp,
}

impl From<&ArchiveRecord> for IndexRecord {
    fn from(record: &ArchiveRecord) -> Self {
        Self {
            id: record.id,
            sender: record.sender.clone(),
            recipient: record.recipient.clone(),
            timestamp: record.content.timestamp,
        }
    }
}

impl From<&ledgermail_types::EmailHeader> for IndexRecord {
    fn from(header: &ledgermail_types::EmailHeader) -> Self {
        Self {
            id: header.id,
            sender: header.sender.clone(),
            recipient: header.recipient.clone(),
            timestamp: header.timestamp,
        }
    }
}

// ---------------------------------------------------------------------------
// MailIndex
// ---------------------------------------------------------------------------

/// Composite keys; the id suffix keeps non-unique orderings distinct.
type SenderKey = (String, String, Timestamp, MessageId);
type RecipientKey = (String, Timestamp, MessageId);
type TimestampKey = (Timestamp, MessageId);

#[derive(Default)]
struct IndexInner {
    records: Vec<IndexRecord>,
    by_id: BTreeMap<MessageId, usize>,
    by_sender: BTreeMap<SenderKey, usize>,
    by_recipient: BTreeMap<RecipientKey, usize>,
    by_timestamp: BTreeMap<TimestampKey, usize>,
}

/// Thread-safe multi-key index over archived messages.
#[derive(Default)]
pub struct MailIndex {
    inner: RwLock<IndexInner>,
}

impl MailIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record; a duplicate id is ignored.
    pub fn insert(&self, record: IndexRecord) {
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if inner.by_id.contains_key(&record.id) {
            return;
        }

        let handle = inner.records.len();
        inner.by_id.insert(record.id, handle);
        inner.by_sender.insert(
            (record.sender.clone(), record.recipient.clone(), record.timestamp, record.id),
            handle,
        );
        inner
            .by_recipient
            .insert((record.recipient.clone(), record.timestamp, record.id), handle);
        inner.by_timestamp.insert((record.timestamp, record.id), handle);
        inner.records.push(record);
    }

    /// Unique lookup by id.
    pub fn get(&self, id: &MessageId) -> Option<IndexRecord> {
        let inner = self.read();
        inner.by_id.get(id).map(|&handle| inner.records[handle].clone())
    }

    /// All records from `sender`, ordered by recipient then timestamp.
    pub fn by_sender(&self, sender: &str) -> Vec<IndexRecord> {
        let inner = self.read();
        let lower: Bound<SenderKey> = Bound::Included((
            sender.to_string(),
            String::new(),
            Timestamp::from_secs(i64::MIN),
            MessageId::default(),
        ));
        inner
            .by_sender
            .range((lower, Bound::Unbounded))
            .take_while(|((s, _, _, _), _)| s.as_str() == sender)
            .map(|(_, &handle)| inner.records[handle].clone())
            .collect()
    }

    /// All records from `sender` to `recipient`, ordered by timestamp.
    pub fn from_to(&self, sender: &str, recipient: &str) -> Vec<IndexRecord> {
        let inner = self.read();
        let lower: Bound<SenderKey> = Bound::Included((
            sender.to_string(),
            recipient.to_string(),
            Timestamp::from_secs(i64::MIN),
            MessageId::default(),
        ));
        inner
            .by_sender
            .range((lower, Bound::Unbounded))
            .take_while(|((s, r, _, _), _)| s.as_str() == sender && r.as_str() == recipient)
            .map(|(_, &handle)| inner.records[handle].clone())
            .collect()
    }

    /// All records to `recipient`, ordered by timestamp.
    pub fn by_recipient(&self, recipient: &str) -> Vec<IndexRecord> {
        let inner = self.read();
        let lower: Bound<RecipientKey> = Bound::Included((
            recipient.to_string(),
            Timestamp::from_secs(i64::MIN),
            MessageId::default(),
        ));
        inner
            .by_recipient
            .range((lower, Bound::Unbounded))
            .take_while(|((r, _, _), _)| r.as_str() == recipient)
            .map(|(_, &handle)| inner.records[handle].clone())
            .collect()
    }

    /// Every record, ordered by timestamp.
    pub fn by_timestamp(&self) -> Vec<IndexRecord> {
        let inner = self.read();
        inner
            .by_timestamp
            .values()
            .map(|&handle| inner.records[handle].clone())
            .collect()
    }

    /// Number of indexed records.
    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, IndexInner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ---------------------------------------------------------------------------
// IndexGate
// ---------------------------------------------------------------------------

/// Tracks the archive indexing scan's progress and cancellation.
///
/// Range queries consult [`is_ready`](Self::is_ready) and return empty
/// with a notice while the scan runs; [`cancel`](Self::cancel) is
/// observed by the scan between records.
#[derive(Default)]
pub struct IndexGate {
    canceled: AtomicBool,
    ready: AtomicBool,
}

impl IndexGate {
    /// Creates a gate for a scan that has not run yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of the scan.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Relaxed)
    }

    /// Marks the scan complete.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Relaxed);
    }

    /// Whether the scan has completed.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// Scans the archive from beginning to end, inserting each record's
/// projection into the index.
///
/// Runs on a dedicated blocking task. Cancellation is observed between
/// records, so at any instant the indexed set is a prefix of the
/// archive in scan order (plus any records inserted directly by
/// finalization or fetch, which do not wait for the scan). Records
/// that fail to decode are logged and skipped.
pub fn index_archive_scan(archive: &ArchiveStore, index: &MailIndex, gate: &IndexGate) {
    for item in archive.iter() {
        if gate.is_canceled() {
            tracing::debug!("archive indexing canceled");
            return;
        }
        match item {
            Ok(record) => index.insert(IndexRecord::from(&record)),
            Err(e) => tracing::error!(%e, "skipping unreadable archive record during indexing"),
        }
    }
    gate.mark_ready();
    tracing::debug!(indexed = index.len(), "archive indexing complete");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
