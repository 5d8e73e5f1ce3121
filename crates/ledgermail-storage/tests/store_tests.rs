//! Integration tests for the durable mail stores.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use ledgermail_protocol::message::{Message, MessageKind};
use ledgermail_storage::{
    index_archive_scan, ArchiveRecord, IndexGate, MailIndex, ProcessingRecord, StorageEngine,
    DATABASE_VERSION,
};
use ledgermail_types::{Address, EmailHeader, MailError, MailStatus, PublicKey, Timestamp};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// Returns a unique temporary directory for each test.
fn temp_dir() -> PathBuf {
    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "ledgermail-store-test-{}-{}-{}",
        std::process::id(),
        id,
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
    ));
    let _ = std::fs::create_dir_all(&dir);
    dir
}

fn ciphertext(seed: u8) -> Message {
    Message {
        kind: MessageKind::Encrypted,
        recipient: PublicKey::new([seed; 32]),
        timestamp: Timestamp::from_secs(1_700_000_000 + seed as i64),
        nonce: seed as u64,
        data: vec![seed; 16],
    }
}

fn processing_record(seed: u8) -> ProcessingRecord {
    ProcessingRecord::new(
        "alice".into(),
        "bob".into(),
        PublicKey::new([seed; 32]),
        ciphertext(seed),
    )
}

fn archive_record(seed: u8) -> ArchiveRecord {
    let content = ciphertext(seed);
    let header = EmailHeader {
        id: content.id(),
        sender: "alice".into(),
        recipient: "bob".into(),
        subject: String::new(),
        timestamp: content.timestamp,
    };
    ArchiveRecord::from_fetched(content, &header, Address::new([seed; 20]))
}

// ---------------------------------------------------------------------------
// Engine lifecycle
// ---------------------------------------------------------------------------

#[test]
fn fresh_database_gets_current_version() {
    let dir = temp_dir();
    let engine = StorageEngine::open(&dir).expect("open");
    let version = engine.properties().unwrap().version().unwrap();
    assert_eq!(version, Some(DATABASE_VERSION));
}

#[test]
fn reopen_preserves_records() {
    let dir = temp_dir();
    let record = processing_record(1);
    {
        let engine = StorageEngine::open(&dir).expect("open");
        engine.processing().unwrap().insert(&record).unwrap();
        engine.close().unwrap();
    }

    let engine = StorageEngine::open(&dir).expect("reopen");
    let loaded = engine.processing().unwrap().fetch(&record.id).unwrap();
    assert_eq!(loaded.recipient, "bob");
    assert_eq!(loaded.status, MailStatus::Submitted);
}

#[test]
fn schema_mismatch_aborts_open() {
    let dir = temp_dir();
    {
        let engine = StorageEngine::open(&dir).expect("open");
        engine.properties().unwrap().set_version(DATABASE_VERSION + 1).unwrap();
        engine.close().unwrap();
    }

    match StorageEngine::open(&dir) {
        Err(MailError::SchemaMismatch { stored, supported }) => {
            assert_eq!(stored, DATABASE_VERSION + 1);
            assert_eq!(supported, DATABASE_VERSION);
        }
        other => panic!("expected schema mismatch, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

#[test]
fn processing_fetch_missing_is_not_found() {
    let dir = temp_dir();
    let engine = StorageEngine::open(&dir).expect("open");
    let missing = processing_record(9).id;
    match engine.processing().unwrap().fetch(&missing) {
        Err(MailError::NotFound { id }) => assert_eq!(id, missing),
        other => panic!("expected not found, got {other:?}"),
    }
}

#[test]
fn inbox_remove_is_idempotent() {
    let dir = temp_dir();
    let engine = StorageEngine::open(&dir).expect("open");
    let inbox = engine.inbox().unwrap();

    let header = archive_record(3).header();
    inbox.insert(&header).unwrap();
    assert!(inbox.remove(&header.id).unwrap());
    assert!(!inbox.remove(&header.id).unwrap());
}

#[test]
fn properties_watermark_roundtrip() {
    let dir = temp_dir();
    let engine = StorageEngine::open(&dir).expect("open");
    let properties = engine.properties().unwrap();

    assert_eq!(properties.last_fetch("alice").unwrap(), None);
    let mark = Timestamp::from_secs(1_700_000_123);
    properties.set_last_fetch("alice", mark).unwrap();
    assert_eq!(properties.last_fetch("alice").unwrap(), Some(mark));
    assert_eq!(properties.last_fetch("bob").unwrap(), None);
}

#[test]
fn archive_iterates_in_key_order() {
    let dir = temp_dir();
    let engine = StorageEngine::open(&dir).expect("open");
    let archive = engine.archive().unwrap();

    for seed in [5u8, 1, 3] {
        let record = archive_record(seed);
        archive.insert(&record.id, &record).unwrap();
    }

    let ids: Vec<_> = archive.records().unwrap().iter().map(|r| r.id).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

// ---------------------------------------------------------------------------
// Index scan
// ---------------------------------------------------------------------------

#[test]
fn archive_scan_populates_index() {
    let dir = temp_dir();
    let engine = StorageEngine::open(&dir).expect("open");
    let archive = engine.archive().unwrap();

    for seed in 1u8..=4 {
        let record = archive_record(seed);
        archive.insert(&record.id, &record).unwrap();
    }

    let index = MailIndex::new();
    let gate = IndexGate::new();
    index_archive_scan(&archive, &index, &gate);

    assert!(gate.is_ready());
    assert_eq!(index.len(), 4);
    assert_eq!(index.by_sender("alice").len(), 4);
}

#[test]
fn canceled_scan_never_marks_ready() {
    let dir = temp_dir();
    let engine = StorageEngine::open(&dir).expect("open");
    let archive = engine.archive().unwrap();
    let record = archive_record(1);
    archive.insert(&record.id, &record).unwrap();

    let index = MailIndex::new();
    let gate = IndexGate::new();
    gate.cancel();
    index_archive_scan(&archive, &index, &gate);

    assert!(!gate.is_ready());
    assert_eq!(index.len(), 0);
}
