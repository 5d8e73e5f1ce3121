//! The mail client facade and its shared inner state.
//!
//! [`MailClient`] exposes the public operations; everything mutable is
//! behind an `Arc`'d [`ClientInner`] so the pipeline supervisors, the
//! per-server tasks, and the indexing scan can share it. The client is
//! constructed closed; [`open`](MailClient::open) loads the stores,
//! re-dispatches in-flight records, and starts the archive indexing
//! scan.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use ledgermail_protocol::message::{Message, MessageKind};
use ledgermail_storage::{
    index_archive_scan, ArchiveStore, IndexGate, InboxStore, MailIndex, ProcessingStore,
    PropertyStore, StorageEngine,
};
use ledgermail_types::config::MailConfig;
use ledgermail_types::{
    EmailHeader, MailError, MailServer, MailStatus, MessageId, PublicKey, Result,
};
use tokio::task::JoinHandle;

use crate::directory::Directory;
use crate::jobs::{lock, JobQueue};
use crate::notify::MailNotifier;
use crate::wallet::Wallet;
use crate::{fetch, pipeline};

// ---------------------------------------------------------------------------
// MailStores
// ---------------------------------------------------------------------------

/// The four durable stores, opened together and closed together.
pub(crate) struct MailStores {
    pub(crate) engine: StorageEngine,
    pub(crate) processing: ProcessingStore,
    pub(crate) archive: ArchiveStore,
    pub(crate) inbox: InboxStore,
    pub(crate) properties: PropertyStore,
}

impl MailStores {
    fn new(engine: StorageEngine) -> Result<Self> {
        Ok(Self {
            processing: engine.processing()?,
            archive: engine.archive()?,
            inbox: engine.inbox()?,
            properties: engine.properties()?,
            engine,
        })
    }

    /// Flushes the write-back stores and the engine.
    fn flush(&self) -> Result<()> {
        self.processing.flush()?;
        self.inbox.flush()?;
        self.engine.flush()
    }
}

// ---------------------------------------------------------------------------
// ClientInner
// ---------------------------------------------------------------------------

/// State shared between the facade and the pipeline tasks.
pub(crate) struct ClientInner {
    pub(crate) wallet: Arc<dyn Wallet>,
    pub(crate) directory: Arc<dyn Directory>,
    pub(crate) notifier: Arc<dyn MailNotifier>,
    pub(crate) config: MailConfig,
    /// `None` until `open`; taken back on `close`.
    stores: RwLock<Option<Arc<MailStores>>>,
    pub(crate) index: MailIndex,
    pub(crate) index_gate: IndexGate,
    index_task: Mutex<Option<JoinHandle<()>>>,
    pub(crate) pow_jobs: Arc<JobQueue>,
    pub(crate) transmit_jobs: Arc<JobQueue>,
    /// Shutdown flag observed by the nonce-grinding slave between
    /// increments.
    pub(crate) pow_cancel: Arc<AtomicBool>,
}

impl ClientInner {
    /// Returns the open stores, or [`MailError::NotOpen`].
    pub(crate) fn stores(&self) -> Result<Arc<MailStores>> {
        let slot = match self.stores.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.as_ref().cloned().ok_or(MailError::NotOpen)
    }

    fn is_open(&self) -> bool {
        self.stores().is_ok()
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        // Best-effort cancellation; `close` is the orderly path.
        self.pow_cancel.store(true, Ordering::Relaxed);
        self.index_gate.cancel();
        self.pow_jobs.abort();
        self.transmit_jobs.abort();
    }
}

// ---------------------------------------------------------------------------
// EmailRecord
// ---------------------------------------------------------------------------

/// The decrypted view of one message, from either store.
#[derive(Clone, Debug)]
pub struct EmailRecord {
    /// Summary header; for in-flight mail the id is the static id.
    pub header: EmailHeader,
    /// The decrypted envelope.
    pub content: Message,
    /// Servers associated with the message.
    pub mail_servers: BTreeSet<MailServer>,
    /// Present when the message failed to send.
    pub failure_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// MailClient
// ---------------------------------------------------------------------------

/// The client core: outbound pipeline, inbound fetch, and queries.
pub struct MailClient {
    inner: Arc<ClientInner>,
}

impl MailClient {
    /// Creates a closed client around its collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Config`] if `config` fails validation.
    pub fn new(
        wallet: Arc<dyn Wallet>,
        directory: Arc<dyn Directory>,
        notifier: Arc<dyn MailNotifier>,
        config: MailConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                wallet,
                directory,
                notifier,
                config,
                stores: RwLock::new(None),
                index: MailIndex::new(),
                index_gate: IndexGate::new(),
                index_task: Mutex::new(None),
                pow_jobs: JobQueue::new("proof-of-work"),
                transmit_jobs: JobQueue::new("transmit"),
                pow_cancel: Arc::new(AtomicBool::new(false)),
            }),
        })
    }

    /// Opens the mail database, resumes in-flight messages, and starts
    /// the archive indexing scan.
    ///
    /// Each processing record is put back in its place on the pipeline:
    /// submitted records re-enter at server resolution, records mid
    /// proof-of-work or transmission re-join their queues, and accepted
    /// records re-finalize (idempotently, in case the previous run
    /// crashed between the archive store and the processing remove).
    ///
    /// # Errors
    ///
    /// - [`MailError::Precondition`] if the client is already open.
    /// - [`MailError::SchemaMismatch`] if the database version differs.
    /// - [`MailError::Storage`] on database failures.
    pub async fn open(&self, data_dir: &Path) -> Result<()> {
        if self.inner.is_open() {
            return Err(MailError::Precondition {
                reason: "mail client is already open".into(),
            });
        }

        let engine = StorageEngine::open(data_dir)?;
        let stores = Arc::new(MailStores::new(engine)?);
        {
            let mut slot = match self.inner.stores.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *slot = Some(Arc::clone(&stores));
        }

        if let Err(e) = self.resume(stores) {
            // Recovery failed; release the stores so the client reads
            // as closed.
            let mut slot = match self.inner.stores.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *slot = None;
            return Err(e);
        }
        Ok(())
    }

    /// Re-dispatches in-flight records and starts the indexing scan.
    fn resume(&self, stores: Arc<MailStores>) -> Result<()> {
        // Place all in-processing messages back on the pipeline.
        for record in stores.processing.records()? {
            pipeline::dispatch_record(&self.inner, record)?;
        }

        // Index the archive in the background.
        let inner = Arc::clone(&self.inner);
        let handle = tokio::task::spawn_blocking(move || {
            index_archive_scan(&stores.archive, &inner.index, &inner.index_gate);
        });
        *lock(&self.inner.index_task) = Some(handle);
        Ok(())
    }

    /// Whether the stores are open.
    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    /// Cancels the supervisors and the indexing scan, waits for the
    /// scan, flushes the stores, and releases them.
    ///
    /// The client cannot be reopened; create a new instance for that.
    pub async fn close(&self) -> Result<()> {
        self.inner.pow_cancel.store(true, Ordering::Relaxed);
        self.inner.index_gate.cancel();
        self.inner.pow_jobs.abort();
        self.inner.transmit_jobs.abort();

        let handle = lock(&self.inner.index_task).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let stores = {
            let mut slot = match self.inner.stores.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.take()
        };
        if let Some(stores) = stores {
            stores.flush()?;
        }
        Ok(())
    }

    // -- Outbound ----------------------------------------------------------

    /// Submits a wallet-encrypted envelope for delivery.
    ///
    /// Returns the static id under which the message can be queried,
    /// canceled, or retried while in flight.
    ///
    /// # Errors
    ///
    /// - [`MailError::NotOpen`] before `open`.
    /// - [`MailError::Precondition`] if the content is not encrypted.
    pub async fn send_encrypted(
        &self,
        ciphertext: Message,
        sender: &str,
        recipient: &str,
        recipient_key: PublicKey,
    ) -> Result<MessageId> {
        self.inner.stores()?;
        if ciphertext.kind != MessageKind::Encrypted {
            return Err(MailError::Precondition {
                reason: "refusing to send plaintext message".into(),
            });
        }

        let mut content = ciphertext;
        content.recipient = recipient_key;
        let record = ledgermail_storage::ProcessingRecord::new(
            sender.to_string(),
            recipient.to_string(),
            recipient_key,
            content,
        );
        let id = record.id;
        pipeline::process_outgoing_mail(&self.inner, record)?;
        Ok(id)
    }

    /// Retries a failed message from the top of the pipeline.
    ///
    /// # Errors
    ///
    /// - [`MailError::NotFound`] if the id is not in processing.
    /// - [`MailError::Precondition`] if the message has not failed.
    pub async fn retry_message(&self, id: MessageId) -> Result<()> {
        let stores = self.inner.stores()?;
        let mut record = stores.processing.fetch(&id)?;
        if record.status != MailStatus::Failed {
            return Err(MailError::Precondition {
                reason: "message has not failed to send; cannot retry sending".into(),
            });
        }
        record.status = MailStatus::Submitted;
        pipeline::process_outgoing_mail(&self.inner, record)
    }

    /// Cancels an in-flight message.
    ///
    /// A no-op when the id is not in processing. The cancellation is
    /// persisted as a marker and converted to a failure at the
    /// pipeline's next checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Precondition`] once the message has been
    /// submitted to servers (status past proof-of-work).
    pub fn cancel_message(&self, id: MessageId) -> Result<()> {
        let stores = self.inner.stores()?;
        if let Some(mut record) = stores.processing.get(&id)? {
            if record.status > MailStatus::ProofOfWork {
                return Err(MailError::Precondition {
                    reason: "cannot cancel message once it has been submitted to servers".into(),
                });
            }
            record.status = MailStatus::Canceled;
            stores.processing.insert(&record)?;
        }
        Ok(())
    }

    /// Deletes a failed processing record or an archived message.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Precondition`] for a processing record that
    /// has not failed.
    pub fn remove_message(&self, id: MessageId) -> Result<()> {
        let stores = self.inner.stores()?;
        if let Some(record) = stores.processing.get(&id)? {
            if record.status != MailStatus::Failed {
                return Err(MailError::Precondition {
                    reason: "cannot remove message during processing".into(),
                });
            }
            stores.processing.remove(&id)?;
        } else if stores.archive.contains(&id)? {
            stores.archive.remove(&id)?;
        }
        Ok(())
    }

    /// Removes a message's header from the inbox; the archive record is
    /// untouched. A no-op when the header is absent.
    pub fn archive_message(&self, id: MessageId) -> Result<()> {
        let stores = self.inner.stores()?;
        stores.inbox.remove(&id)?;
        Ok(())
    }

    // -- Inbound -----------------------------------------------------------

    /// Polls every local account's servers for new mail.
    ///
    /// With `include_old` set, fetches from each account's registration
    /// time instead of its stored watermark. Returns the number of new
    /// messages and fires the new-mail notifier when positive.
    pub async fn check_new_mail(&self, include_old: bool) -> Result<u32> {
        self.inner.stores()?;
        let count = fetch::check_new_mail(&self.inner, include_old).await?;
        if count > 0 {
            self.inner.notifier.new_mail(count);
        }
        Ok(count)
    }

    // -- Queries -----------------------------------------------------------

    /// Looks up a message by id in processing, then archive, and
    /// decrypts it through the wallet.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::NotFound`] if neither store has the id.
    pub fn get_message(&self, id: MessageId) -> Result<EmailRecord> {
        let stores = self.inner.stores()?;

        if let Some(mut record) = stores.processing.get(&id)? {
            if record.content.kind == MessageKind::Encrypted {
                record.content = self
                    .inner
                    .wallet
                    .open_mail_with_key(&record.recipient_key, &record.content)?;
            }
            let failure_reason = match record.status {
                MailStatus::Failed => record.failure_reason.clone(),
                _ => None,
            };
            return Ok(EmailRecord {
                header: record.header(),
                content: record.content,
                mail_servers: record.mail_servers,
                failure_reason,
            });
        }

        if let Some(mut record) = stores.archive.get(&id)? {
            if record.content.kind == MessageKind::Encrypted {
                record.content = self
                    .inner
                    .wallet
                    .open_mail(&record.recipient_address, &record.content)?;
            }
            return Ok(EmailRecord {
                header: record.header(),
                content: record.content,
                mail_servers: record.mail_servers,
                failure_reason: None,
            });
        }

        Err(MailError::NotFound { id })
    }

    /// Headers of every archived message from `sender`.
    pub fn get_messages_by_sender(&self, sender: &str) -> Result<Vec<EmailHeader>> {
        self.inner.stores()?;
        if !self.index_ready() {
            return Ok(Vec::new());
        }
        self.headers_for(self.inner.index.by_sender(sender))
    }

    /// Headers of every archived message to `recipient`.
    pub fn get_messages_by_recipient(&self, recipient: &str) -> Result<Vec<EmailHeader>> {
        self.inner.stores()?;
        if !self.index_ready() {
            return Ok(Vec::new());
        }
        self.headers_for(self.inner.index.by_recipient(recipient))
    }

    /// Headers of every archived message from `sender` to `recipient`.
    pub fn get_messages_from_to(&self, sender: &str, recipient: &str) -> Result<Vec<EmailHeader>> {
        self.inner.stores()?;
        if !self.index_ready() {
            return Ok(Vec::new());
        }
        self.headers_for(self.inner.index.from_to(sender, recipient))
    }

    /// Both directions of a two-party conversation, sorted by
    /// timestamp.
    pub fn get_conversation(&self, account_one: &str, account_two: &str) -> Result<Vec<EmailHeader>> {
        let mut headers = self.get_messages_from_to(account_one, account_two)?;
        headers.extend(self.get_messages_from_to(account_two, account_one)?);
        headers.sort_by_key(|h| h.timestamp);
        Ok(headers)
    }

    /// All inbox headers, sorted by timestamp ascending.
    pub fn get_inbox(&self) -> Result<Vec<EmailHeader>> {
        let stores = self.inner.stores()?;
        let mut headers = stores.inbox.headers()?;
        headers.sort_by_key(|h| h.timestamp);
        Ok(headers)
    }

    /// Status and id of every in-flight message, ordered by status.
    pub fn get_processing_messages(&self) -> Result<Vec<(MailStatus, MessageId)>> {
        let stores = self.inner.stores()?;
        let mut messages: Vec<_> = stores
            .processing
            .records()?
            .into_iter()
            .map(|r| (r.status, r.id))
            .collect();
        messages.sort();
        Ok(messages)
    }

    /// Status and id of every archived message, ordered by status.
    pub fn get_archive_messages(&self) -> Result<Vec<(MailStatus, MessageId)>> {
        let stores = self.inner.stores()?;
        let mut messages: Vec<_> = stores
            .archive
            .records()?
            .into_iter()
            .map(|r| (r.status, r.id))
            .collect();
        messages.sort();
        Ok(messages)
    }

    // -- Internal ----------------------------------------------------------

    /// Whether index-backed queries can be served yet.
    fn index_ready(&self) -> bool {
        if self.inner.index_gate.is_ready() {
            return true;
        }
        tracing::info!("mail archive is currently indexing; please try again later");
        false
    }

    /// Resolves index records to decrypted headers.
    fn headers_for(&self, records: Vec<ledgermail_storage::IndexRecord>) -> Result<Vec<EmailHeader>> {
        records
            .into_iter()
            .map(|record| self.get_message(record.id).map(|email| email.header))
            .collect()
    }
}
