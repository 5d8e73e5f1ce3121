//! State-machine routing between the pipeline stages.
//!
//! Outbound messages move `Submitted → ProofOfWork → Transmitting →
//! Accepted`, finishing in the archive. `Failed` is re-enterable via
//! retry, a server's stale-timestamp rejection sends a transmitting
//! record back to proof of work, and a persisted `Canceled` marker is
//! converted to `Failed` at the proof-of-work checkpoints. Recovery on
//! open re-dispatches every processing record by its persisted status,
//! which is what makes the pipeline crash-durable.

use std::sync::Arc;

use ledgermail_storage::{ArchiveRecord, IndexRecord, ProcessingRecord};
use ledgermail_types::{MailStatus, MessageId, Result};

use crate::client::{ClientInner, MailStores};
use crate::directory::resolve_mail_servers;
use crate::{pow, transmit};

/// Marks a record failed with the given reason and persists it.
pub(crate) fn mark_failed(
    stores: &MailStores,
    record: &mut ProcessingRecord,
    reason: &str,
) -> Result<()> {
    record.status = MailStatus::Failed;
    record.failure_reason = Some(reason.to_string());
    stores.processing.insert(record)
}

/// Enqueues a message on the proof-of-work supervisor.
pub(crate) fn schedule_proof_of_work(inner: &Arc<ClientInner>, id: MessageId) {
    let jobs = Arc::clone(&inner.pow_jobs);
    let inner = Arc::clone(inner);
    jobs.schedule(id, move |job| {
        let inner = Arc::clone(&inner);
        async move {
            pow::run_pow_job(inner, job).await;
        }
    });
}

/// Enqueues a message on the transmitter.
pub(crate) fn schedule_transmit_message(inner: &Arc<ClientInner>, id: MessageId) {
    let jobs = Arc::clone(&inner.transmit_jobs);
    let inner = Arc::clone(inner);
    jobs.schedule(id, move |job| {
        let inner = Arc::clone(&inner);
        async move {
            transmit::run_transmit_job(inner, job).await;
        }
    });
}

/// Starts a message on its journey through the pipeline.
///
/// Resolves and caches the recipient's server set, assigns the
/// proof-of-work target, and hands the record to the proof-of-work
/// queue. A recipient with no resolvable servers fails immediately.
pub(crate) fn process_outgoing_mail(inner: &Arc<ClientInner>, mut record: ProcessingRecord) -> Result<()> {
    let stores = inner.stores()?;

    record.mail_servers = resolve_mail_servers(inner.directory.as_ref(), &inner.config, &record.recipient);
    stores.processing.insert(&record)?;

    if record.mail_servers.is_empty() {
        tracing::error!(id = %record.id, recipient = %record.recipient, "no mail servers for recipient");
        return mark_failed(&stores, &mut record, "Could not find mail servers for this recipient.");
    }

    // TODO: contact the mail servers for their difficulty requirements
    // and take the minimum, instead of the configured constant.
    record.pow_target = Some(inner.config.pow_target);
    stores.processing.insert(&record)?;

    schedule_proof_of_work(inner, record.id);
    Ok(())
}

/// Moves an accepted message from processing into the archive.
///
/// The record is re-keyed under the final `content.id()`, projected
/// into the index, stored, and only then removed from processing, so a
/// crash in between re-finalizes to the identical archive row.
pub(crate) fn finalize_message(inner: &Arc<ClientInner>, id: MessageId) -> Result<()> {
    let stores = inner.stores()?;
    let mut record = stores.processing.fetch(&id)?;

    tracing::info!(%id, final_id = %record.content.id(), "message sent successfully");
    record.status = MailStatus::Accepted;

    let archived = ArchiveRecord::from_processing(record);
    inner.index.insert(IndexRecord::from(&archived));
    stores.archive.insert(&archived.id, &archived)?;
    stores.processing.remove(&id)?;
    Ok(())
}

/// Puts a recovered processing record back in its place on the
/// pipeline.
pub(crate) fn dispatch_record(inner: &Arc<ClientInner>, record: ProcessingRecord) -> Result<()> {
    match record.status {
        MailStatus::Submitted => process_outgoing_mail(inner, record),
        MailStatus::ProofOfWork => {
            schedule_proof_of_work(inner, record.id);
            Ok(())
        }
        MailStatus::Transmitting => {
            schedule_transmit_message(inner, record.id);
            Ok(())
        }
        MailStatus::Accepted => finalize_message(inner, record.id),
        _ => Ok(()),
    }
}
