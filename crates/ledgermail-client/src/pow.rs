//! Proof-of-work engine: serial supervisor plus a CPU-bound slave.
//!
//! The supervisor runs on the I/O executor and owns the record; the
//! nonce grinding runs in one-second slices on a blocking worker via
//! `spawn_blocking`. Each slice boundary is a checkpoint: the content
//! timestamp is refreshed (servers reject stale timestamps), the
//! record is reloaded to observe a persisted cancellation, and the
//! shutdown flag is consulted. The slave owns its working copy of the
//! content and returns it, so nothing is shared mutably across the
//! thread boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ledgermail_protocol::Message;
use ledgermail_types::{MailError, MailStatus, MessageId, PowTarget, Result, Timestamp};

use crate::client::ClientInner;
use crate::pipeline::{mark_failed, schedule_transmit_message};

/// Runs one proof-of-work job; errors are logged, not propagated, so
/// the supervisor keeps draining its queue.
pub(crate) async fn run_pow_job(inner: Arc<ClientInner>, id: MessageId) {
    if let Err(e) = pow_job(&inner, id).await {
        tracing::error!(%id, %e, "proof-of-work job failed");
    }
}

async fn pow_job(inner: &Arc<ClientInner>, id: MessageId) -> Result<()> {
    let stores = inner.stores()?;
    let mut record = stores.processing.fetch(&id)?;

    let target = match record.pow_target {
        Some(target) if record.status != MailStatus::Canceled => {
            record.status = MailStatus::ProofOfWork;
            stores.processing.insert(&record)?;
            target
        }
        _ => {
            // No target, or canceled before pickup; cannot continue.
            let reason = if record.status == MailStatus::Canceled {
                "Canceled by user."
            } else {
                "No proof of work target. Cannot do proof of work."
            };
            return mark_failed(&stores, &mut record, reason);
        }
    };

    while !inner.pow_cancel.load(Ordering::Relaxed)
        && stores.processing.fetch(&id)?.status != MailStatus::Canceled
        && !target.admits(&record.content.id())
    {
        // Refresh the timestamp so the eventual transmission is not
        // rejected as stale, then grind for one slice.
        record.content.timestamp = Timestamp::now();
        stores.processing.insert(&record)?;

        let slice = Duration::from_millis(inner.config.pow_slice_millis);
        let cancel = Arc::clone(&inner.pow_cancel);
        let mut content = record.content.clone();
        record.content = tokio::task::spawn_blocking(move || {
            grind_nonce(&mut content, target, slice, &cancel);
            content
        })
        .await
        .map_err(|e| MailError::Protocol {
            reason: format!("proof-of-work worker failed: {e}"),
        })?;
    }

    if inner.pow_cancel.load(Ordering::Relaxed) {
        // Shutting down; leave the record mid proof-of-work so the
        // next open resumes it.
        return Ok(());
    }

    if stores.processing.fetch(&id)?.status == MailStatus::Canceled {
        return mark_failed(&stores, &mut record, "Canceled by user.");
    }

    stores.processing.insert(&record)?;
    schedule_transmit_message(inner, id);
    Ok(())
}

/// Increments the nonce until the content id meets the target, the
/// slice elapses, or cancellation is observed.
///
/// Returns whether the target is met. CPU-bound; run on a blocking
/// worker.
pub(crate) fn grind_nonce(
    content: &mut Message,
    target: PowTarget,
    slice: Duration,
    cancel: &AtomicBool,
) -> bool {
    let start = Instant::now();
    while !cancel.load(Ordering::Relaxed)
        && start.elapsed() < slice
        && !target.admits(&content.id())
    {
        content.nonce = content.nonce.wrapping_add(1);
    }
    target.admits(&content.id())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ledgermail_protocol::message::MessageKind;
    use ledgermail_types::PublicKey;

    fn message() -> Message {
        Message {
            kind: MessageKind::Encrypted,
            recipient: PublicKey::new([0x21u8; 32]),
            timestamp: Timestamp::from_secs(1_700_000_000),
            nonce: 0,
            data: vec![7; 32],
        }
    }

    #[test]
    fn grind_meets_easy_target() {
        // 8 leading zero bits; a few hundred attempts on average.
        let mut bytes = [0xFFu8; 20];
        bytes[0] = 0x00;
        let target = PowTarget::new(bytes);

        let mut content = message();
        let met = grind_nonce(&mut content, target, Duration::from_secs(5), &AtomicBool::new(false));
        assert!(met);
        assert!(target.admits(&content.id()));
    }

    #[test]
    fn grind_stops_on_cancel_without_progress_requirement() {
        // Effectively impossible target; cancellation must end the loop.
        let target = PowTarget::new([0u8; 20]);
        let cancel = AtomicBool::new(true);

        let mut content = message();
        let met = grind_nonce(&mut content, target, Duration::from_secs(60), &cancel);
        assert!(!met);
    }

    #[test]
    fn grind_respects_slice_bound() {
        let target = PowTarget::new([0u8; 20]);
        let start = Instant::now();
        let mut content = message();
        grind_nonce(&mut content, target, Duration::from_millis(50), &AtomicBool::new(false));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn permissive_target_needs_no_grinding() {
        let target = PowTarget::new([0xFFu8; 20]);
        let mut content = message();
        let nonce_before = content.nonce;
        assert!(grind_nonce(&mut content, target, Duration::from_secs(1), &AtomicBool::new(false)));
        assert_eq!(content.nonce, nonce_before);
    }
}
