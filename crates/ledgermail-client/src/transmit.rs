//! Parallel replication of one message to its resolved server set.
//!
//! The transmitter handles one message at a time; that message fans
//! out into one task per server, each owning its own connection. Tasks
//! never touch the record: they report a [`ServerOutcome`] and the
//! coordinator merges outcomes serially. Replication succeeds when at
//! least one server confirms storage; the record's server set is then
//! narrowed to the confirmed servers and the message finalized.
//!
//! Two peer errors get special treatment: `message_already_stored`
//! counts as success (a retry tolerating an earlier partial win), and
//! `timestamp_too_old` sends the message back to proof of work with a
//! bumped nonce. Any other active rejection, and a confirmation fetch
//! that returns the wrong message, fail the message outright. Connect
//! and read failures stay confined to their task and only fail the
//! message when nothing succeeds. A 10-second timeout bounds the whole
//! fan-out.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use ledgermail_protocol::message::Message;
use ledgermail_protocol::rpc::{
    to_value, RpcRequest, ERROR_ALREADY_STORED, ERROR_TIMESTAMP_TOO_OLD, METHOD_FETCH_MESSAGE,
    METHOD_STORE_MESSAGE,
};
use ledgermail_types::{MailError, MailServer, MailStatus, MessageId, Result};
use tokio::task::JoinSet;

use crate::client::ClientInner;
use crate::peer::MailPeer;
use crate::pipeline::{finalize_message, mark_failed, schedule_proof_of_work};

// ---------------------------------------------------------------------------
// Per-server outcomes
// ---------------------------------------------------------------------------

/// What one per-server task reports back to the coordinator.
enum ServerOutcome {
    /// The server holds the message and returned it on confirmation,
    /// or reported it as already stored.
    Stored(MailServer),
    /// Connect, read, or decode failure; promoted to a message failure
    /// only if no server succeeds.
    Transient(MailServer, String),
    /// The server rejected the content timestamp as stale.
    TimestampTooOld(MailServer),
    /// The server actively rejected the message.
    Rejected(MailServer, String),
    /// The confirmation fetch returned a different message.
    ConfirmMismatch(MailServer),
}

enum StoreVerdict {
    Stored,
    TimestampTooOld,
    Rejected(String),
    ConfirmMismatch,
}

impl StoreVerdict {
    fn into_outcome(self, server: MailServer) -> ServerOutcome {
        match self {
            Self::Stored => ServerOutcome::Stored(server),
            Self::TimestampTooOld => ServerOutcome::TimestampTooOld(server),
            Self::Rejected(reason) => ServerOutcome::Rejected(server, reason),
            Self::ConfirmMismatch => ServerOutcome::ConfirmMismatch(server),
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Runs one transmit job; errors are logged, not propagated, so the
/// supervisor keeps draining its queue.
pub(crate) async fn run_transmit_job(inner: Arc<ClientInner>, id: MessageId) {
    if let Err(e) = transmit_job(&inner, id).await {
        tracing::error!(%id, %e, "transmit job failed");
    }
}

async fn transmit_job(inner: &Arc<ClientInner>, id: MessageId) -> Result<()> {
    let stores = inner.stores()?;
    let mut record = stores.processing.fetch(&id)?;

    if record.mail_servers.is_empty() {
        return mark_failed(
            &stores,
            &mut record,
            "No mail servers found when trying to transmit message.",
        );
    }
    record.status = MailStatus::Transmitting;
    stores.processing.insert(&record)?;

    let mut tasks = JoinSet::new();
    for server in record.mail_servers.clone() {
        tasks.spawn(transmit_to_server(record.content.clone(), server));
    }

    let timeout = tokio::time::sleep(Duration::from_secs(inner.config.transmit_timeout_secs));
    tokio::pin!(timeout);

    let mut successful: BTreeSet<MailServer> = BTreeSet::new();
    let mut transient_reason: Option<String> = None;
    let mut timed_out = false;

    loop {
        tokio::select! {
            joined = tasks.join_next() => {
                let Some(joined) = joined else { break };
                let outcome = match joined {
                    Ok(outcome) => outcome,
                    Err(e) if e.is_cancelled() => continue,
                    Err(e) => {
                        tracing::error!(%id, %e, "transmit task panicked");
                        continue;
                    }
                };

                match outcome {
                    ServerOutcome::Stored(server) => {
                        successful.insert(server);
                    }
                    ServerOutcome::Transient(server, reason) => {
                        tracing::warn!(%id, server = %server, reason = %reason, "transmit attempt failed");
                        if successful.is_empty() {
                            transient_reason.get_or_insert(reason);
                        }
                    }
                    ServerOutcome::TimestampTooOld(server) => {
                        if successful.is_empty() {
                            // Redo the proof of work; the nonce bump
                            // guarantees a fresh hash sequence.
                            cancel_and_drain(&mut tasks).await;
                            record.status = MailStatus::ProofOfWork;
                            record.content.nonce = record.content.nonce.wrapping_add(1);
                            stores.processing.insert(&record)?;
                            schedule_proof_of_work(inner, id);
                            return Ok(());
                        }
                        tracing::warn!(
                            %id,
                            server = %server,
                            "stale timestamp reported after another server accepted; keeping the success"
                        );
                    }
                    ServerOutcome::Rejected(server, reason) => {
                        // An active rejection is terminal regardless of
                        // what the other replicas said.
                        tracing::error!(%id, server = %server, reason = %reason, "server rejected message");
                        cancel_and_drain(&mut tasks).await;
                        return mark_failed(&stores, &mut record, &reason);
                    }
                    ServerOutcome::ConfirmMismatch(server) => {
                        // Either a hash collision or server misbehavior;
                        // terminal.
                        tracing::error!(%id, server = %server, "confirmation fetch returned wrong message");
                        cancel_and_drain(&mut tasks).await;
                        return mark_failed(
                            &stores,
                            &mut record,
                            "Message saved to server, but server responded with another message when we requested it.",
                        );
                    }
                }
            }
            _ = &mut timeout, if !timed_out => {
                // Take the win if any server succeeded; the drain below
                // settles the rest.
                timed_out = true;
                tasks.abort_all();
            }
        }
    }

    if successful.is_empty() {
        let reason = if timed_out {
            "Timed out while transmitting message.".to_string()
        } else {
            transient_reason.unwrap_or_else(|| "Could not reach any mail server.".to_string())
        };
        return mark_failed(&stores, &mut record, &reason);
    }

    record.mail_servers = successful;
    stores.processing.insert(&record)?;
    finalize_message(inner, id)
}

async fn cancel_and_drain(tasks: &mut JoinSet<ServerOutcome>) {
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}
}

// ---------------------------------------------------------------------------
// Per-server exchange
// ---------------------------------------------------------------------------

async fn transmit_to_server(content: Message, server: MailServer) -> ServerOutcome {
    match try_transmit(&content, &server).await {
        Ok(verdict) => verdict.into_outcome(server),
        Err(e) => ServerOutcome::Transient(server, e.to_string()),
    }
}

/// One store-and-confirm round trip with a single server.
async fn try_transmit(content: &Message, server: &MailServer) -> Result<StoreVerdict> {
    let mut peer = MailPeer::connect(&server.endpoint).await?;

    let response = peer
        .call(RpcRequest::new(0, METHOD_STORE_MESSAGE, vec![to_value(content)?]))
        .await?;
    if let Some(text) = response.error_text() {
        if text == ERROR_ALREADY_STORED {
            tracing::warn!(id = %content.id(), server = %server, "message already stored on server");
            return Ok(StoreVerdict::Stored);
        }
        if text == ERROR_TIMESTAMP_TOO_OLD {
            return Ok(StoreVerdict::TimestampTooOld);
        }
        return Ok(StoreVerdict::Rejected(text));
    }

    // Confirm the store by fetching the message back.
    let response = peer
        .call(RpcRequest::new(1, METHOD_FETCH_MESSAGE, vec![to_value(&content.id())?]))
        .await?;
    let fetched: Message =
        serde_json::from_value(response.into_result()?).map_err(|e| MailError::Protocol {
            reason: format!("failed to decode confirmation fetch: {e}"),
        })?;

    if fetched.id() != content.id() {
        return Ok(StoreVerdict::ConfirmMismatch);
    }
    Ok(StoreVerdict::Stored)
}
