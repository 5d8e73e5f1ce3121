//! Inbound fetch: poll every local account's servers for new mail.
//!
//! Accounts are processed sequentially; within one account, one task
//! per server pages the inventory, downloads each listed message,
//! decrypts it through the wallet, and writes archive, inbox, and
//! index. A 60-second timeout bounds each account's fan-out, and the
//! per-account watermark is only advanced when the fan-out completes
//! in time.
//!
//! Known limitations, by design of the protocol rather than this
//! implementation: a message present on three servers is downloaded
//! three times (no cross-server deduplication), and messages within
//! one server are downloaded sequentially.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ledgermail_protocol::message::{Message, MessageKind};
use ledgermail_protocol::rpc::{
    to_value, InventoryEntry, RpcRequest, METHOD_FETCH_INVENTORY, METHOD_FETCH_MESSAGE,
};
use ledgermail_storage::{ArchiveRecord, IndexRecord};
use ledgermail_types::{EmailHeader, MailError, MailServer, MailStatus, Result, Timestamp};
use tokio::task::JoinSet;

use crate::client::ClientInner;
use crate::directory::resolve_mail_servers;
use crate::peer::MailPeer;
use crate::wallet::WalletAccount;

/// Sender label recorded when signature verification fails.
const INVALID_SIGNATURE: &str = "INVALID SIGNATURE";

/// Subject line recorded for transaction notices.
const TRANSACTION_SUBJECT: &str = "Transaction Notification";

// ---------------------------------------------------------------------------
// Per-account driver
// ---------------------------------------------------------------------------

/// Fetches new mail for every wallet account; returns the number of
/// new messages.
pub(crate) async fn check_new_mail(inner: &Arc<ClientInner>, include_old: bool) -> Result<u32> {
    let stores = inner.stores()?;
    let accounts = inner.wallet.accounts()?;
    let counter = Arc::new(AtomicU32::new(0));

    for account in accounts {
        let servers = resolve_mail_servers(inner.directory.as_ref(), &inner.config, &account.name);

        let mut watermark = account.registered_at;
        if !include_old {
            if let Some(mark) = stores.properties.last_fetch(&account.name)? {
                watermark = mark;
            }
        }
        let check_time = inner.directory.now();

        let mut tasks = JoinSet::new();
        for server in servers {
            tasks.spawn(fetch_from_server(
                Arc::clone(inner),
                account.clone(),
                server,
                watermark,
                Arc::clone(&counter),
            ));
        }

        let timeout = tokio::time::sleep(Duration::from_secs(inner.config.fetch_timeout_secs));
        tokio::pin!(timeout);

        let mut timed_out = false;
        loop {
            tokio::select! {
                joined = tasks.join_next() => {
                    if joined.is_none() {
                        break;
                    }
                }
                _ = &mut timeout, if !timed_out => {
                    tracing::error!(account = %account.name, "timed out fetching new mail");
                    timed_out = true;
                    tasks.abort_all();
                }
            }
        }

        // The watermark only advances after a full, un-timed-out pass;
        // anything missed stays ahead of the next fetch.
        if !timed_out {
            stores.properties.set_last_fetch(&account.name, check_time)?;
        }
    }

    Ok(counter.load(Ordering::Relaxed))
}

// ---------------------------------------------------------------------------
// Per-server task
// ---------------------------------------------------------------------------

async fn fetch_from_server(
    inner: Arc<ClientInner>,
    account: WalletAccount,
    server: MailServer,
    watermark: Timestamp,
    counter: Arc<AtomicU32>,
) {
    if let Err(e) = fetch_inventory_pages(&inner, &account, &server, watermark, &counter).await {
        tracing::error!(server = %server, account = %account.name, %e, "fetching mail failed");
    }
}

async fn fetch_inventory_pages(
    inner: &Arc<ClientInner>,
    account: &WalletAccount,
    server: &MailServer,
    watermark: Timestamp,
    counter: &AtomicU32,
) -> Result<()> {
    let stores = inner.stores()?;
    let mut peer = MailPeer::connect(&server.endpoint).await?;
    let page_size = inner.config.inventory_page_size;

    // Page while the server keeps filling whole pages.
    let mut received = page_size;
    while received == page_size {
        let response = peer
            .call(RpcRequest::new(
                0,
                METHOD_FETCH_INVENTORY,
                vec![
                    to_value(&account.address)?,
                    to_value(&watermark)?,
                    to_value(&page_size)?,
                ],
            ))
            .await?;
        let inventory: Vec<InventoryEntry> = serde_json::from_value(response.into_result()?)
            .map_err(|e| MailError::Protocol {
                reason: format!("failed to decode inventory: {e}"),
            })?;
        received = inventory.len();

        for (_, message_id) in inventory {
            let response = peer
                .call(RpcRequest::new(1, METHOD_FETCH_MESSAGE, vec![to_value(&message_id)?]))
                .await?;
            let ciphertext: Message = serde_json::from_value(response.into_result()?)
                .map_err(|e| MailError::Protocol {
                    reason: format!("failed to decode fetched message: {e}"),
                })?;

            let plaintext = inner.wallet.open_mail(&account.address, &ciphertext)?;
            let header = build_header(inner, account, &ciphertext, &plaintext)?;

            let mut new_mail = false;
            let mut record = match stores.archive.get(&message_id)? {
                Some(mut existing) => {
                    if existing.status == MailStatus::Accepted {
                        // We sent this message, but it is still newly
                        // received mail.
                        new_mail = true;
                        existing.status = MailStatus::Received;
                    }
                    existing
                }
                None => {
                    new_mail = true;
                    ArchiveRecord::from_fetched(ciphertext, &header, account.address)
                }
            };
            record.mail_servers.insert(server.clone());

            stores.archive.insert(&message_id, &record)?;
            inner.index.insert(IndexRecord::from(&header));

            if new_mail {
                stores.inbox.insert(&header)?;
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    Ok(())
}

/// Builds the inbox header for a fetched message.
///
/// The sender label comes from the wallet's signature recovery and
/// degrades to `"INVALID SIGNATURE"` on failure; transaction notices
/// additionally get scanned and notified.
fn build_header(
    inner: &Arc<ClientInner>,
    account: &WalletAccount,
    ciphertext: &Message,
    plaintext: &Message,
) -> Result<EmailHeader> {
    let mut header = EmailHeader {
        id: ciphertext.id(),
        sender: String::new(),
        recipient: account.name.clone(),
        subject: String::new(),
        timestamp: plaintext.timestamp,
    };

    match plaintext.kind {
        MessageKind::Email => {
            header.sender = sender_label(inner, plaintext);
            header.subject = plaintext.as_email()?.subject;
        }
        MessageKind::TransactionNotice => {
            header.sender = sender_label(inner, plaintext);
            header.subject = TRANSACTION_SUBJECT.to_string();

            let notice = plaintext.as_transaction_notice()?;
            inner.wallet.scan_transaction(&notice.transaction)?;
            inner.notifier.transaction_notice(&notice);
        }
        MessageKind::Encrypted => {}
    }

    Ok(header)
}

fn sender_label(inner: &Arc<ClientInner>, plaintext: &Message) -> String {
    match inner.wallet.sender_label(plaintext) {
        Ok(label) => label,
        Err(_) => INVALID_SIGNATURE.to_string(),
    }
}
