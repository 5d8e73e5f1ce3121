//! Notification sink for mail events.
//!
//! The controller holds a non-owning handle to whoever wants to hear
//! about new mail; injecting a callback trait avoids an ownership cycle
//! with the outer API surface.

use ledgermail_protocol::message::TransactionNotice;

/// Receives mail events from the pipeline. All methods default to
/// no-ops so implementors override only what they care about.
pub trait MailNotifier: Send + Sync {
    /// New mail arrived during a fetch; `count` is the number of new
    /// messages across all accounts.
    fn new_mail(&self, count: u32) {
        let _ = count;
    }

    /// A transaction notice was fetched and its transaction scanned.
    fn transaction_notice(&self, notice: &TransactionNotice) {
        let _ = notice;
    }
}

/// A notifier that ignores every event.
pub struct NoopNotifier;

impl MailNotifier for NoopNotifier {}
