//! The Ledgermail client core: outbound send pipeline, inbound fetch
//! pipeline, and the queries over the persistent message store.
//!
//! [`MailClient`] is the public facade. Submitted ciphertext moves
//! through a crash-durable state machine (submitted → proof of work →
//! transmitting → accepted) driven by serial supervisors; fetched mail
//! lands in the archive, the inbox, and the in-memory index. The
//! wallet, the account directory, and the notification sink are
//! injected behind traits; mail servers are reached over line-delimited
//! JSON-RPC.

pub mod client;
pub mod directory;
pub mod notify;
pub mod wallet;

mod fetch;
mod jobs;
mod peer;
mod pipeline;
mod pow;
mod transmit;

pub use client::{EmailRecord, MailClient};
pub use directory::{AccountRecord, Directory};
pub use notify::{MailNotifier, NoopNotifier};
pub use wallet::{Wallet, WalletAccount};
