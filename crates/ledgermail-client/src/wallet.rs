//! Wallet collaborator trait.
//!
//! All key material and cryptography live behind this boundary: the
//! mail core never decrypts, signs, or recovers keys itself. The real
//! implementation wraps the user's wallet; tests supply stubs.

use ledgermail_protocol::Message;
use ledgermail_types::{Address, PublicKey, Result, Timestamp};

/// A local account eligible to receive mail.
#[derive(Clone, Debug)]
pub struct WalletAccount {
    /// The account's registered name.
    pub name: String,
    /// The account's hash-address, under which servers index its mail.
    pub address: Address,
    /// When the account was registered; the fetch watermark for an
    /// account that has never fetched before.
    pub registered_at: Timestamp,
}

/// Cryptographic operations delegated to the wallet.
pub trait Wallet: Send + Sync {
    /// Enumerates the local accounts mail is fetched for.
    fn accounts(&self) -> Result<Vec<WalletAccount>>;

    /// Decrypts an envelope addressed to one of our accounts,
    /// identified by its hash-address.
    fn open_mail(&self, recipient: &Address, content: &Message) -> Result<Message>;

    /// Decrypts an envelope using the full recipient key retained on an
    /// in-flight outbound record.
    fn open_mail_with_key(&self, recipient_key: &PublicKey, content: &Message) -> Result<Message>;

    /// Recovers the sender's key from a plaintext payload's signature
    /// and returns its label.
    ///
    /// # Errors
    ///
    /// Fails when the signature does not verify; the fetch pipeline
    /// degrades the sender to `"INVALID SIGNATURE"` in that case.
    fn sender_label(&self, plaintext: &Message) -> Result<String>;

    /// Scans a transaction embedded in a transaction notice.
    fn scan_transaction(&self, transaction: &[u8]) -> Result<()>;
}
