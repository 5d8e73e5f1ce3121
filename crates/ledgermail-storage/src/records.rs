//! Persisted record shapes for the processing and archive stores.

use std::collections::BTreeSet;

use ledgermail_protocol::message::{key_address, Message, MessageKind};
use ledgermail_types::{
    Address, EmailHeader, MailServer, MailStatus, MessageId, PowTarget, PublicKey,
};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ProcessingRecord
// ---------------------------------------------------------------------------

/// An outbound message moving through the send pipeline.
///
/// Keyed in the processing store by `id`, the **static** id frozen from
/// the content hash at submission time. Proof of work keeps mutating
/// `content`, so `content.id()` drifts away from `id` until
/// finalization re-keys the record into the archive under the final
/// content hash.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessingRecord {
    /// Static id; the processing-store key.
    pub id: MessageId,
    /// Pipeline state.
    pub status: MailStatus,
    /// Sender account name.
    pub sender: String,
    /// Recipient account name.
    pub recipient: String,
    /// Recipient public key the content was encrypted to.
    pub recipient_key: PublicKey,
    /// The message envelope; mutated by proof of work.
    pub content: Message,
    /// Servers to replicate to, resolved once at submission so later
    /// stages are immune to directory churn. After transmission,
    /// narrowed to the servers that confirmed storage.
    pub mail_servers: BTreeSet<MailServer>,
    /// Proof-of-work difficulty threshold for this message.
    pub pow_target: Option<PowTarget>,
    /// Why the message failed, when `status` is `Failed`.
    pub failure_reason: Option<String>,
}

impl ProcessingRecord {
    /// Creates a freshly submitted record; the static id is the
    /// content's hash at this instant.
    pub fn new(sender: String, recipient: String, recipient_key: PublicKey, content: Message) -> Self {
        Self {
            id: content.id(),
            status: MailStatus::Submitted,
            sender,
            recipient,
            recipient_key,
            content,
            mail_servers: BTreeSet::new(),
            pow_target: None,
            failure_reason: None,
        }
    }

    /// Projects the record into a summary header.
    pub fn header(&self) -> EmailHeader {
        EmailHeader {
            id: self.id,
            sender: self.sender.clone(),
            recipient: self.recipient.clone(),
            subject: plaintext_subject(&self.content),
            timestamp: self.content.timestamp,
        }
    }
}

// ---------------------------------------------------------------------------
// ArchiveRecord
// ---------------------------------------------------------------------------

/// A finalized or fetched message at rest in the archive.
///
/// Keyed by the **final** content hash. Retains only the recipient's
/// hash-address; that is enough to request decryption from the wallet
/// without holding the full key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveRecord {
    /// Final content id; the archive-store key.
    pub id: MessageId,
    /// `Accepted` for mail this client sent, `Received` for fetched
    /// mail; an accepted record flips to `Received` when it is later
    /// seen on a server.
    pub status: MailStatus,
    /// Sender account name.
    pub sender: String,
    /// Recipient account name.
    pub recipient: String,
    /// Hash-address of the recipient's public key.
    pub recipient_address: Address,
    /// The message envelope, ciphertext included.
    pub content: Message,
    /// Servers known to hold this message.
    pub mail_servers: BTreeSet<MailServer>,
}

impl ArchiveRecord {
    /// Re-keys a finished processing record for the archive.
    pub fn from_processing(record: ProcessingRecord) -> Self {
        Self {
            id: record.content.id(),
            status: record.status,
            sender: record.sender,
            recipient: record.recipient,
            recipient_address: key_address(&record.recipient_key),
            content: record.content,
            mail_servers: record.mail_servers,
        }
    }

    /// Builds a record for a message fetched from a server.
    pub fn from_fetched(content: Message, header: &EmailHeader, recipient_address: Address) -> Self {
        Self {
            id: content.id(),
            status: MailStatus::Received,
            sender: header.sender.clone(),
            recipient: header.recipient.clone(),
            recipient_address,
            content,
            mail_servers: BTreeSet::new(),
        }
    }

    /// Projects the record into a summary header.
    pub fn header(&self) -> EmailHeader {
        EmailHeader {
            id: self.id,
            sender: self.sender.clone(),
            recipient: self.recipient.clone(),
            subject: plaintext_subject(&self.content),
            timestamp: self.content.timestamp,
        }
    }
}

/// Subject line of a plaintext envelope: the email's subject, the
/// fixed notice subject, or empty for anything the wallet has not
/// opened.
fn plaintext_subject(content: &Message) -> String {
    match content.kind {
        MessageKind::Email => content
            .as_email()
            .map(|email| email.subject)
            .unwrap_or_default(),
        MessageKind::TransactionNotice => "Transaction Notification".to_string(),
        MessageKind::Encrypted => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ciphertext_message() -> Message {
        Message::new(MessageKind::Encrypted, PublicKey::new([0x10u8; 32]), vec![1, 2, 3])
    }

    #[test]
    fn static_id_frozen_at_submission() {
        let content = ciphertext_message();
        let mut record = ProcessingRecord::new(
            "alice".into(),
            "bob".into(),
            PublicKey::new([0x10u8; 32]),
            content,
        );
        let static_id = record.id;

        record.content.nonce += 1;
        assert_eq!(record.id, static_id);
        assert_ne!(record.content.id(), static_id);
    }

    #[test]
    fn archive_rekeys_under_final_content_id() {
        let mut record = ProcessingRecord::new(
            "alice".into(),
            "bob".into(),
            PublicKey::new([0x10u8; 32]),
            ciphertext_message(),
        );
        record.content.nonce += 7;
        record.status = MailStatus::Accepted;
        let final_id = record.content.id();

        let archived = ArchiveRecord::from_processing(record);
        assert_eq!(archived.id, final_id);
        assert_eq!(archived.status, MailStatus::Accepted);
    }

    #[test]
    fn archive_keeps_address_not_key() {
        let key = PublicKey::new([0x77u8; 32]);
        let record = ProcessingRecord::new("a".into(), "b".into(), key, ciphertext_message());
        let archived = ArchiveRecord::from_processing(record);
        assert_eq!(archived.recipient_address, key_address(&key));
    }

    #[test]
    fn notice_header_carries_fixed_subject() {
        use ledgermail_protocol::message::TransactionNotice;

        let content = Message::from_transaction_notice(
            PublicKey::new([0x55u8; 32]),
            &TransactionNotice {
                transaction: vec![1, 2, 3],
                memo: None,
                signature: vec![9],
            },
        )
        .expect("notice envelope");
        let mut record =
            ProcessingRecord::new("a".into(), "b".into(), PublicKey::new([0x55u8; 32]), content);
        assert_eq!(record.header().subject, "Transaction Notification");

        record.status = MailStatus::Accepted;
        let archived = ArchiveRecord::from_processing(record);
        assert_eq!(archived.header().subject, "Transaction Notification");
    }

    #[test]
    fn fetched_record_is_received() {
        let content = ciphertext_message();
        let header = EmailHeader {
            id: content.id(),
            sender: "carol".into(),
            recipient: "dave".into(),
            subject: "hi".into(),
            timestamp: content.timestamp,
        };
        let record = ArchiveRecord::from_fetched(content, &header, Address::new([2u8; 20]));
        assert_eq!(record.status, MailStatus::Received);
        assert!(record.mail_servers.is_empty());
    }
}
