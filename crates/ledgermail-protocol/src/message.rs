//! The mail message envelope and its content-addressed identifier.
//!
//! A [`Message`] is the object exchanged with mail servers and stored
//! in the archive. Its [`id`](Message::id) is a 160-bit SHA3-256 digest
//! over the canonical field serialization, so it changes whenever the
//! `timestamp` or `nonce` changes. That makes the id double as the
//! proof-of-work hash: grinding the nonce moves the id until it falls
//! at or below the [`PowTarget`](ledgermail_types::PowTarget).
//!
//! Payloads ([`SignedEmail`], [`TransactionNotice`]) are bincode-encoded
//! into the envelope's `data` field. Encrypted envelopes carry opaque
//! ciphertext produced and consumed by the wallet.

use ledgermail_types::{Address, MailError, MessageId, PublicKey, Result, Timestamp};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Truncates a SHA3-256 digest to the 160-bit id width.
fn truncate_digest(digest: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[..20]);
    out
}

/// Computes the 160-bit hash-address of a public key.
pub fn key_address(key: &PublicKey) -> Address {
    let digest = Sha3_256::digest(key.as_bytes());
    Address::new(truncate_digest(&digest))
}

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// Classifies the content carried in a message envelope.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A plaintext signed email payload.
    Email,
    /// A plaintext transaction notice payload.
    TransactionNotice,
    /// Opaque ciphertext; only the wallet can open it.
    Encrypted,
}

impl MessageKind {
    /// Stable tag byte used in the content hash.
    fn tag(&self) -> u8 {
        match self {
            Self::Email => 0,
            Self::TransactionNotice => 1,
            Self::Encrypted => 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// The on-the-wire mail object.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Payload classification.
    pub kind: MessageKind,
    /// The recipient's public key.
    pub recipient: PublicKey,
    /// Content timestamp; refreshed during proof of work so servers can
    /// enforce freshness.
    pub timestamp: Timestamp,
    /// Proof-of-work nonce; ground until the id meets the target.
    pub nonce: u64,
    /// Payload bytes; bincode-encoded plaintext or wallet ciphertext.
    pub data: Vec<u8>,
}

impl Message {
    /// Creates an envelope with a fresh timestamp and a random starting
    /// nonce.
    ///
    /// Randomizing the starting nonce keeps two submissions of the same
    /// payload from grinding the same hash sequence.
    pub fn new(kind: MessageKind, recipient: PublicKey, data: Vec<u8>) -> Self {
        Self {
            kind,
            recipient,
            timestamp: Timestamp::now(),
            nonce: rand::thread_rng().next_u64(),
            data,
        }
    }

    /// Builds a signed-email envelope from its payload.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Protocol`] if the payload cannot be encoded.
    pub fn from_email(recipient: PublicKey, payload: &SignedEmail) -> Result<Self> {
        Ok(Self::new(MessageKind::Email, recipient, encode_payload(payload)?))
    }

    /// Builds a transaction-notice envelope from its payload.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Protocol`] if the payload cannot be encoded.
    pub fn from_transaction_notice(recipient: PublicKey, payload: &TransactionNotice) -> Result<Self> {
        Ok(Self::new(MessageKind::TransactionNotice, recipient, encode_payload(payload)?))
    }

    /// Computes the content-addressed 160-bit identifier.
    ///
    /// The digest covers every envelope field in a fixed order, so any
    /// change to `timestamp` or `nonce` produces a new id. This is the
    /// value compared against the proof-of-work target and the key under
    /// which servers store the message.
    pub fn id(&self) -> MessageId {
        let mut hasher = Sha3_256::new();
        hasher.update([self.kind.tag()]);
        hasher.update(self.recipient.as_bytes());
        hasher.update(self.timestamp.be_bytes());
        hasher.update(self.nonce.to_le_bytes());
        hasher.update(&self.data);
        MessageId::new(truncate_digest(&hasher.finalize()))
    }

    /// Decodes the payload as a [`SignedEmail`].
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Protocol`] if the envelope is not an email
    /// or the payload fails to decode.
    pub fn as_email(&self) -> Result<SignedEmail> {
        if self.kind != MessageKind::Email {
            return Err(MailError::Protocol {
                reason: format!("expected email payload, found {:?}", self.kind),
            });
        }
        decode_payload(&self.data)
    }

    /// Decodes the payload as a [`TransactionNotice`].
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Protocol`] if the envelope is not a notice
    /// or the payload fails to decode.
    pub fn as_transaction_notice(&self) -> Result<TransactionNotice> {
        if self.kind != MessageKind::TransactionNotice {
            return Err(MailError::Protocol {
                reason: format!("expected transaction notice payload, found {:?}", self.kind),
            });
        }
        decode_payload(&self.data)
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Plaintext email payload, signed by the sender's key.
///
/// The signature is opaque to the mail core; the wallet recovers the
/// sender's key from it when labelling fetched mail.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SignedEmail {
    /// Subject line.
    pub subject: String,
    /// Body text.
    pub body: String,
    /// Id of the message this replies to, if any.
    pub reply_to: Option<MessageId>,
    /// Sender signature over the payload.
    pub signature: Vec<u8>,
}

/// Plaintext transaction-notice payload.
///
/// Carries a serialized transaction for the wallet to scan, alongside
/// an optional memo from the sender.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TransactionNotice {
    /// The serialized transaction.
    pub transaction: Vec<u8>,
    /// Optional memo accompanying the notice.
    pub memo: Option<String>,
    /// Sender signature over the payload.
    pub signature: Vec<u8>,
}

fn encode_payload<T: Serialize>(payload: &T) -> Result<Vec<u8>> {
    bincode::serialize(payload).map_err(|e| MailError::Protocol {
        reason: format!("failed to encode payload: {e}"),
    })
}

fn decode_payload<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T> {
    bincode::deserialize(data).map_err(|e| MailError::Protocol {
        reason: format!("failed to decode payload: {e}"),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ledgermail_types::PowTarget;

    fn test_message() -> Message {
        Message {
            kind: MessageKind::Encrypted,
            recipient: PublicKey::new([0x11u8; 32]),
            timestamp: Timestamp::from_secs(1_700_000_000),
            nonce: 7,
            data: b"ciphertext".to_vec(),
        }
    }

    #[test]
    fn id_is_deterministic() {
        assert_eq!(test_message().id(), test_message().id());
    }

    #[test]
    fn id_changes_with_nonce() {
        let mut msg = test_message();
        let before = msg.id();
        msg.nonce += 1;
        assert_ne!(before, msg.id());
    }

    #[test]
    fn id_changes_with_timestamp() {
        let mut msg = test_message();
        let before = msg.id();
        msg.timestamp = Timestamp::from_secs(1_700_000_001);
        assert_ne!(before, msg.id());
    }

    #[test]
    fn id_changes_with_payload() {
        let mut msg = test_message();
        let before = msg.id();
        msg.data.push(0);
        assert_ne!(before, msg.id());
    }

    #[test]
    fn permissive_target_admits_any_id() {
        let target = PowTarget::new([0xFFu8; 20]);
        assert!(target.admits(&test_message().id()));
    }

    #[test]
    fn email_payload_roundtrip() -> Result<()> {
        let payload = SignedEmail {
            subject: "hello".into(),
            body: "world".into(),
            reply_to: None,
            signature: vec![1, 2, 3],
        };
        let msg = Message::from_email(PublicKey::new([0x22u8; 32]), &payload)?;
        assert_eq!(msg.kind, MessageKind::Email);
        assert_eq!(msg.as_email()?, payload);
        Ok(())
    }

    #[test]
    fn notice_payload_roundtrip() -> Result<()> {
        let payload = TransactionNotice {
            transaction: vec![9, 9, 9],
            memo: Some("for rent".into()),
            signature: vec![4, 5, 6],
        };
        let msg = Message::from_transaction_notice(PublicKey::new([0x33u8; 32]), &payload)?;
        assert_eq!(msg.as_transaction_notice()?, payload);
        Ok(())
    }

    #[test]
    fn payload_kind_mismatch_rejected() {
        let msg = test_message();
        assert!(msg.as_email().is_err());
        assert!(msg.as_transaction_notice().is_err());
    }

    #[test]
    fn fresh_envelopes_get_distinct_nonces() {
        let a = Message::new(MessageKind::Encrypted, PublicKey::default(), vec![]);
        let b = Message::new(MessageKind::Encrypted, PublicKey::default(), vec![]);
        // Random 64-bit starting nonces; a collision here means the RNG
        // is broken.
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn key_address_is_stable() {
        let key = PublicKey::new([0x44u8; 32]);
        assert_eq!(key_address(&key), key_address(&key));
        assert_ne!(key_address(&key), key_address(&PublicKey::new([0x45u8; 32])));
    }
}
