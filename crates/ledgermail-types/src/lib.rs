//! Core shared types for the Ledgermail decentralized mail client.
//!
//! This crate defines all fundamental types used across the workspace.
//! No other crate should define shared types; everything lives here.

pub mod config;

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// MessageId
// ---------------------------------------------------------------------------

/// 160-bit content-addressed message identifier.
///
/// Computed as the truncated SHA3-256 hash of a serialized message
/// envelope. Doubles as the proof-of-work hash: a message is acceptable
/// when its id is numerically at or below the [`PowTarget`]. The same
/// 20-byte shape also serves as the stable key of an in-flight record,
/// frozen at submission time while the envelope's hash keeps moving.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct MessageId([u8; 20]);

impl MessageId {
    /// The fixed byte length of a message id.
    pub const LEN: usize = 20;

    /// Creates a new `MessageId` from raw bytes.
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Returns the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl From<[u8; 20]> for MessageId {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for MessageId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for MessageId {
    type Err = MailError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| MailError::Protocol {
            reason: "invalid hex encoding for message id".into(),
        })?;
        if bytes.len() != Self::LEN {
            return Err(MailError::Protocol {
                reason: format!("expected {} bytes for message id, got {}", Self::LEN, bytes.len()),
            });
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// 160-bit hash-address of a public key.
///
/// Sufficient to request decryption from the wallet without retaining
/// the full key, and the identity under which a server indexes mail.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Address([u8; 20]);

impl Address {
    /// The fixed byte length of an address.
    pub const LEN: usize = 20;

    /// Creates a new `Address` from raw bytes.
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Returns the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = MailError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| MailError::Protocol {
            reason: "invalid hex encoding for address".into(),
        })?;
        if bytes.len() != Self::LEN {
            return Err(MailError::Protocol {
                reason: format!("expected {} bytes for address, got {}", Self::LEN, bytes.len()),
            });
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

/// Opaque 32-byte public key.
///
/// All key operations (encryption, decryption, signature recovery,
/// labelling) live behind the wallet boundary; the mail core only
/// stamps keys into envelopes and records.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// The fixed byte length of a public key.
    pub const LEN: usize = 32;

    /// Creates a new `PublicKey` from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for PublicKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// ---------------------------------------------------------------------------
// PowTarget
// ---------------------------------------------------------------------------

/// 160-bit proof-of-work difficulty threshold.
///
/// A message envelope satisfies the target when its content id,
/// interpreted as a big-endian integer, is at or below this value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct PowTarget([u8; 20]);

impl PowTarget {
    /// Creates a new `PowTarget` from raw bytes.
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Returns the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Whether `id` satisfies this target (numerically at or below it).
    pub fn admits(&self, id: &MessageId) -> bool {
        id.as_bytes() <= &self.0
    }
}

impl fmt::Display for PowTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for PowTarget {
    type Err = MailError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| MailError::Config {
            reason: "invalid hex encoding for proof-of-work target".into(),
        })?;
        if bytes.len() != 20 {
            return Err(MailError::Config {
                reason: format!("expected 20 bytes for proof-of-work target, got {}", bytes.len()),
            });
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

// ---------------------------------------------------------------------------
// Timestamp
// ---------------------------------------------------------------------------

/// UTC timestamp with one-second resolution.
///
/// Second resolution matches the wire protocol's inventory watermarks.
/// The big-endian byte encoding sorts identically to the numeric value,
/// which keeps timestamp-prefixed store keys in chronological order.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a `Timestamp` for the current wall-clock time.
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp())
    }

    /// Creates a `Timestamp` from UTC seconds.
    pub fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    /// Returns the timestamp as UTC seconds.
    pub fn as_secs(&self) -> i64 {
        self.0
    }

    /// Returns the 8-byte big-endian encoding used in ordered keys.
    pub fn be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match chrono::DateTime::from_timestamp(self.0, 0) {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}s", self.0),
        }
    }
}

// ---------------------------------------------------------------------------
// MailServer
// ---------------------------------------------------------------------------

/// A mail server as resolved from the account directory.
///
/// Pairs the server's account name with its published network endpoint.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct MailServer {
    /// The server's registered account name.
    pub name: String,
    /// The server's published TCP endpoint.
    pub endpoint: SocketAddr,
}

impl fmt::Display for MailServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.endpoint)
    }
}

// ---------------------------------------------------------------------------
// MailStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a mail record.
///
/// The variant order is significant: cancellation is only permitted at
/// or before `ProofOfWork`, and the transmit timeout only fails records
/// at or past `Transmitting`. The derived `Ord` encodes that policy.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum MailStatus {
    /// Persisted, awaiting server resolution and proof of work.
    Submitted,
    /// Grinding the content nonce toward the target.
    ProofOfWork,
    /// Replicating to the resolved server set.
    Transmitting,
    /// Stored on at least one server; awaiting finalization.
    Accepted,
    /// Fetched from a server into the local archive.
    Received,
    /// Terminal failure; see the record's failure reason.
    Failed,
    /// Cancellation requested; converted to `Failed` at the next
    /// pipeline checkpoint.
    Canceled,
}

impl fmt::Display for MailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted => write!(f, "submitted"),
            Self::ProofOfWork => write!(f, "proof_of_work"),
            Self::Transmitting => write!(f, "transmitting"),
            Self::Accepted => write!(f, "accepted"),
            Self::Received => write!(f, "received"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

// ---------------------------------------------------------------------------
// EmailHeader
// ---------------------------------------------------------------------------

/// Summary header for inbox listings and index queries.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct EmailHeader {
    /// The message's archive id.
    pub id: MessageId,
    /// Sender account name, or `"INVALID SIGNATURE"` when the sender's
    /// signature failed verification during fetch.
    pub sender: String,
    /// Recipient account name.
    pub recipient: String,
    /// Subject line; the literal `"Transaction Notification"` for
    /// transaction notices.
    pub subject: String,
    /// The plaintext content timestamp.
    pub timestamp: Timestamp,
}

// ---------------------------------------------------------------------------
// MailError
// ---------------------------------------------------------------------------

/// Central error type for the Ledgermail workspace.
///
/// All crates convert their internal errors into variants of this enum,
/// ensuring a unified error handling surface.
#[derive(Debug, Error)]
pub enum MailError {
    /// The mail store has not been opened yet.
    #[error("mail client is not open")]
    NotOpen,

    /// The on-disk database was written by an incompatible version.
    #[error("mail database is version {stored}, supported version is {supported}")]
    SchemaMismatch {
        /// Version found in the properties map.
        stored: i64,
        /// Version this build understands.
        supported: i64,
    },

    /// A message id was not found in any store.
    #[error("message {id} not found")]
    NotFound {
        /// The id that was looked up.
        id: MessageId,
    },

    /// An operation was attempted in an illegal record state.
    #[error("precondition failed: {reason}")]
    Precondition {
        /// Human-readable description of the violated precondition.
        reason: String,
    },

    /// A storage or database operation failed.
    #[error("storage error: {reason}")]
    Storage {
        /// Human-readable description of the storage failure.
        reason: String,
    },

    /// A network exchange with a mail server failed.
    #[error("peer error: {reason}")]
    Peer {
        /// Human-readable description of the peer failure.
        reason: String,
    },

    /// A wire message or stored value could not be encoded or decoded.
    #[error("protocol error: {reason}")]
    Protocol {
        /// Human-readable description of the protocol failure.
        reason: String,
    },

    /// The wallet rejected or failed an operation.
    #[error("wallet error: {reason}")]
    Wallet {
        /// Human-readable description of the wallet failure.
        reason: String,
    },

    /// The account directory rejected or failed a lookup.
    #[error("directory error: {reason}")]
    Directory {
        /// Human-readable description of the directory failure.
        reason: String,
    },

    /// A configuration value is invalid or missing.
    #[error("config error: {reason}")]
    Config {
        /// Human-readable description of the configuration problem.
        reason: String,
    },
}

/// Convenience result type using [`MailError`].
pub type Result<T> = std::result::Result<T, MailError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_roundtrip_hex() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let id = MessageId::new([0x42u8; 20]);
        let parsed: MessageId = id.to_string().parse()?;
        assert_eq!(id, parsed);
        Ok(())
    }

    #[test]
    fn message_id_invalid_hex_length() {
        let result: std::result::Result<MessageId, _> = "abcd".parse();
        assert!(result.is_err());
    }

    #[test]
    fn address_roundtrip_hex() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let addr = Address::new([0xABu8; 20]);
        let parsed: Address = addr.to_string().parse()?;
        assert_eq!(addr, parsed);
        Ok(())
    }

    #[test]
    fn pow_target_admits_boundary() {
        let target = PowTarget::new([0x0Fu8; 20]);
        assert!(target.admits(&MessageId::new([0x0Fu8; 20])));
        assert!(target.admits(&MessageId::new([0x00u8; 20])));

        let mut above = [0x0Fu8; 20];
        above[0] = 0x10;
        assert!(!target.admits(&MessageId::new(above)));
    }

    #[test]
    fn status_ordering_encodes_policy() {
        assert!(MailStatus::Submitted <= MailStatus::ProofOfWork);
        assert!(MailStatus::ProofOfWork < MailStatus::Transmitting);
        assert!(MailStatus::Accepted >= MailStatus::Transmitting);
        assert!(MailStatus::Canceled > MailStatus::ProofOfWork);
    }

    #[test]
    fn timestamp_be_bytes_order_matches_numeric() {
        let early = Timestamp::from_secs(1_000);
        let late = Timestamp::from_secs(2_000);
        assert!(early.be_bytes() < late.be_bytes());
        assert!(early < late);
    }

    #[test]
    fn timestamp_displays_rfc3339() {
        let ts = Timestamp::from_secs(0);
        assert!(ts.to_string().contains("1970"));
    }

    #[test]
    fn mail_server_serde_roundtrip() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let server = MailServer {
            name: "mailhub".into(),
            endpoint: "127.0.0.1:3151".parse()?,
        };
        let json = serde_json::to_string(&server)?;
        let parsed: MailServer = serde_json::from_str(&json)?;
        assert_eq!(server, parsed);
        Ok(())
    }

    #[test]
    fn error_display_carries_reason() {
        let err = MailError::Precondition {
            reason: "message has not failed".into(),
        };
        assert!(err.to_string().contains("message has not failed"));
    }
}
