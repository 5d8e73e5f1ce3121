//! Message envelope and mail-server wire protocol.
//!
//! [`message`] defines the on-the-wire mail object and its
//! content-addressed identifier, which doubles as the proof-of-work
//! hash. [`rpc`] defines the line-delimited JSON-RPC request and
//! response shapes the mail servers speak.

pub mod message;
pub mod rpc;

pub use message::{key_address, Message, MessageKind, SignedEmail, TransactionNotice};
pub use rpc::{to_value, RpcRequest, RpcResponse};
