//! TCP peer speaking the mail-server JSON-RPC line protocol.
//!
//! One [`MailPeer`] wraps one connection. Each call writes the request
//! as a single JSON line and reads back a single JSON line. The socket
//! is owned by the task that opened it and closes on every exit path
//! when the peer is dropped.

use std::net::SocketAddr;

use ledgermail_protocol::{RpcRequest, RpcResponse};
use ledgermail_types::{MailError, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// A connected mail-server peer.
pub(crate) struct MailPeer {
    stream: BufReader<TcpStream>,
}

impl MailPeer {
    /// Opens a connection to a mail server.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Peer`] on connect failure.
    pub(crate) async fn connect(endpoint: &SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(endpoint)
            .await
            .map_err(|e| MailError::Peer {
                reason: format!("failed to connect to {endpoint}: {e}"),
            })?;
        Ok(Self {
            stream: BufReader::new(stream),
        })
    }

    /// Performs one request/response exchange.
    ///
    /// A response id that does not echo the request id is logged and
    /// tolerated; the response is used anyway.
    ///
    /// # Errors
    ///
    /// - [`MailError::Peer`] on write, read, or connection-closed
    ///   failures.
    /// - [`MailError::Protocol`] if either line fails to (de)serialize.
    pub(crate) async fn call(&mut self, request: RpcRequest) -> Result<RpcResponse> {
        let mut line = serde_json::to_string(&request).map_err(|e| MailError::Protocol {
            reason: format!("failed to encode rpc request: {e}"),
        })?;
        line.push('\n');

        self.stream
            .write_all(line.as_bytes())
            .await
            .map_err(|e| MailError::Peer {
                reason: format!("failed to send rpc request: {e}"),
            })?;
        self.stream.flush().await.map_err(|e| MailError::Peer {
            reason: format!("failed to flush rpc request: {e}"),
        })?;

        let mut raw = String::new();
        let read = self
            .stream
            .read_line(&mut raw)
            .await
            .map_err(|e| MailError::Peer {
                reason: format!("failed to read rpc response: {e}"),
            })?;
        if read == 0 {
            return Err(MailError::Peer {
                reason: "server closed the connection".into(),
            });
        }

        let response: RpcResponse =
            serde_json::from_str(raw.trim_end()).map_err(|e| MailError::Protocol {
                reason: format!("failed to decode rpc response: {e}"),
            })?;

        if response.id != request.id {
            tracing::warn!(
                expected = request.id,
                got = response.id,
                "server response has wrong id, attempting to press on"
            );
        }

        Ok(response)
    }
}
