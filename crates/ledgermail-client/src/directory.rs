//! Account directory collaborator and mail-server resolution.
//!
//! The blockchain account directory is reached through the
//! [`Directory`] trait. [`resolve_mail_servers`] turns a recipient name
//! into the set of `(server name, endpoint)` pairs to replicate to:
//!
//! 1. Unknown recipient, or a failed lookup, falls back to the
//!    configured default server names.
//! 2. A recipient without a usable `mail_servers` publication also
//!    falls back to the defaults.
//! 3. Each server name resolves through its own `mail_server_endpoint`
//!    publication; servers that cannot be resolved are skipped.
//!
//! Resolution is pure with respect to directory state. Callers cache
//! the result on the processing record so later pipeline stages are
//! immune to directory churn.

use std::collections::BTreeSet;

use ledgermail_types::config::MailConfig;
use ledgermail_types::{MailServer, Result, Timestamp};
use serde_json::Value;

/// Metadata field naming a recipient's preferred mail servers.
const FIELD_MAIL_SERVERS: &str = "mail_servers";

/// Metadata field naming a server account's network endpoint.
const FIELD_ENDPOINT: &str = "mail_server_endpoint";

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// A registered account as published on the chain.
#[derive(Clone, Debug)]
pub struct AccountRecord {
    /// The account name.
    pub name: String,
    /// When the account was registered.
    pub registered_at: Timestamp,
    /// Free-form published metadata.
    pub public_data: Value,
}

/// Read access to the blockchain account directory.
pub trait Directory: Send + Sync {
    /// Looks up an account by name; `Ok(None)` when unregistered.
    fn account(&self, name: &str) -> Result<Option<AccountRecord>>;

    /// The network's notion of the current time, used for fetch
    /// watermarks.
    fn now(&self) -> Timestamp;
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Returns the server account names a recipient's mail should go to.
fn server_names_for_recipient(
    directory: &dyn Directory,
    config: &MailConfig,
    recipient: &str,
) -> Vec<String> {
    let account = match directory.account(recipient) {
        Ok(Some(account)) => account,
        Ok(None) => return config.default_mail_servers.clone(),
        Err(e) => {
            tracing::error!(recipient, %e, "error while getting mail servers");
            return config.default_mail_servers.clone();
        }
    };

    if let Some(names) = account.public_data.get(FIELD_MAIL_SERVERS) {
        match serde_json::from_value::<Vec<String>>(names.clone()) {
            Ok(names) => return names,
            Err(e) => {
                tracing::error!(recipient, %e, "malformed mail_servers publication");
            }
        }
    }

    tracing::info!(
        recipient,
        "recipient has not published preferred mail servers, using defaults"
    );
    config.default_mail_servers.clone()
}

/// Resolves the full replication set for a recipient.
///
/// Server names that do not resolve to an endpoint are dropped:
/// missing accounts and malformed endpoints silently, lookup errors
/// with a log line. The result may be empty; the pipeline fails such
/// messages with a dedicated reason.
pub fn resolve_mail_servers(
    directory: &dyn Directory,
    config: &MailConfig,
    recipient: &str,
) -> BTreeSet<MailServer> {
    let mut servers = BTreeSet::new();

    for name in server_names_for_recipient(directory, config, recipient) {
        let account = match directory.account(&name) {
            Ok(Some(account)) => account,
            Ok(None) => continue,
            Err(e) => {
                tracing::error!(server = %name, %e, "error while resolving mail server endpoint");
                continue;
            }
        };

        let endpoint = account
            .public_data
            .get(FIELD_ENDPOINT)
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse().ok());

        if let Some(endpoint) = endpoint {
            servers.insert(MailServer { name, endpoint });
        }
    }

    servers
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
