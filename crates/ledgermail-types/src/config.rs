//! Mail client configuration with documented defaults.
//!
//! All operational parameters are centralized here and injected at
//! construction; nothing in the pipeline reads process-wide state.

use serde::{Deserialize, Serialize};

use crate::{MailError, PowTarget, Result};

/// Default proof-of-work target, hex `000ffffffdeadbeefffff...ffff`.
///
/// Roughly 12 leading zero bits; a few thousand hash attempts on
/// average. The protocol reserves negotiating per-server difficulty
/// and taking the minimum, so this constant is a floor, not a policy.
pub const DEFAULT_POW_TARGET: PowTarget = PowTarget::new([
    0x00, 0x0f, 0xff, 0xff, 0xfd, 0xea, 0xdb, 0xee, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff,
]);

/// Mail client configuration.
///
/// Defaults match the protocol constants; tests shrink the timeouts and
/// harden or relax the proof-of-work target as needed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MailConfig {
    /// Proof-of-work difficulty threshold for outbound messages.
    pub pow_target: PowTarget,

    /// Server account names used when a recipient has not published a
    /// `mail_servers` list, or when the directory lookup fails.
    pub default_mail_servers: Vec<String>,

    /// Overall replication timeout per outbound message, in seconds.
    pub transmit_timeout_secs: u64,

    /// Overall inventory-fetch timeout per account, in seconds.
    pub fetch_timeout_secs: u64,

    /// Length of one proof-of-work grinding slice, in milliseconds.
    /// Bounds cancellation latency and the content timestamp's staleness.
    pub pow_slice_millis: u64,

    /// Maximum inventory entries requested per page. Paging continues
    /// while a server returns exactly this many entries.
    pub inventory_page_size: usize,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            pow_target: DEFAULT_POW_TARGET,
            default_mail_servers: Vec::new(),
            transmit_timeout_secs: 10,
            fetch_timeout_secs: 60,
            pow_slice_millis: 1_000,
            inventory_page_size: 1_000,
        }
    }
}

impl MailConfig {
    /// Validates all configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Config`] if any value is outside its
    /// acceptable range.
    pub fn validate(&self) -> Result<()> {
        if self.transmit_timeout_secs == 0 {
            return Err(MailError::Config {
                reason: "transmit_timeout_secs must be greater than 0".into(),
            });
        }

        if self.fetch_timeout_secs == 0 {
            return Err(MailError::Config {
                reason: "fetch_timeout_secs must be greater than 0".into(),
            });
        }

        if self.pow_slice_millis == 0 {
            return Err(MailError::Config {
                reason: "pow_slice_millis must be greater than 0".into(),
            });
        }

        if self.inventory_page_size == 0 {
            return Err(MailError::Config {
                reason: "inventory_page_size must be greater than 0".into(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(MailConfig::default().validate().is_ok());
    }

    #[test]
    fn default_target_matches_protocol_constant() {
        assert_eq!(
            DEFAULT_POW_TARGET.to_string(),
            "000ffffffdeadbeeffffffffffffffffffffffff",
        );
    }

    #[test]
    fn zero_page_size_rejected() {
        let config = MailConfig {
            inventory_page_size: 0,
            ..MailConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_timeout_rejected() {
        let config = MailConfig {
            transmit_timeout_secs: 0,
            ..MailConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
