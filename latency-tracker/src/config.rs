//! Tracker configuration.
//!
//! Timing parameters for the retry/timeout scheduler, retention limits for
//! slot records, and the cadence at which read-side snapshots are published.

use {crate::types::CommitmentTier, solana_pubkey::Pubkey};

/// Configuration for the latency tracker.
///
/// All durations are in milliseconds.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// How long a submitted transaction may stay pending before it is
    /// declared timed out.
    /// Default: 45000.
    pub send_timeout_ms: u64,

    /// Interval between resends of a pending transaction.
    /// Default: 500.
    pub retry_interval_ms: u64,

    /// Whether pending transactions are resent at all.
    /// Default: true.
    pub retry_enabled: bool,

    /// Maximum number of slot timing records kept in memory. Older slots are
    /// evicted first, except slots still referenced as the landed slot of a
    /// successful transaction.
    /// Default: 4096.
    pub max_tracked_slots: usize,

    /// Minimum interval between two published snapshots.
    /// Default: 10.
    pub snapshot_interval_ms: u64,

    /// Commitment tier whose durations feed the average confirmation time.
    /// Default: `Confirmed`.
    pub reporting_tier: CommitmentTier,

    /// Capacity of the event queue feeding the service thread.
    /// Default: 10000.
    pub channel_capacity: usize,

    /// Upper bound on how long the service blocks waiting for an event when
    /// no timer is due, so that it stays responsive to exit.
    /// Default: 50.
    pub idle_poll_interval_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: 45_000,
            retry_interval_ms: 500,
            retry_enabled: true,
            max_tracked_slots: 4_096,
            snapshot_interval_ms: 10,
            reporting_tier: CommitmentTier::Confirmed,
            channel_capacity: 10_000,
            idle_poll_interval_ms: 50,
        }
    }
}

impl TrackerConfig {
    /// Create a config suitable for local testing with short timers.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default() -> Self {
        Self {
            send_timeout_ms: 2_000,
            retry_interval_ms: 100,
            retry_enabled: true,
            max_tracked_slots: 64,
            snapshot_interval_ms: 0,
            reporting_tier: CommitmentTier::Confirmed,
            channel_capacity: 1_000,
            idle_poll_interval_ms: 5,
        }
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.send_timeout_ms == 0 {
            return Err(ConfigError::InvalidSendTimeout);
        }
        if self.retry_enabled && self.retry_interval_ms == 0 {
            return Err(ConfigError::InvalidRetryInterval);
        }
        if self.max_tracked_slots == 0 {
            return Err(ConfigError::InvalidSlotRetention);
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidChannelCapacity);
        }
        Ok(())
    }
}

/// Accounts used to build transactions.
///
/// Tracking id `t` is assigned to account index `t % n` and carries the
/// per-account bit id `t / n`, where `n` is the number of accounts.
#[derive(Debug, Clone)]
pub struct AccountsConfig {
    /// Fee payers, one per program data account.
    pub fee_accounts: Vec<Pubkey>,
    /// Program data accounts written by the transactions.
    pub program_accounts: Vec<Pubkey>,
    /// Number of transactions each program data account can record.
    pub account_capacity: u64,
}

impl AccountsConfig {
    /// Number of account partitions.
    pub fn partition_count(&self) -> u64 {
        self.program_accounts.len() as u64
    }

    /// Total number of transactions that can be created.
    pub fn total_capacity(&self) -> u64 {
        self.account_capacity.saturating_mul(self.partition_count())
    }

    /// Validate that fee and program accounts pair up.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.program_accounts.is_empty() {
            return Err(ConfigError::NoAccounts);
        }
        if self.fee_accounts.len() != self.program_accounts.len() {
            return Err(ConfigError::AccountCountMismatch {
                fee_accounts: self.fee_accounts.len(),
                program_accounts: self.program_accounts.len(),
            });
        }
        Ok(())
    }
}

/// Errors in tracker configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("send_timeout_ms must be > 0")]
    InvalidSendTimeout,
    #[error("retry_interval_ms must be > 0 when retries are enabled")]
    InvalidRetryInterval,
    #[error("max_tracked_slots must be > 0")]
    InvalidSlotRetention,
    #[error("channel_capacity must be > 0")]
    InvalidChannelCapacity,
    #[error("at least one program account is required")]
    NoAccounts,
    #[error("{fee_accounts} fee accounts do not match {program_accounts} program accounts")]
    AccountCountMismatch {
        fee_accounts: usize,
        program_accounts: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TrackerConfig::default();
        assert_eq!(config.send_timeout_ms, 45_000);
        assert_eq!(config.retry_interval_ms, 500);
        assert!(config.retry_enabled);
        assert_eq!(config.snapshot_interval_ms, 10);
        assert_eq!(config.reporting_tier, CommitmentTier::Confirmed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_dev_config_is_valid() {
        assert!(TrackerConfig::dev_default().validate().is_ok());
    }

    #[test]
    fn test_invalid_send_timeout() {
        let config = TrackerConfig {
            send_timeout_ms: 0,
            ..TrackerConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidSendTimeout));
    }

    #[test]
    fn test_zero_retry_interval_only_matters_when_enabled() {
        let mut config = TrackerConfig {
            retry_interval_ms: 0,
            ..TrackerConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidRetryInterval));
        config.retry_enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_slot_retention() {
        let config = TrackerConfig {
            max_tracked_slots: 0,
            ..TrackerConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidSlotRetention));
    }

    #[test]
    fn test_accounts_capacity() {
        let accounts = AccountsConfig {
            fee_accounts: vec![Pubkey::new_from_array([1; 32]); 3],
            program_accounts: vec![Pubkey::new_from_array([2; 32]); 3],
            account_capacity: 800,
        };
        assert!(accounts.validate().is_ok());
        assert_eq!(accounts.partition_count(), 3);
        assert_eq!(accounts.total_capacity(), 2_400);
    }

    #[test]
    fn test_accounts_mismatch() {
        let accounts = AccountsConfig {
            fee_accounts: vec![Pubkey::new_from_array([1; 32])],
            program_accounts: vec![Pubkey::new_from_array([2; 32]); 2],
            account_capacity: 10,
        };
        assert_eq!(
            accounts.validate(),
            Err(ConfigError::AccountCountMismatch {
                fee_accounts: 1,
                program_accounts: 2,
            })
        );
        let empty = AccountsConfig {
            fee_accounts: vec![],
            program_accounts: vec![],
            account_capacity: 10,
        };
        assert_eq!(empty.validate(), Err(ConfigError::NoAccounts));
    }
}
