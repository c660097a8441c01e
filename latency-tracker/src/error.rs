//! Error types for the latency tracker service.
//!
//! The registry and slot tracker never fail: stale or duplicate evidence is
//! absorbed as a no-op. Errors only surface at the service boundary, where
//! transactions are created and handed to the submitter.

use {crate::config::ConfigError, thiserror::Error};

/// Errors reported by the tracker service and its collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    /// All account slots have been used up.
    #[error("account capacity exceeded: {created} transactions created (capacity {capacity})")]
    CapacityExceeded {
        /// Transactions created so far.
        created: u64,
        /// Total capacity across all accounts.
        capacity: u64,
    },

    /// No slot has been observed yet, so there is no target slot to record.
    #[error("no target slot observed yet")]
    NoTargetSlot,

    /// No accounts have been configured for transaction creation.
    #[error("accounts not configured")]
    AccountsNotConfigured,

    /// The submitter failed to build or send a transaction.
    #[error("failed to submit transaction {tracking_id}: {reason}")]
    SubmitFailed {
        /// Tracking id the transaction would have received.
        tracking_id: u64,
        /// Submitter-provided reason.
        reason: String,
    },

    /// Resending an already-built transaction failed.
    #[error("failed to resend transaction: {0}")]
    ResendFailed(String),

    /// The service thread is gone.
    #[error("tracker channel closed")]
    ChannelClosed,

    /// The service thread could not be started.
    #[error("failed to spawn tracker thread: {0}")]
    ThreadSpawn(String),

    /// The supplied configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

/// Convenience result type for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;
