//! # TRv1 Latency Tracker
//!
//! Measures how long transactions take to be observed at each commitment
//! tier, and records the lifecycle timing of every slot, from a stream of
//! best-effort, out-of-order node notifications.
//!
//! Each submitted transaction is tracked from `Pending` to either `Success`
//! or `TimedOut`. While pending it is resent on an interval and expires
//! after the send timeout. A `Success` observed only at the processed tier
//! can be reverted to `Pending` when a later processed poll no longer
//! reports it (the bank it landed in was abandoned by a fork), until its
//! landed slot is rooted.
//!
//! ## Layout
//!
//! - [`registry`]: the deterministic transaction state machine
//! - [`slot_tracker`]: per-slot lifecycle timings and the target slot
//! - [`scheduler`] and [`timer`]: retry and timeout deadlines
//! - [`service`]: the threaded front end, fed through a [`TrackerHandle`]
//! - [`stats`], [`metrics`], [`prometheus`]: aggregate views and export
//!
//! ## Quick start
//!
//! ```rust
//! use trv1_latency_tracker::{
//!     registry::TransactionRegistry, CommitmentTier, PendingTransaction, TrackerConfig,
//!     TransactionDetails, TransactionStatus,
//! };
//! use solana_pubkey::Pubkey;
//! use solana_signature::Signature;
//!
//! let mut registry = TransactionRegistry::new(&TrackerConfig::default());
//! let id = registry.create(
//!     TransactionDetails {
//!         id: 0,
//!         fee_account: Pubkey::new_from_array([1; 32]),
//!         program_account: Pubkey::new_from_array([2; 32]),
//!         signature: Signature::default(),
//!     },
//!     PendingTransaction::new(/*sent_at*/ 1_000, /*target_slot*/ 100),
//! );
//! registry.record_commitment(id, CommitmentTier::Confirmed, 101, 1_800);
//! assert_eq!(registry.get(id).unwrap().status(), TransactionStatus::Success);
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod prometheus;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod slot_tracker;
pub mod stats;
pub mod timer;
pub mod types;


// Re-exports for convenience.
pub use {
    config::{AccountsConfig, ConfigError, TrackerConfig},
    error::{Result, TrackerError},
    registry::{ActiveIdPartition, RegistryAction, TransactionRegistry},
    service::{
        SubmitRequest, SubmittedTransaction, TrackerHandle, TrackerService, TrackerSnapshot,
        TransactionSubmitter,
    },
    slot_tracker::{SlotEntryStats, SlotTiming, SlotTimingTracker, SlotUpdate},
    stats::TransactionStats,
    timer::{Clock, SystemClock},
    types::{
        CommitmentTier, PendingTransaction, Slot, SlotInfo, Timestamp, Timing, TrackedTransaction,
        TrackingId, TransactionDetails, TransactionState, TransactionStatus,
    },
};

#[cfg(any(test, feature = "dev-context-only-utils"))]
pub use timer::ManualClock;
