//! Core types shared by the registry, the scheduler and the service.
//!
//! Defines tracked transactions and their lifecycle states, commitment
//! tiers, and the timing records accumulated as evidence arrives.

use {
    crate::timer::TimerHandle,
    solana_commitment_config::CommitmentLevel,
    solana_pubkey::Pubkey,
    solana_signature::Signature,
    std::{fmt, str::FromStr, time::Duration},
};

pub use solana_clock::Slot;

/// Milliseconds on the tracker clock.
pub type Timestamp = u64;

/// Position of a transaction in the registry, assigned at creation.
pub type TrackingId = u64;

// ---------------------------------------------------------------------------
// Commitment tiers
// ---------------------------------------------------------------------------

/// Confidence tier at which a transaction has been observed as included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitmentTier {
    /// Included in a bank the node has processed. Weaker and faster, and
    /// subject to forks.
    Processed,
    /// Optimistically confirmed by a supermajority.
    Confirmed,
}

impl CommitmentTier {
    pub const ALL: [CommitmentTier; 2] = [CommitmentTier::Processed, CommitmentTier::Confirmed];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommitmentTier::Processed => "processed",
            CommitmentTier::Confirmed => "confirmed",
        }
    }
}

impl fmt::Display for CommitmentTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<CommitmentTier> for CommitmentLevel {
    fn from(tier: CommitmentTier) -> Self {
        match tier {
            CommitmentTier::Processed => CommitmentLevel::Processed,
            CommitmentTier::Confirmed => CommitmentLevel::Confirmed,
        }
    }
}

impl TryFrom<CommitmentLevel> for CommitmentTier {
    type Error = ParseCommitmentTierError;

    fn try_from(level: CommitmentLevel) -> Result<Self, Self::Error> {
        match level {
            CommitmentLevel::Processed => Ok(CommitmentTier::Processed),
            CommitmentLevel::Confirmed => Ok(CommitmentTier::Confirmed),
            CommitmentLevel::Finalized => Err(ParseCommitmentTierError("finalized".to_string())),
        }
    }
}

/// Error returned for commitment names that do not map to a tracked tier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("untracked commitment: {0}")]
pub struct ParseCommitmentTierError(pub String);

impl FromStr for CommitmentTier {
    type Err = ParseCommitmentTierError;

    /// Accepts the current names as well as the legacy `recent` and
    /// `singleGossip` aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processed" | "recent" => Ok(CommitmentTier::Processed),
            "confirmed" | "singleGossip" => Ok(CommitmentTier::Confirmed),
            other => Err(ParseCommitmentTierError(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Transaction records
// ---------------------------------------------------------------------------

/// Immutable description of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDetails {
    /// Bit id within the program data account.
    pub id: u64,
    pub fee_account: Pubkey,
    pub program_account: Pubkey,
    pub signature: Signature,
}

/// One sighting of the signature in a slot, before any commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedRecord {
    pub slot: Slot,
    pub received_at: Timestamp,
}

/// Send-side bookkeeping of a transaction whose fate is not settled yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    pub sent_at: Timestamp,
    /// Slot the cluster was at when the transaction was sent.
    pub target_slot: Slot,
    pub retry: Option<TimerHandle>,
    pub timeout: Option<TimerHandle>,
}

impl PendingTransaction {
    pub fn new(sent_at: Timestamp, target_slot: Slot) -> Self {
        Self {
            sent_at,
            target_slot,
            retry: None,
            timeout: None,
        }
    }

    /// Whether any timer is still armed.
    pub fn has_timers(&self) -> bool {
        self.timeout.is_some() || self.retry.is_some()
    }
}

/// Slot the transaction was aimed at and the slot it landed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInfo {
    pub target: Slot,
    pub landed: Slot,
}

/// Elapsed time from send until each commitment tier was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub sent_at: Timestamp,
    pub processed: Option<Duration>,
    pub confirmed: Option<Duration>,
}

impl Timing {
    pub fn new(sent_at: Timestamp) -> Self {
        Self {
            sent_at,
            processed: None,
            confirmed: None,
        }
    }

    pub fn get(&self, tier: CommitmentTier) -> Option<Duration> {
        match tier {
            CommitmentTier::Processed => self.processed,
            CommitmentTier::Confirmed => self.confirmed,
        }
    }

    /// Record the elapsed time for `tier` unless one is already recorded.
    /// Returns `true` if the value was written.
    pub fn set_once(&mut self, tier: CommitmentTier, received_at: Timestamp) -> bool {
        let slot = match tier {
            CommitmentTier::Processed => &mut self.processed,
            CommitmentTier::Confirmed => &mut self.confirmed,
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(elapsed(self.sent_at, received_at));
        true
    }

    pub fn clear(&mut self, tier: CommitmentTier) {
        match tier {
            CommitmentTier::Processed => self.processed = None,
            CommitmentTier::Confirmed => self.confirmed = None,
        }
    }
}

/// Time between two tracker timestamps; evidence stamped before the send is
/// treated as instantaneous.
pub fn elapsed(sent_at: Timestamp, received_at: Timestamp) -> Duration {
    Duration::from_millis(received_at.saturating_sub(sent_at))
}

/// Coarse status of a tracked transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    Pending,
    Success,
    TimedOut,
}

/// Lifecycle state of a tracked transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionState {
    /// Sent, no inclusion evidence yet.
    Pending {
        received: Vec<ReceivedRecord>,
        pending: PendingTransaction,
    },
    /// Observed at one or more commitment tiers. `pending` is kept until
    /// the landed slot is rooted, so a fork can still revert the
    /// transaction to `Pending`.
    Success {
        received: Vec<ReceivedRecord>,
        slot: SlotInfo,
        timing: Timing,
        pending: Option<PendingTransaction>,
    },
    /// Expired without inclusion evidence.
    TimedOut,
}

/// A transaction under latency observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedTransaction {
    pub details: TransactionDetails,
    pub state: TransactionState,
}

impl TrackedTransaction {
    pub fn status(&self) -> TransactionStatus {
        match self.state {
            TransactionState::Pending { .. } => TransactionStatus::Pending,
            TransactionState::Success { .. } => TransactionStatus::Success,
            TransactionState::TimedOut => TransactionStatus::TimedOut,
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.details.signature
    }

    /// Sightings recorded so far. Empty once timed out.
    pub fn received(&self) -> &[ReceivedRecord] {
        match &self.state {
            TransactionState::Pending { received, .. }
            | TransactionState::Success { received, .. } => received,
            TransactionState::TimedOut => &[],
        }
    }

    /// Send-side bookkeeping, while it has not been retired.
    pub fn pending(&self) -> Option<&PendingTransaction> {
        match &self.state {
            TransactionState::Pending { pending, .. } => Some(pending),
            TransactionState::Success { pending, .. } => pending.as_ref(),
            TransactionState::TimedOut => None,
        }
    }

    pub fn slot_info(&self) -> Option<SlotInfo> {
        match &self.state {
            TransactionState::Success { slot, .. } => Some(*slot),
            _ => None,
        }
    }

    pub fn timing(&self) -> Option<&Timing> {
        match &self.state {
            TransactionState::Success { timing, .. } => Some(timing),
            _ => None,
        }
    }

    /// Target slot, known while the transaction is pending or succeeded.
    pub fn target_slot(&self) -> Option<Slot> {
        match &self.state {
            TransactionState::Pending { pending, .. } => Some(pending.target_slot),
            TransactionState::Success { slot, .. } => Some(slot.target),
            TransactionState::TimedOut => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commitment_aliases() {
        assert_eq!("recent".parse(), Ok(CommitmentTier::Processed));
        assert_eq!("processed".parse(), Ok(CommitmentTier::Processed));
        assert_eq!("singleGossip".parse(), Ok(CommitmentTier::Confirmed));
        assert_eq!("confirmed".parse(), Ok(CommitmentTier::Confirmed));
        assert!("max".parse::<CommitmentTier>().is_err());
    }

    #[test]
    fn test_commitment_level_conversion() {
        for tier in CommitmentTier::ALL {
            let level = CommitmentLevel::from(tier);
            assert_eq!(CommitmentTier::try_from(level), Ok(tier));
        }
        assert!(CommitmentTier::try_from(CommitmentLevel::Finalized).is_err());
    }

    #[test]
    fn test_timing_set_once() {
        let mut timing = Timing::new(1_000);
        assert!(timing.set_once(CommitmentTier::Processed, 2_200));
        assert!(!timing.set_once(CommitmentTier::Processed, 9_000));
        assert_eq!(timing.processed, Some(Duration::from_millis(1_200)));
        assert_eq!(timing.get(CommitmentTier::Confirmed), None);

        timing.clear(CommitmentTier::Processed);
        assert_eq!(timing.processed, None);
    }

    #[test]
    fn test_elapsed_saturates() {
        assert_eq!(elapsed(500, 100), Duration::ZERO);
        assert_eq!(elapsed(100, 600), Duration::from_millis(500));
    }
}
