//! The transaction lifecycle state machine.
//!
//! The registry is an append-only sequence of [`TrackedTransaction`]s,
//! indexed by tracking id. It consumes submissions, per-signature
//! commitment notifications, batch polls of active ids, roots and timer
//! expiries, and moves each transaction through
//!
//! ```text
//!            commitment / active in poll
//!  Pending ─────────────────────────────▶ Success ──▶ Success (refined)
//!     │   ◀──────────────────────────────    │
//!     │     inactive in processed poll       │ landed slot rooted
//!     │     (no confirmed timing yet)        ▼
//!     ▼                                   Success (settled, terminal)
//!  TimedOut (terminal)
//! ```
//!
//! Every transition out of `Pending` cancels the transaction's timers in
//! the same step. The registry is deterministic and performs no I/O.

use {
    crate::{
        config::TrackerConfig,
        scheduler::{RetryScheduler, TimerEvent},
        types::{
            CommitmentTier, PendingTransaction, ReceivedRecord, Slot, SlotInfo, Timestamp,
            Timing, TrackedTransaction, TrackingId, TransactionDetails, TransactionState,
            TransactionStatus,
        },
    },
    log::*,
    std::collections::{HashMap, HashSet},
};

/// Ids reported active by one batch poll.
///
/// Polls are answered per account: transaction `t` belongs to partition
/// `t % partition_count` and is reported there under id
/// `t / partition_count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveIdPartition {
    pub ids: HashSet<u64>,
    pub partition: u64,
    pub partition_count: u64,
}

impl ActiveIdPartition {
    /// A poll covering every transaction, reported by tracking id.
    pub fn whole(ids: HashSet<TrackingId>) -> Self {
        Self {
            ids,
            partition: 0,
            partition_count: 1,
        }
    }

    /// `None` if the transaction is outside this partition, otherwise
    /// whether it was reported active.
    pub fn is_active(&self, tracking_id: TrackingId) -> Option<bool> {
        let count = self.partition_count.max(1);
        if tracking_id.checked_rem(count)? != self.partition {
            return None;
        }
        Some(self.ids.contains(&tracking_id.checked_div(count)?))
    }
}

/// Input to [`TransactionRegistry::apply`].
#[derive(Debug, Clone)]
pub enum RegistryAction {
    /// A transaction was submitted.
    New {
        details: TransactionDetails,
        sent_at: Timestamp,
        target_slot: Slot,
        wire_transaction: Option<Vec<u8>>,
    },
    /// The signature was seen in a slot.
    Received {
        tracking_id: TrackingId,
        slot: Slot,
        received_at: Timestamp,
    },
    /// The signature reached a commitment tier.
    Track {
        tracking_id: TrackingId,
        tier: CommitmentTier,
        slot: Slot,
        received_at: Timestamp,
    },
    /// A batch poll reported which ids are active at a tier.
    Update {
        active: ActiveIdPartition,
        tier: CommitmentTier,
        received_at: Timestamp,
        estimated_slot: Slot,
        /// When the poll is applied. Timers re-armed by a fork revert
        /// start here rather than at `received_at`.
        applied_at: Timestamp,
    },
    /// The send timeout expired.
    Timeout { tracking_id: TrackingId },
    /// A slot was rooted.
    Root { slot: Slot },
    /// Drop everything.
    Reset,
}

/// What a single action changed, for logging and metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOutcome {
    pub created: Option<TrackingId>,
    /// Transactions promoted from `Pending` to `Success`.
    pub promoted: usize,
    /// Successful transactions that gained a tier duration.
    pub refined: usize,
    /// Transactions reverted to `Pending` by a fork.
    pub reverted: usize,
    /// Successful transactions that lost their processed duration but kept
    /// their status.
    pub processed_cleared: usize,
    pub timed_out: usize,
    pub settled: usize,
    /// Elapsed milliseconds recorded for newly observed tiers.
    pub confirmations: Vec<(CommitmentTier, u64)>,
}

impl ActionOutcome {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// Reference counts of the landed slots of successful transactions.
#[derive(Debug, Default)]
struct LandedSlots {
    counts: HashMap<Slot, usize>,
}

impl LandedSlots {
    fn pin(&mut self, slot: Slot) {
        let count = self.counts.entry(slot).or_insert(0);
        *count = count.saturating_add(1);
    }

    fn unpin(&mut self, slot: Slot) {
        if let Some(count) = self.counts.get_mut(&slot) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.counts.remove(&slot);
            }
        }
    }

    fn repin(&mut self, from: Slot, to: Slot) {
        if from != to {
            self.unpin(from);
            self.pin(to);
        }
    }
}

/// Owns every tracked transaction and its timers.
#[derive(Debug)]
pub struct TransactionRegistry {
    transactions: Vec<TrackedTransaction>,
    scheduler: RetryScheduler,
    landed: LandedSlots,
}

impl TransactionRegistry {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            transactions: Vec::new(),
            scheduler: RetryScheduler::new(config),
            landed: LandedSlots::default(),
        }
    }

    // -- Queries --

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Tracking id the next created transaction will receive.
    pub fn next_tracking_id(&self) -> TrackingId {
        self.transactions.len() as TrackingId
    }

    pub fn get(&self, tracking_id: TrackingId) -> Option<&TrackedTransaction> {
        self.transactions.get(usize::try_from(tracking_id).ok()?)
    }

    pub fn transactions(&self) -> &[TrackedTransaction] {
        &self.transactions
    }

    pub fn scheduler(&self) -> &RetryScheduler {
        &self.scheduler
    }

    /// Whether a successful transaction, settled or not, landed in `slot`.
    pub fn is_landed_slot_pinned(&self, slot: Slot) -> bool {
        self.landed.counts.contains_key(&slot)
    }

    // -- Timers --

    pub fn next_deadline(&mut self) -> Option<Timestamp> {
        self.scheduler.next_deadline()
    }

    /// Expired timers. Timeouts must be fed back through
    /// [`timeout`](Self::timeout); retries are for the caller to resend.
    pub fn poll_timers(&mut self, now: Timestamp) -> Vec<TimerEvent> {
        self.scheduler.poll_expired(now)
    }

    /// Serialized transaction to resend for a retry tick, if the
    /// transaction is still pending.
    pub fn retry_payload(&self, tracking_id: TrackingId) -> Option<&[u8]> {
        match self.get(tracking_id)?.status() {
            TransactionStatus::Pending => self.scheduler.wire_transaction(tracking_id),
            _ => None,
        }
    }

    // -- Reducer --

    /// Apply one action. Unknown ids and stale evidence are no-ops.
    pub fn apply(&mut self, action: RegistryAction) -> ActionOutcome {
        match action {
            RegistryAction::New {
                details,
                sent_at,
                target_slot,
                wire_transaction,
            } => {
                let tracking_id =
                    self.create(details, PendingTransaction::new(sent_at, target_slot));
                if let Some(wire_transaction) = wire_transaction {
                    self.scheduler
                        .retain_wire_transaction(tracking_id, wire_transaction);
                }
                ActionOutcome {
                    created: Some(tracking_id),
                    ..ActionOutcome::default()
                }
            }
            RegistryAction::Received {
                tracking_id,
                slot,
                received_at,
            } => {
                self.record_received(tracking_id, slot, received_at);
                ActionOutcome::default()
            }
            RegistryAction::Track {
                tracking_id,
                tier,
                slot,
                received_at,
            } => self.record_commitment(tracking_id, tier, slot, received_at),
            RegistryAction::Update {
                active,
                tier,
                received_at,
                estimated_slot,
                applied_at,
            } => self.bulk_reconcile(&active, tier, received_at, estimated_slot, applied_at),
            RegistryAction::Timeout { tracking_id } => ActionOutcome {
                timed_out: usize::from(self.timeout(tracking_id)),
                ..ActionOutcome::default()
            },
            RegistryAction::Root { slot } => ActionOutcome {
                settled: self.settle_root(slot),
                ..ActionOutcome::default()
            },
            RegistryAction::Reset => {
                self.reset_all();
                ActionOutcome::default()
            }
        }
    }

    // -- Operations --

    /// Append a pending transaction and arm its timers from `sent_at`.
    /// Never fails; capacity is the caller's concern.
    pub fn create(
        &mut self,
        details: TransactionDetails,
        mut pending: PendingTransaction,
    ) -> TrackingId {
        let tracking_id = self.next_tracking_id();
        self.scheduler.arm(tracking_id, pending.sent_at, &mut pending);
        debug!(
            "tracking transaction {tracking_id} ({}) target slot {}",
            details.signature, pending.target_slot
        );
        self.transactions.push(TrackedTransaction {
            details,
            state: TransactionState::Pending {
                received: Vec::new(),
                pending,
            },
        });
        tracking_id
    }

    /// Record a sighting of the signature. Ignored once timed out.
    pub fn record_received(&mut self, tracking_id: TrackingId, slot: Slot, received_at: Timestamp) {
        let Some(tx) = get_mut(&mut self.transactions, tracking_id) else {
            trace!("received notification for unknown transaction {tracking_id}");
            return;
        };
        match &mut tx.state {
            TransactionState::Pending { received, .. }
            | TransactionState::Success { received, .. } => {
                received.push(ReceivedRecord { slot, received_at });
            }
            TransactionState::TimedOut => {
                trace!("transaction {tracking_id} received in slot {slot} after timing out");
            }
        }
    }

    /// Record that the signature reached `tier` in `slot`.
    ///
    /// A pending transaction is promoted to `Success`; a successful one has
    /// its landed slot updated and gains the tier duration if it had none.
    /// Either way its timers are cancelled.
    pub fn record_commitment(
        &mut self,
        tracking_id: TrackingId,
        tier: CommitmentTier,
        slot: Slot,
        received_at: Timestamp,
    ) -> ActionOutcome {
        let mut outcome = ActionOutcome::default();
        let Some(tx) = get_mut(&mut self.transactions, tracking_id) else {
            trace!("{tier} notification for unknown transaction {tracking_id}");
            return outcome;
        };

        let state = std::mem::replace(&mut tx.state, TransactionState::TimedOut);
        tx.state = match state {
            TransactionState::Pending {
                received,
                mut pending,
            } => {
                self.scheduler.disarm(&mut pending);
                self.landed.pin(slot);
                let timing = promoted_timing(&pending, tier, received_at, &mut outcome);
                debug!(
                    "transaction {tracking_id} {tier} in slot {slot} (target {})",
                    pending.target_slot
                );
                TransactionState::Success {
                    received,
                    slot: SlotInfo {
                        target: pending.target_slot,
                        landed: slot,
                    },
                    timing,
                    pending: Some(pending),
                }
            }
            TransactionState::Success {
                received,
                slot: mut slot_info,
                mut timing,
                mut pending,
            } => {
                if let Some(pending) = pending.as_mut() {
                    self.scheduler.disarm(pending);
                }
                self.landed.repin(slot_info.landed, slot);
                slot_info.landed = slot;
                if timing.set_once(tier, received_at) {
                    outcome.refined = 1;
                    record_confirmation(&timing, tier, &mut outcome);
                }
                TransactionState::Success {
                    received,
                    slot: slot_info,
                    timing,
                    pending,
                }
            }
            TransactionState::TimedOut => {
                trace!("{tier} notification for timed out transaction {tracking_id}");
                TransactionState::TimedOut
            }
        };
        outcome
    }

    /// Reconcile against a batch poll of ids active at `tier`.
    ///
    /// Pending transactions reported active are promoted with
    /// `estimated_slot` as their landed slot. Successful ones reported active
    /// gain the tier duration if missing. For a processed poll, an unsettled
    /// successful transaction that is *not* reported active is assumed to
    /// have landed on an abandoned fork and reverts to `Pending` with fresh
    /// timers armed from `applied_at`, unless it already has a confirmed
    /// duration, in which case only its processed duration is cleared.
    pub fn bulk_reconcile(
        &mut self,
        active: &ActiveIdPartition,
        tier: CommitmentTier,
        received_at: Timestamp,
        estimated_slot: Slot,
        applied_at: Timestamp,
    ) -> ActionOutcome {
        let mut outcome = ActionOutcome::default();
        for (index, tx) in self.transactions.iter_mut().enumerate() {
            let tracking_id = index as TrackingId;
            let Some(is_active) = active.is_active(tracking_id) else {
                continue;
            };

            let state = std::mem::replace(&mut tx.state, TransactionState::TimedOut);
            tx.state = match state {
                TransactionState::Pending {
                    received,
                    mut pending,
                } if is_active => {
                    self.scheduler.disarm(&mut pending);
                    self.landed.pin(estimated_slot);
                    let timing = promoted_timing(&pending, tier, received_at, &mut outcome);
                    TransactionState::Success {
                        received,
                        slot: SlotInfo {
                            target: pending.target_slot,
                            landed: estimated_slot,
                        },
                        timing,
                        pending: Some(pending),
                    }
                }
                TransactionState::Success {
                    received,
                    slot,
                    mut timing,
                    mut pending,
                } if is_active => {
                    if timing.get(tier).is_none() {
                        if let Some(pending) = pending.as_mut() {
                            self.scheduler.disarm(pending);
                        }
                        timing.set_once(tier, received_at);
                        outcome.refined = outcome.refined.saturating_add(1);
                        record_confirmation(&timing, tier, &mut outcome);
                    }
                    TransactionState::Success {
                        received,
                        slot,
                        timing,
                        pending,
                    }
                }
                TransactionState::Success {
                    received,
                    slot,
                    mut timing,
                    pending: Some(mut pending),
                } if tier == CommitmentTier::Processed => {
                    if timing.confirmed.is_some() {
                        timing.clear(CommitmentTier::Processed);
                        outcome.processed_cleared = outcome.processed_cleared.saturating_add(1);
                        TransactionState::Success {
                            received,
                            slot,
                            timing,
                            pending: Some(pending),
                        }
                    } else {
                        debug!(
                            "transaction {tracking_id} missing from processed poll, \
                             reverting landing in slot {} as forked",
                            slot.landed
                        );
                        self.landed.unpin(slot.landed);
                        self.scheduler.arm(tracking_id, applied_at, &mut pending);
                        outcome.reverted = outcome.reverted.saturating_add(1);
                        TransactionState::Pending { received, pending }
                    }
                }
                other => other,
            };
        }
        outcome
    }

    /// Expire a pending transaction. Returns `false` if it was no longer
    /// pending, in which case nothing changes.
    pub fn timeout(&mut self, tracking_id: TrackingId) -> bool {
        let Some(tx) = get_mut(&mut self.transactions, tracking_id) else {
            return false;
        };
        let TransactionState::Pending { pending, .. } = &mut tx.state else {
            trace!("ignoring timeout for settled transaction {tracking_id}");
            return false;
        };
        self.scheduler.disarm(pending);
        self.scheduler.retire(tracking_id);
        tx.state = TransactionState::TimedOut;
        debug!("transaction {tracking_id} timed out");
        true
    }

    /// Retire the retry machinery of every unsettled successful transaction
    /// that landed in the rooted `slot`. Returns how many were settled.
    /// Settled transactions keep their landed slot pinned.
    pub fn settle_root(&mut self, slot: Slot) -> usize {
        if !self.landed.counts.contains_key(&slot) {
            return 0;
        }
        let mut settled = 0usize;
        for (index, tx) in self.transactions.iter_mut().enumerate() {
            let TransactionState::Success {
                slot: slot_info,
                pending,
                ..
            } = &mut tx.state
            else {
                continue;
            };
            if slot_info.landed != slot {
                continue;
            }
            let Some(mut retired) = pending.take() else {
                continue;
            };
            self.scheduler.disarm(&mut retired);
            self.scheduler.retire(index as TrackingId);
            settled = settled.saturating_add(1);
        }
        if settled > 0 {
            debug!("root {slot} settled {settled} transactions");
        }
        settled
    }

    /// Cancel every timer, then drop every transaction.
    pub fn reset_all(&mut self) {
        for tx in self.transactions.iter_mut() {
            match &mut tx.state {
                TransactionState::Pending { pending, .. }
                | TransactionState::Success {
                    pending: Some(pending),
                    ..
                } => self.scheduler.disarm(pending),
                _ => {}
            }
        }
        self.scheduler.reset();
        self.landed = LandedSlots::default();
        let dropped = self.transactions.len();
        self.transactions.clear();
        info!("transaction registry reset, dropped {dropped} transactions");
    }
}

fn get_mut(
    transactions: &mut [TrackedTransaction],
    tracking_id: TrackingId,
) -> Option<&mut TrackedTransaction> {
    transactions.get_mut(usize::try_from(tracking_id).ok()?)
}

fn promoted_timing(
    pending: &PendingTransaction,
    tier: CommitmentTier,
    received_at: Timestamp,
    outcome: &mut ActionOutcome,
) -> Timing {
    let mut timing = Timing::new(pending.sent_at);
    timing.set_once(tier, received_at);
    outcome.promoted = outcome.promoted.saturating_add(1);
    record_confirmation(&timing, tier, outcome);
    timing
}

fn record_confirmation(timing: &Timing, tier: CommitmentTier, outcome: &mut ActionOutcome) {
    if let Some(duration) = timing.get(tier) {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        outcome.confirmations.push((tier, ms));
    }
}
