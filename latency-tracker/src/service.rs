//! Latency tracker service.
//!
//! A dedicated thread owns the [`TransactionRegistry`] and the
//! [`SlotTimingTracker`]. Everything else talks to it through a cloneable
//! [`TrackerHandle`]:
//!
//! ```text
//!   transport ──▶ TrackerHandle ──▶ event queue ──▶ service thread
//!                      ▲                              │   │
//!                      │                              │   ▼
//!                      │                              │  TransactionSubmitter
//!                      │                              ▼
//!                      └──── Arc<TrackerSnapshot> ◀── ArcSwap
//! ```
//!
//! Events are applied strictly in queue order. Timers are fired on the same
//! thread between events, so a timeout can never interleave with a
//! notification for the same transaction. Readers get an immutable snapshot
//! that is republished at most once per `snapshot_interval_ms`.

use {
    crate::{
        config::{AccountsConfig, TrackerConfig},
        error::{Result, TrackerError},
        metrics::{MetricsSnapshot, TrackerMetrics},
        registry::{ActiveIdPartition, RegistryAction, TransactionRegistry},
        scheduler::TimerEvent,
        slot_tracker::{SlotTiming, SlotTimingTracker, SlotUpdate},
        stats::TransactionStats,
        timer::Clock,
        types::{
            CommitmentTier, Slot, Timestamp, TrackedTransaction, TrackingId, TransactionDetails,
        },
    },
    arc_swap::ArcSwap,
    crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender},
    log::*,
    solana_pubkey::Pubkey,
    solana_signature::Signature,
    std::{
        collections::{BTreeMap, HashMap},
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread::{self, Builder, JoinHandle},
        time::Duration,
    },
};

// ---------------------------------------------------------------------------
// Submitter
// ---------------------------------------------------------------------------

/// What the submitter needs to build the transaction for a tracking id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub tracking_id: TrackingId,
    /// Bit to set in the program data account.
    pub bit_id: u64,
    pub fee_account: Pubkey,
    pub program_account: Pubkey,
}

/// A transaction the submitter built and sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTransaction {
    pub signature: Signature,
    /// Serialized transaction, replayed verbatim on every retry. May be empty
    /// if the submitter does not support resending.
    pub wire_transaction: Vec<u8>,
}

/// Builds, signs and sends transactions on behalf of the tracker.
pub trait TransactionSubmitter: Send + Sync {
    fn submit(&self, request: &SubmitRequest) -> Result<SubmittedTransaction>;

    /// Send an already serialized transaction again.
    fn resend(&self, wire_transaction: &[u8]) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Events and snapshots
// ---------------------------------------------------------------------------

/// Input to the service thread.
#[derive(Debug)]
pub enum TrackerEvent {
    Create {
        reply: Sender<Result<TrackingId>>,
    },
    ConfigureAccounts(AccountsConfig),
    SlotUpdate(SlotUpdate),
    /// Plain slot change, used until slot updates are available.
    SlotChange(Slot),
    SignatureReceived {
        signature: Signature,
        slot: Slot,
        received_at: Timestamp,
    },
    SignatureNotification {
        signature: Signature,
        tier: CommitmentTier,
        slot: Slot,
        received_at: Timestamp,
    },
    Root(Slot),
    ActiveIds {
        tier: CommitmentTier,
        estimated_slot: Slot,
        active: ActiveIdPartition,
        received_at: Timestamp,
    },
    ResetTransactions,
    ResetSlots,
    /// Fire due timers, publish a snapshot and acknowledge.
    Flush(Sender<()>),
}

/// Read-only view of the tracker state, published by the service thread.
#[derive(Debug, Clone)]
pub struct TrackerSnapshot {
    pub transactions: Vec<TrackedTransaction>,
    pub slots: BTreeMap<Slot, SlotTiming>,
    pub target_slot: Option<Slot>,
    pub stats: TransactionStats,
    pub reporting_tier: CommitmentTier,
}

impl TrackerSnapshot {
    fn empty(reporting_tier: CommitmentTier) -> Self {
        Self {
            transactions: Vec::new(),
            slots: BTreeMap::new(),
            target_slot: None,
            stats: TransactionStats::default(),
            reporting_tier,
        }
    }

    pub fn transaction(&self, tracking_id: TrackingId) -> Option<&TrackedTransaction> {
        self.transactions.get(usize::try_from(tracking_id).ok()?)
    }

    /// Average confirmation time in seconds at the reporting tier.
    pub fn average_confirmation_time(&self) -> f64 {
        self.stats.average_confirmation_time(self.reporting_tier)
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable front end of the tracker service.
#[derive(Clone)]
pub struct TrackerHandle {
    sender: Sender<TrackerEvent>,
    clock: Arc<dyn Clock>,
    snapshot: Arc<ArcSwap<TrackerSnapshot>>,
    metrics: Arc<TrackerMetrics>,
    exit: Arc<AtomicBool>,
}

impl TrackerHandle {
    fn send(&self, event: TrackerEvent) -> Result<()> {
        self.sender
            .send(event)
            .map_err(|_| TrackerError::ChannelClosed)
    }

    /// Submit a new transaction and start tracking it.
    ///
    /// Blocks until the service thread has assigned the tracking id and the
    /// submitter has returned.
    pub fn create(&self) -> Result<TrackingId> {
        let (reply, response) = bounded(1);
        self.send(TrackerEvent::Create { reply })?;
        response.recv().map_err(|_| TrackerError::ChannelClosed)?
    }

    /// Provide the accounts transactions are built against. Replacing the
    /// program accounts drops every tracked transaction and restarts
    /// tracking ids at 0.
    pub fn configure_accounts(&self, accounts: AccountsConfig) -> Result<()> {
        accounts.validate()?;
        self.send(TrackerEvent::ConfigureAccounts(accounts))
    }

    pub fn slot_update(&self, update: SlotUpdate) -> Result<()> {
        self.send(TrackerEvent::SlotUpdate(update))
    }

    pub fn slot_change(&self, slot: Slot) -> Result<()> {
        self.send(TrackerEvent::SlotChange(slot))
    }

    /// The signature was seen in `slot`, before any commitment.
    pub fn signature_received(&self, signature: Signature, slot: Slot) -> Result<()> {
        self.send(TrackerEvent::SignatureReceived {
            signature,
            slot,
            received_at: self.clock.now_ms(),
        })
    }

    /// The signature reached `tier` in `slot`.
    pub fn signature_notification(
        &self,
        signature: Signature,
        tier: CommitmentTier,
        slot: Slot,
    ) -> Result<()> {
        self.send(TrackerEvent::SignatureNotification {
            signature,
            tier,
            slot,
            received_at: self.clock.now_ms(),
        })
    }

    pub fn root(&self, slot: Slot) -> Result<()> {
        self.send(TrackerEvent::Root(slot))
    }

    /// A batch poll found `active` ids included at `tier`.
    pub fn active_ids(
        &self,
        tier: CommitmentTier,
        estimated_slot: Slot,
        active: ActiveIdPartition,
    ) -> Result<()> {
        self.send(TrackerEvent::ActiveIds {
            tier,
            estimated_slot,
            active,
            received_at: self.clock.now_ms(),
        })
    }

    pub fn reset_transactions(&self) -> Result<()> {
        self.send(TrackerEvent::ResetTransactions)
    }

    pub fn reset_slots(&self) -> Result<()> {
        self.send(TrackerEvent::ResetSlots)
    }

    /// Wait until every event sent so far has been applied and published.
    pub fn flush(&self) -> Result<()> {
        let (ack, done) = bounded(1);
        self.send(TrackerEvent::Flush(ack))?;
        done.recv().map_err(|_| TrackerError::ChannelClosed)
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<TrackerSnapshot> {
        self.snapshot.load_full()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Ask the service thread to stop. It exits within one idle poll
    /// interval.
    pub fn shutdown(&self) {
        self.exit.store(true, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// The tracker service thread.
pub struct TrackerService {
    thread: JoinHandle<()>,
}

impl TrackerService {
    /// Validate `config`, spawn the service thread and return a handle to it.
    pub fn new(
        config: TrackerConfig,
        submitter: Arc<dyn TransactionSubmitter>,
        clock: Arc<dyn Clock>,
        exit: Arc<AtomicBool>,
    ) -> Result<(Self, TrackerHandle)> {
        config.validate()?;

        let (sender, receiver) = bounded(config.channel_capacity);
        let snapshot = Arc::new(ArcSwap::from_pointee(TrackerSnapshot::empty(
            config.reporting_tier,
        )));
        let metrics = Arc::new(TrackerMetrics::new());

        let mut state = ServiceState {
            registry: TransactionRegistry::new(&config),
            slots: SlotTimingTracker::new(config.max_tracked_slots),
            signatures: HashMap::new(),
            accounts: None,
            submitter,
            clock: clock.clone(),
            metrics: metrics.clone(),
            snapshot: snapshot.clone(),
            dirty: true,
            last_publish: None,
            config,
        };

        let thread_exit = exit.clone();
        let thread = Builder::new()
            .name("trv1LatencyTrk".to_string())
            .spawn(move || state.run(&receiver, &thread_exit))
            .map_err(|err| TrackerError::ThreadSpawn(err.to_string()))?;

        let handle = TrackerHandle {
            sender,
            clock,
            snapshot,
            metrics,
            exit,
        };
        Ok((Self { thread }, handle))
    }

    pub fn join(self) -> thread::Result<()> {
        self.thread.join()
    }
}

struct ServiceState {
    registry: TransactionRegistry,
    slots: SlotTimingTracker,
    signatures: HashMap<Signature, TrackingId>,
    accounts: Option<AccountsConfig>,
    submitter: Arc<dyn TransactionSubmitter>,
    clock: Arc<dyn Clock>,
    metrics: Arc<TrackerMetrics>,
    snapshot: Arc<ArcSwap<TrackerSnapshot>>,
    /// State changed since the last published snapshot.
    dirty: bool,
    last_publish: Option<Timestamp>,
    config: TrackerConfig,
}

impl ServiceState {
    fn run(&mut self, receiver: &Receiver<TrackerEvent>, exit: &AtomicBool) {
        info!(
            "LatencyTracker: started (timeout {}ms, retry {}ms)",
            self.config.send_timeout_ms, self.config.retry_interval_ms
        );

        loop {
            if exit.load(Ordering::Relaxed) {
                info!("LatencyTracker: exit signal received, shutting down");
                break;
            }

            match receiver.recv_timeout(self.wait_duration()) {
                Ok(event) => self.handle_event(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("LatencyTracker: event channel disconnected, shutting down");
                    break;
                }
            }

            self.fire_timers();
            self.publish(false);
        }

        info!(
            "LatencyTracker: stopped with {} transactions tracked",
            self.registry.len()
        );
    }

    /// How long to block for the next event: until the next timer or the
    /// next allowed publish, bounded by the idle poll interval.
    fn wait_duration(&mut self) -> Duration {
        let now = self.clock.now_ms();
        let mut wait = self.config.idle_poll_interval_ms;
        if let Some(deadline) = self.registry.next_deadline() {
            wait = wait.min(deadline.saturating_sub(now));
        }
        if self.dirty {
            if let Some(last) = self.last_publish {
                let next = last.saturating_add(self.config.snapshot_interval_ms);
                wait = wait.min(next.saturating_sub(now));
            }
        }
        Duration::from_millis(wait)
    }

    fn handle_event(&mut self, event: TrackerEvent) {
        match event {
            TrackerEvent::Create { reply } => {
                let result = self.create();
                if let Err(err) = &result {
                    warn!("LatencyTracker: failed to create transaction: {err}");
                    self.metrics.create_failures.inc();
                }
                if reply.send(result).is_err() {
                    trace!("LatencyTracker: create caller went away");
                }
            }
            TrackerEvent::ConfigureAccounts(accounts) => {
                info!(
                    "LatencyTracker: using {} accounts with capacity {}",
                    accounts.partition_count(),
                    accounts.total_capacity()
                );
                let replaced = self
                    .accounts
                    .as_ref()
                    .is_some_and(|current| current.program_accounts != accounts.program_accounts);
                if replaced {
                    // Fresh program accounts record from bit 0 again.
                    self.apply(RegistryAction::Reset);
                    self.signatures.clear();
                }
                self.accounts = Some(accounts);
            }
            TrackerEvent::SlotUpdate(update) => {
                trace!("LatencyTracker: slot update {update:?}");
                self.slots.observe(update);
                if let SlotUpdate::Root { slot, .. } = update {
                    self.apply(RegistryAction::Root { slot });
                }
                self.evict_slots();
                self.dirty = true;
            }
            TrackerEvent::SlotChange(slot) => {
                self.slots.record_slot(slot);
                self.dirty = true;
            }
            TrackerEvent::SignatureReceived {
                signature,
                slot,
                received_at,
            } => {
                let Some(tracking_id) = self.lookup(&signature) else {
                    return;
                };
                self.apply(RegistryAction::Received {
                    tracking_id,
                    slot,
                    received_at,
                });
            }
            TrackerEvent::SignatureNotification {
                signature,
                tier,
                slot,
                received_at,
            } => {
                let Some(tracking_id) = self.lookup(&signature) else {
                    return;
                };
                self.apply(RegistryAction::Track {
                    tracking_id,
                    tier,
                    slot,
                    received_at,
                });
            }
            TrackerEvent::Root(slot) => {
                self.apply(RegistryAction::Root { slot });
            }
            TrackerEvent::ActiveIds {
                tier,
                estimated_slot,
                active,
                received_at,
            } => {
                trace!(
                    "LatencyTracker: {} active ids at {tier} in partition {}",
                    active.ids.len(),
                    active.partition
                );
                self.apply(RegistryAction::Update {
                    active,
                    tier,
                    received_at,
                    estimated_slot,
                    applied_at: self.clock.now_ms(),
                });
            }
            TrackerEvent::ResetTransactions => {
                self.apply(RegistryAction::Reset);
                self.signatures.clear();
            }
            TrackerEvent::ResetSlots => {
                info!("LatencyTracker: slot timings reset");
                self.slots.reset();
                self.dirty = true;
            }
            TrackerEvent::Flush(ack) => {
                self.fire_timers();
                self.publish(true);
                if ack.send(()).is_err() {
                    trace!("LatencyTracker: flush caller went away");
                }
            }
        }
    }

    fn lookup(&self, signature: &Signature) -> Option<TrackingId> {
        let tracking_id = self.signatures.get(signature).copied();
        if tracking_id.is_none() {
            trace!("LatencyTracker: notification for untracked signature {signature}");
        }
        tracking_id
    }

    fn apply(&mut self, action: RegistryAction) {
        let outcome = self.registry.apply(action);
        self.metrics.record_outcome(&outcome);
        self.dirty = true;
    }

    fn create(&mut self) -> Result<TrackingId> {
        let accounts = self
            .accounts
            .as_ref()
            .ok_or(TrackerError::AccountsNotConfigured)?;
        let tracking_id = self.registry.next_tracking_id();
        let capacity = accounts.total_capacity();
        if tracking_id >= capacity {
            return Err(TrackerError::CapacityExceeded {
                created: tracking_id,
                capacity,
            });
        }
        let target_slot = self.slots.target_slot().ok_or(TrackerError::NoTargetSlot)?;

        let partitions = accounts.partition_count();
        let (Some(index), Some(bit_id)) = (
            tracking_id.checked_rem(partitions),
            tracking_id.checked_div(partitions),
        ) else {
            return Err(TrackerError::AccountsNotConfigured);
        };
        let index = usize::try_from(index).map_err(|_| TrackerError::AccountsNotConfigured)?;
        let (Some(fee_account), Some(program_account)) = (
            accounts.fee_accounts.get(index).copied(),
            accounts.program_accounts.get(index).copied(),
        ) else {
            return Err(TrackerError::AccountsNotConfigured);
        };

        let request = SubmitRequest {
            tracking_id,
            bit_id,
            fee_account,
            program_account,
        };
        let sent_at = self.clock.now_ms();
        let submitted = self.submitter.submit(&request)?;

        let signature = submitted.signature;
        let wire_transaction =
            (!submitted.wire_transaction.is_empty()).then_some(submitted.wire_transaction);
        self.apply(RegistryAction::New {
            details: TransactionDetails {
                id: bit_id,
                fee_account,
                program_account,
                signature,
            },
            sent_at,
            target_slot,
            wire_transaction,
        });
        self.signatures.insert(signature, tracking_id);
        Ok(tracking_id)
    }

    fn fire_timers(&mut self) {
        let now = self.clock.now_ms();
        for event in self.registry.poll_timers(now) {
            match event {
                TimerEvent::Timeout(tracking_id) => {
                    self.apply(RegistryAction::Timeout { tracking_id });
                }
                TimerEvent::Retry(tracking_id) => self.resend(tracking_id),
            }
        }
    }

    fn resend(&self, tracking_id: TrackingId) {
        let Some(wire_transaction) = self.registry.retry_payload(tracking_id) else {
            return;
        };
        match self.submitter.resend(wire_transaction) {
            Ok(()) => {
                trace!("LatencyTracker: resent transaction {tracking_id}");
                self.metrics.retries_sent.inc();
            }
            Err(err) => {
                warn!("LatencyTracker: resend of transaction {tracking_id} failed: {err}");
                self.metrics.resend_failures.inc();
            }
        }
    }

    fn evict_slots(&mut self) {
        let registry = &self.registry;
        let evicted = self
            .slots
            .evict(|slot| registry.is_landed_slot_pinned(slot));
        if evicted > 0 {
            trace!("LatencyTracker: evicted {evicted} slot records");
            self.metrics.slots_evicted.add(evicted as u64);
        }
    }

    /// Publish a fresh snapshot if anything changed, respecting the publish
    /// interval unless `force` is set.
    fn publish(&mut self, force: bool) {
        if !self.dirty {
            return;
        }
        let now = self.clock.now_ms();
        let throttled = self.last_publish.is_some_and(|last| {
            now.saturating_sub(last) < self.config.snapshot_interval_ms
        });
        if throttled && !force {
            return;
        }

        let transactions = self.registry.transactions().to_vec();
        let stats = TransactionStats::from_transactions(&transactions);
        let snapshot = TrackerSnapshot {
            slots: self.slots.slots().clone(),
            target_slot: self.slots.target_slot(),
            stats,
            reporting_tier: self.config.reporting_tier,
            transactions,
        };

        self.metrics
            .pending_transactions
            .set(i64::try_from(stats.pending_count).unwrap_or(i64::MAX));
        self.metrics
            .tracked_slots
            .set(i64::try_from(self.slots.len()).unwrap_or(i64::MAX));
        if let Some(target_slot) = snapshot.target_slot {
            self.metrics
                .target_slot
                .set(i64::try_from(target_slot).unwrap_or(i64::MAX));
        }

        self.snapshot.store(Arc::new(snapshot));
        self.dirty = false;
        self.last_publish = Some(now);
    }
}

