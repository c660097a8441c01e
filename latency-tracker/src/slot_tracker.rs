//! Per-slot lifecycle timing.
//!
//! A node reports each slot's progress as a sequence of [`SlotUpdate`]s:
//! first shred, all shreds, replay start, frozen, voted, optimistically
//! confirmed and rooted. The tracker keeps one [`SlotTiming`] per slot and
//! the highest slot seen, which is the target slot recorded for newly sent
//! transactions.
//!
//! Notifications are best-effort: updates for unknown slots are dropped,
//! and every field keeps the first value it received.

use {
    crate::types::{Slot, Timestamp},
    log::*,
    std::collections::BTreeMap,
};

/// Entry statistics reported when a slot's bank is frozen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotEntryStats {
    pub num_entries: u64,
    pub num_transactions: u64,
    /// Largest number of transactions in a single entry.
    pub max_tx_per_entry: u64,
}

/// One slot lifecycle notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotUpdate {
    FirstShredReceived {
        slot: Slot,
        timestamp: Timestamp,
    },
    AllShredsReceived {
        slot: Slot,
        timestamp: Timestamp,
    },
    StartReplay {
        slot: Slot,
        timestamp: Timestamp,
    },
    Frozen {
        slot: Slot,
        timestamp: Timestamp,
        stats: SlotEntryStats,
    },
    Voted {
        slot: Slot,
        timestamp: Timestamp,
    },
    OptimisticConfirmation {
        slot: Slot,
        timestamp: Timestamp,
    },
    Root {
        slot: Slot,
        timestamp: Timestamp,
    },
}

impl SlotUpdate {
    pub fn slot(&self) -> Slot {
        match *self {
            SlotUpdate::FirstShredReceived { slot, .. }
            | SlotUpdate::AllShredsReceived { slot, .. }
            | SlotUpdate::StartReplay { slot, .. }
            | SlotUpdate::Frozen { slot, .. }
            | SlotUpdate::Voted { slot, .. }
            | SlotUpdate::OptimisticConfirmation { slot, .. }
            | SlotUpdate::Root { slot, .. } => slot,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match *self {
            SlotUpdate::FirstShredReceived { timestamp, .. }
            | SlotUpdate::AllShredsReceived { timestamp, .. }
            | SlotUpdate::StartReplay { timestamp, .. }
            | SlotUpdate::Frozen { timestamp, .. }
            | SlotUpdate::Voted { timestamp, .. }
            | SlotUpdate::OptimisticConfirmation { timestamp, .. }
            | SlotUpdate::Root { timestamp, .. } => timestamp,
        }
    }
}

/// Timestamps of each stage a slot went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotTiming {
    pub first_shred: Timestamp,
    pub full_slot: Option<Timestamp>,
    pub replay_start: Option<Timestamp>,
    pub frozen: Option<Timestamp>,
    pub num_entries: Option<u64>,
    pub num_transactions: Option<u64>,
    /// Maximum transactions per entry.
    pub max_tpe: Option<u64>,
    pub voted: Option<Timestamp>,
    pub confirmed: Option<Timestamp>,
    pub rooted: Option<Timestamp>,
}

impl SlotTiming {
    fn new(first_shred: Timestamp) -> Self {
        Self {
            first_shred,
            full_slot: None,
            replay_start: None,
            frozen: None,
            num_entries: None,
            num_transactions: None,
            max_tpe: None,
            voted: None,
            confirmed: None,
            rooted: None,
        }
    }
}

fn set_once<T>(field: &mut Option<T>, value: T) {
    if field.is_none() {
        *field = Some(value);
    }
}

/// Bounded store of slot timings keyed by slot.
#[derive(Debug)]
pub struct SlotTimingTracker {
    slots: BTreeMap<Slot, SlotTiming>,
    target_slot: Option<Slot>,
    /// Set once the first slot update arrives; plain slot changes are then
    /// ignored.
    slot_updates_active: bool,
    max_tracked_slots: usize,
}

impl SlotTimingTracker {
    pub fn new(max_tracked_slots: usize) -> Self {
        Self {
            slots: BTreeMap::new(),
            target_slot: None,
            slot_updates_active: false,
            max_tracked_slots,
        }
    }

    /// Apply a slot lifecycle notification.
    pub fn observe(&mut self, update: SlotUpdate) {
        self.slot_updates_active = true;

        if let SlotUpdate::FirstShredReceived { slot, timestamp } = update {
            self.slots
                .entry(slot)
                .or_insert_with(|| SlotTiming::new(timestamp));
            self.raise_target(slot);
            return;
        }

        let Some(timing) = self.slots.get_mut(&update.slot()) else {
            trace!("dropping {update:?} for untracked slot");
            return;
        };
        match update {
            SlotUpdate::FirstShredReceived { .. } => {}
            SlotUpdate::AllShredsReceived { timestamp, .. } => {
                set_once(&mut timing.full_slot, timestamp)
            }
            SlotUpdate::StartReplay { timestamp, .. } => {
                set_once(&mut timing.replay_start, timestamp)
            }
            SlotUpdate::Frozen {
                timestamp, stats, ..
            } => {
                set_once(&mut timing.frozen, timestamp);
                set_once(&mut timing.num_entries, stats.num_entries);
                set_once(&mut timing.num_transactions, stats.num_transactions);
                set_once(&mut timing.max_tpe, stats.max_tx_per_entry);
            }
            SlotUpdate::Voted { timestamp, .. } => set_once(&mut timing.voted, timestamp),
            SlotUpdate::OptimisticConfirmation { timestamp, .. } => {
                set_once(&mut timing.confirmed, timestamp)
            }
            SlotUpdate::Root { timestamp, .. } => set_once(&mut timing.rooted, timestamp),
        }
    }

    /// Plain slot-change notification. Only used until slot updates start
    /// flowing.
    pub fn record_slot(&mut self, slot: Slot) {
        if self.slot_updates_active {
            return;
        }
        self.raise_target(slot);
    }

    fn raise_target(&mut self, slot: Slot) {
        if self.target_slot.map_or(true, |target| slot > target) {
            self.target_slot = Some(slot);
        }
    }

    /// Highest slot observed so far.
    pub fn target_slot(&self) -> Option<Slot> {
        self.target_slot
    }

    pub fn get(&self, slot: Slot) -> Option<&SlotTiming> {
        self.slots.get(&slot)
    }

    pub fn slots(&self) -> &BTreeMap<Slot, SlotTiming> {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot_updates_active(&self) -> bool {
        self.slot_updates_active
    }

    /// Drop the oldest records beyond the retention limit, skipping slots
    /// for which `is_pinned` holds. Returns how many were evicted.
    pub fn evict(&mut self, is_pinned: impl Fn(Slot) -> bool) -> usize {
        let excess = self.slots.len().saturating_sub(self.max_tracked_slots);
        if excess == 0 {
            return 0;
        }
        let victims: Vec<Slot> = self
            .slots
            .keys()
            .copied()
            .filter(|slot| !is_pinned(*slot))
            .take(excess)
            .collect();
        for slot in &victims {
            self.slots.remove(slot);
        }
        if victims.len() < excess {
            debug!(
                "slot retention over limit by {} pinned slots",
                excess.saturating_sub(victims.len())
            );
        }
        victims.len()
    }

    /// Forget every slot, the target slot, and whether slot updates were
    /// seen.
    pub fn reset(&mut self) {
        self.slots.clear();
        self.target_slot = None;
        self.slot_updates_active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_shred(slot: Slot, timestamp: Timestamp) -> SlotUpdate {
        SlotUpdate::FirstShredReceived { slot, timestamp }
    }

    #[test]
    fn test_first_shred_creates_record() {
        let mut tracker = SlotTimingTracker::new(16);
        tracker.observe(first_shred(5, 100));
        assert_eq!(tracker.get(5).unwrap().first_shred, 100);
        assert_eq!(tracker.target_slot(), Some(5));

        // A second first-shred does not overwrite.
        tracker.observe(first_shred(5, 900));
        assert_eq!(tracker.get(5).unwrap().first_shred, 100);
    }

    #[test]
    fn test_update_for_unknown_slot_is_dropped() {
        let mut tracker = SlotTimingTracker::new(16);
        tracker.observe(SlotUpdate::Voted {
            slot: 9,
            timestamp: 10,
        });
        assert!(tracker.get(9).is_none());
        assert!(tracker.is_empty());
        assert_eq!(tracker.target_slot(), None);
    }

    #[test]
    fn test_lifecycle_fields_set_once() {
        let mut tracker = SlotTimingTracker::new(16);
        tracker.observe(first_shred(7, 0));
        tracker.observe(SlotUpdate::AllShredsReceived {
            slot: 7,
            timestamp: 40,
        });
        tracker.observe(SlotUpdate::StartReplay {
            slot: 7,
            timestamp: 45,
        });
        tracker.observe(SlotUpdate::Frozen {
            slot: 7,
            timestamp: 80,
            stats: SlotEntryStats {
                num_entries: 64,
                num_transactions: 1_200,
                max_tx_per_entry: 64,
            },
        });
        tracker.observe(SlotUpdate::Frozen {
            slot: 7,
            timestamp: 99,
            stats: SlotEntryStats::default(),
        });
        tracker.observe(SlotUpdate::Voted {
            slot: 7,
            timestamp: 100,
        });
        tracker.observe(SlotUpdate::OptimisticConfirmation {
            slot: 7,
            timestamp: 400,
        });
        tracker.observe(SlotUpdate::Root {
            slot: 7,
            timestamp: 13_000,
        });

        let timing = tracker.get(7).unwrap();
        assert_eq!(timing.full_slot, Some(40));
        assert_eq!(timing.replay_start, Some(45));
        assert_eq!(timing.frozen, Some(80));
        assert_eq!(timing.num_entries, Some(64));
        assert_eq!(timing.num_transactions, Some(1_200));
        assert_eq!(timing.max_tpe, Some(64));
        assert_eq!(timing.voted, Some(100));
        assert_eq!(timing.confirmed, Some(400));
        assert_eq!(timing.rooted, Some(13_000));
    }

    #[test]
    fn test_target_slot_is_monotone() {
        let mut tracker = SlotTimingTracker::new(16);
        tracker.observe(first_shred(10, 0));
        tracker.observe(first_shred(8, 1));
        assert_eq!(tracker.target_slot(), Some(10));
        tracker.observe(first_shred(11, 2));
        assert_eq!(tracker.target_slot(), Some(11));
    }

    #[test]
    fn test_slot_change_fallback() {
        let mut tracker = SlotTimingTracker::new(16);
        tracker.record_slot(20);
        assert_eq!(tracker.target_slot(), Some(20));
        assert!(!tracker.slot_updates_active());

        tracker.observe(first_shred(21, 0));
        tracker.record_slot(50);
        assert_eq!(tracker.target_slot(), Some(21));
    }

    #[test]
    fn test_evict_oldest_first() {
        let mut tracker = SlotTimingTracker::new(3);
        for slot in 1..=5 {
            tracker.observe(first_shred(slot, slot));
        }
        assert_eq!(tracker.evict(|_| false), 2);
        let slots: Vec<Slot> = tracker.slots().keys().copied().collect();
        assert_eq!(slots, vec![3, 4, 5]);
    }

    #[test]
    fn test_evict_skips_pinned() {
        let mut tracker = SlotTimingTracker::new(2);
        for slot in 1..=4 {
            tracker.observe(first_shred(slot, slot));
        }
        assert_eq!(tracker.evict(|slot| slot == 1), 2);
        let slots: Vec<Slot> = tracker.slots().keys().copied().collect();
        assert_eq!(slots, vec![1, 4]);
    }

    #[test]
    fn test_reset() {
        let mut tracker = SlotTimingTracker::new(4);
        tracker.observe(first_shred(3, 0));
        tracker.reset();
        assert!(tracker.is_empty());
        assert_eq!(tracker.target_slot(), None);
        tracker.record_slot(9);
        assert_eq!(tracker.target_slot(), Some(9));
    }
}
