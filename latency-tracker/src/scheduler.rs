//! Retry and timeout deadlines for pending transactions.
//!
//! Each pending transaction owns one timeout and, unless retries are
//! disabled, one retry interval. The handles live on the transaction's
//! [`PendingTransaction`]; the scheduler owns the underlying
//! [`TimerQueue`] and the wire bytes needed to resend.

use {
    crate::{
        config::TrackerConfig,
        timer::TimerQueue,
        types::{PendingTransaction, Timestamp, TrackingId},
    },
    std::collections::HashMap,
};

/// Deadline kinds scheduled for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerEvent {
    /// The transaction has been pending for the full send timeout.
    Timeout(TrackingId),
    /// Time to resend the transaction.
    Retry(TrackingId),
}

impl TimerEvent {
    pub fn tracking_id(&self) -> TrackingId {
        match self {
            TimerEvent::Timeout(id) | TimerEvent::Retry(id) => *id,
        }
    }
}

/// Arms, cancels and fires per-transaction deadlines.
#[derive(Debug)]
pub struct RetryScheduler {
    timers: TimerQueue<TimerEvent>,
    send_timeout_ms: u64,
    retry_interval_ms: u64,
    retry_enabled: bool,
    /// Serialized transactions kept for resending, until the transaction can
    /// no longer return to pending.
    wire_transactions: HashMap<TrackingId, Vec<u8>>,
}

impl RetryScheduler {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            timers: TimerQueue::new(),
            send_timeout_ms: config.send_timeout_ms,
            retry_interval_ms: config.retry_interval_ms,
            retry_enabled: config.retry_enabled,
            wire_transactions: HashMap::new(),
        }
    }

    /// Arm the timeout and retry interval for `tracking_id` starting at
    /// `now`. Timers that are still live on `pending` are kept, so a
    /// transaction never holds two timeouts or two retry intervals.
    pub fn arm(
        &mut self,
        tracking_id: TrackingId,
        now: Timestamp,
        pending: &mut PendingTransaction,
    ) {
        let timeout_live = pending.timeout.is_some_and(|h| self.timers.is_live(h));
        if !timeout_live {
            pending.timeout = Some(self.timers.schedule_once(
                now,
                self.send_timeout_ms,
                TimerEvent::Timeout(tracking_id),
            ));
        }

        let retry_live = pending.retry.is_some_and(|h| self.timers.is_live(h));
        if self.retry_enabled && !retry_live {
            pending.retry = Some(self.timers.schedule_interval(
                now,
                self.retry_interval_ms,
                TimerEvent::Retry(tracking_id),
            ));
        }
    }

    /// Cancel both timers and clear their handles. Idempotent.
    pub fn disarm(&mut self, pending: &mut PendingTransaction) {
        if let Some(handle) = pending.retry.take() {
            self.timers.cancel(handle);
        }
        if let Some(handle) = pending.timeout.take() {
            self.timers.cancel(handle);
        }
    }

    /// Keep the serialized transaction around for resends.
    pub fn retain_wire_transaction(&mut self, tracking_id: TrackingId, wire_transaction: Vec<u8>) {
        self.wire_transactions.insert(tracking_id, wire_transaction);
    }

    pub fn wire_transaction(&self, tracking_id: TrackingId) -> Option<&[u8]> {
        self.wire_transactions.get(&tracking_id).map(Vec::as_slice)
    }

    /// Forget the serialized transaction once it can no longer be resent.
    pub fn retire(&mut self, tracking_id: TrackingId) {
        self.wire_transactions.remove(&tracking_id);
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&mut self) -> Option<Timestamp> {
        self.timers.next_deadline()
    }

    /// Deadlines that expired at or before `now`.
    pub fn poll_expired(&mut self, now: Timestamp) -> Vec<TimerEvent> {
        self.timers
            .poll_expired(now)
            .into_iter()
            .map(|(_, event)| event)
            .collect()
    }

    /// Number of armed timers across all transactions.
    pub fn live_timers(&self) -> usize {
        self.timers.len()
    }

    /// Whether the handles stored on `pending` still refer to armed timers.
    pub fn is_armed(&self, pending: &PendingTransaction) -> bool {
        pending.timeout.is_some_and(|h| self.timers.is_live(h))
            || pending.retry.is_some_and(|h| self.timers.is_live(h))
    }

    /// Cancel every timer and drop all retained transactions. Handles
    /// issued before the reset become inert.
    pub fn reset(&mut self) {
        self.timers.reset();
        self.wire_transactions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> RetryScheduler {
        RetryScheduler::new(&TrackerConfig {
            send_timeout_ms: 1_000,
            retry_interval_ms: 300,
            ..TrackerConfig::default()
        })
    }

    #[test]
    fn test_arm_schedules_timeout_and_retry() {
        let mut scheduler = scheduler();
        let mut pending = PendingTransaction::new(0, 10);
        scheduler.arm(3, 0, &mut pending);
        assert!(pending.timeout.is_some());
        assert!(pending.retry.is_some());
        assert_eq!(scheduler.live_timers(), 2);

        assert_eq!(scheduler.poll_expired(300), vec![TimerEvent::Retry(3)]);
        assert_eq!(scheduler.poll_expired(600), vec![TimerEvent::Retry(3)]);
        assert_eq!(scheduler.poll_expired(900), vec![TimerEvent::Retry(3)]);
        assert_eq!(
            scheduler.poll_expired(1_000),
            vec![TimerEvent::Timeout(3)]
        );
    }

    #[test]
    fn test_arm_twice_does_not_duplicate() {
        let mut scheduler = scheduler();
        let mut pending = PendingTransaction::new(0, 10);
        scheduler.arm(1, 0, &mut pending);
        let first = pending.clone();
        scheduler.arm(1, 50, &mut pending);
        assert_eq!(pending, first);
        assert_eq!(scheduler.live_timers(), 2);
    }

    #[test]
    fn test_retry_disabled() {
        let mut scheduler = RetryScheduler::new(&TrackerConfig {
            retry_enabled: false,
            ..TrackerConfig::default()
        });
        let mut pending = PendingTransaction::new(0, 10);
        scheduler.arm(0, 0, &mut pending);
        assert!(pending.retry.is_none());
        assert_eq!(scheduler.live_timers(), 1);
    }

    #[test]
    fn test_disarm_is_idempotent() {
        let mut scheduler = scheduler();
        let mut pending = PendingTransaction::new(0, 10);
        scheduler.arm(0, 0, &mut pending);
        scheduler.disarm(&mut pending);
        scheduler.disarm(&mut pending);
        assert!(!pending.has_timers());
        assert_eq!(scheduler.live_timers(), 0);
        assert!(scheduler.poll_expired(10_000).is_empty());
    }

    #[test]
    fn test_rearm_after_disarm_starts_fresh() {
        let mut scheduler = scheduler();
        let mut pending = PendingTransaction::new(0, 10);
        scheduler.arm(0, 0, &mut pending);
        scheduler.disarm(&mut pending);
        scheduler.arm(0, 800, &mut pending);
        // The old deadline at 1000 is gone; the new one is at 1800.
        let fired = scheduler.poll_expired(1_000);
        assert!(!fired.contains(&TimerEvent::Timeout(0)));
        assert!(scheduler.poll_expired(1_800).contains(&TimerEvent::Timeout(0)));
    }

    #[test]
    fn test_reset_makes_handles_inert() {
        let mut scheduler = scheduler();
        let mut pending = PendingTransaction::new(0, 10);
        scheduler.arm(0, 0, &mut pending);
        scheduler.retain_wire_transaction(0, vec![1, 2, 3]);
        scheduler.reset();
        assert!(!scheduler.is_armed(&pending));
        assert!(scheduler.wire_transaction(0).is_none());
        assert!(scheduler.poll_expired(10_000).is_empty());
    }
}
