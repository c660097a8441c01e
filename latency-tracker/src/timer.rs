//! Clock and deferred-timer primitives.
//!
//! Timers are not threads or callbacks: a [`TimerQueue`] only records
//! deadlines, and the owner polls it with the current time and handles
//! whatever expired. The tracker service polls between events on its single
//! processing thread, so a firing timer can never race a notification for
//! the same transaction.
//!
//! Every [`TimerHandle`] carries the queue generation it was issued in.
//! [`TimerQueue::reset`] bumps the generation, which turns every outstanding
//! handle into an inert token: cancelling it is a no-op and it can never
//! fire again.

use {
    crate::types::Timestamp,
    std::{
        cmp::Reverse,
        collections::{BinaryHeap, HashMap},
        time::Instant,
    },
};

/// Source of the current time in milliseconds.
pub trait Clock: Send + Sync {
    /// Milliseconds elapsed on this clock.
    fn now_ms(&self) -> Timestamp;
}

/// Monotonic wall clock, measured from its creation.
#[derive(Debug)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> Timestamp {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// A clock that only moves when told to.
#[cfg(any(test, feature = "dev-context-only-utils"))]
#[derive(Debug, Default)]
pub struct ManualClock {
    now: std::sync::atomic::AtomicU64,
}

#[cfg(any(test, feature = "dev-context-only-utils"))]
impl ManualClock {
    pub fn new(start_ms: Timestamp) -> Self {
        Self {
            now: std::sync::atomic::AtomicU64::new(start_ms),
        }
    }

    /// Move the clock forward by `ms` milliseconds.
    pub fn advance(&self, ms: u64) {
        self.now
            .fetch_add(ms, std::sync::atomic::Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, ms: Timestamp) {
        self.now.store(ms, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(any(test, feature = "dev-context-only-utils"))]
impl Clock for ManualClock {
    fn now_ms(&self) -> Timestamp {
        self.now.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Cancellation token for a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    id: u64,
    generation: u64,
}

impl TimerHandle {
    /// Queue generation this handle was issued in.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug)]
struct TimerEntry<E> {
    deadline: Timestamp,
    /// Set for interval timers.
    period: Option<u64>,
    event: E,
}

/// Deadline queue for one-shot and interval timers.
#[derive(Debug)]
pub struct TimerQueue<E> {
    generation: u64,
    next_id: u64,
    /// Live timers. A cancelled timer is removed here and its heap entry is
    /// discarded lazily when it reaches the top.
    entries: HashMap<u64, TimerEntry<E>>,
    deadlines: BinaryHeap<Reverse<(Timestamp, u64)>>,
}

impl<E> Default for TimerQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> TimerQueue<E> {
    pub fn new() -> Self {
        Self {
            generation: 0,
            next_id: 0,
            entries: HashMap::new(),
            deadlines: BinaryHeap::new(),
        }
    }

    /// Fire `event` once, `delay_ms` after `now`.
    pub fn schedule_once(&mut self, now: Timestamp, delay_ms: u64, event: E) -> TimerHandle {
        self.insert(now.saturating_add(delay_ms), None, event)
    }

    /// Fire `event` every `period_ms`, starting one period after `now`.
    pub fn schedule_interval(&mut self, now: Timestamp, period_ms: u64, event: E) -> TimerHandle {
        let period_ms = period_ms.max(1);
        self.insert(now.saturating_add(period_ms), Some(period_ms), event)
    }

    fn insert(&mut self, deadline: Timestamp, period: Option<u64>, event: E) -> TimerHandle {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.entries.insert(
            id,
            TimerEntry {
                deadline,
                period,
                event,
            },
        );
        self.deadlines.push(Reverse((deadline, id)));
        TimerHandle {
            id,
            generation: self.generation,
        }
    }

    /// Cancel a timer. Returns `true` if the timer was live.
    ///
    /// Safe to call repeatedly, after a one-shot timer fired, and with
    /// handles issued before the last [`reset`](Self::reset).
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        if handle.generation != self.generation {
            return false;
        }
        self.entries.remove(&handle.id).is_some()
    }

    /// Whether the timer behind `handle` can still fire.
    pub fn is_live(&self, handle: TimerHandle) -> bool {
        handle.generation == self.generation && self.entries.contains_key(&handle.id)
    }

    /// Number of live timers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The earliest deadline among live timers.
    pub fn next_deadline(&mut self) -> Option<Timestamp> {
        while let Some(Reverse((deadline, id))) = self.deadlines.peek().copied() {
            match self.entries.get(&id) {
                Some(entry) if entry.deadline == deadline => return Some(deadline),
                _ => {
                    self.deadlines.pop();
                }
            }
        }
        None
    }

    /// Drop every timer and invalidate all outstanding handles.
    pub fn reset(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.entries.clear();
        self.deadlines.clear();
    }
}

impl<E: Clone> TimerQueue<E> {
    /// Pop every timer whose deadline is at or before `now`, in deadline
    /// order. Interval timers are rescheduled; ticks missed while the owner
    /// was not polling are skipped rather than replayed.
    pub fn poll_expired(&mut self, now: Timestamp) -> Vec<(TimerHandle, E)> {
        let mut fired = Vec::new();
        while let Some(Reverse((deadline, id))) = self.deadlines.peek().copied() {
            if deadline > now {
                break;
            }
            self.deadlines.pop();

            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };
            if entry.deadline != deadline {
                continue;
            }

            let handle = TimerHandle {
                id,
                generation: self.generation,
            };
            match entry.period {
                Some(period) => {
                    let mut next = deadline.saturating_add(period);
                    if next <= now {
                        next = now.saturating_add(period);
                    }
                    entry.deadline = next;
                    fired.push((handle, entry.event.clone()));
                    self.deadlines.push(Reverse((next, id)));
                }
                None => {
                    if let Some(entry) = self.entries.remove(&id) {
                        fired.push((handle, entry.event));
                    }
                }
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_shot_fires_once() {
        let mut queue = TimerQueue::new();
        let handle = queue.schedule_once(0, 100, "timeout");
        assert!(queue.poll_expired(99).is_empty());
        assert_eq!(queue.poll_expired(100), vec![(handle, "timeout")]);
        assert!(queue.poll_expired(1_000).is_empty());
        assert!(!queue.is_live(handle));
    }

    #[test]
    fn test_interval_reschedules() {
        let mut queue = TimerQueue::new();
        let handle = queue.schedule_interval(0, 50, 7u32);
        assert_eq!(queue.poll_expired(50).len(), 1);
        assert_eq!(queue.next_deadline(), Some(100));
        assert_eq!(queue.poll_expired(100).len(), 1);
        assert!(queue.is_live(handle));
    }

    #[test]
    fn test_interval_skips_missed_ticks() {
        let mut queue = TimerQueue::new();
        queue.schedule_interval(0, 10, ());
        // Five periods elapse without polling: only one tick is delivered.
        assert_eq!(queue.poll_expired(55).len(), 1);
        assert_eq!(queue.next_deadline(), Some(65));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut queue = TimerQueue::new();
        let handle = queue.schedule_once(0, 10, ());
        assert!(queue.cancel(handle));
        assert!(!queue.cancel(handle));
        assert!(queue.poll_expired(100).is_empty());
        assert_eq!(queue.next_deadline(), None);
    }

    #[test]
    fn test_cancel_after_fire_is_noop() {
        let mut queue = TimerQueue::new();
        let handle = queue.schedule_once(0, 10, ());
        assert_eq!(queue.poll_expired(10).len(), 1);
        assert!(!queue.cancel(handle));
    }

    #[test]
    fn test_reset_invalidates_handles() {
        let mut queue = TimerQueue::new();
        let stale = queue.schedule_once(0, 10, 1u8);
        queue.reset();
        assert!(!queue.is_live(stale));
        assert!(!queue.cancel(stale));

        // Cancelling the stale handle leaves the fresh timer alone.
        let fresh = queue.schedule_once(0, 10, 2u8);
        assert_ne!(fresh.generation(), stale.generation());
        assert!(!queue.cancel(stale));
        assert_eq!(queue.poll_expired(10), vec![(fresh, 2u8)]);
    }

    #[test]
    fn test_deadline_order() {
        let mut queue = TimerQueue::new();
        queue.schedule_once(0, 30, 'c');
        queue.schedule_once(0, 10, 'a');
        queue.schedule_once(0, 20, 'b');
        let fired: Vec<char> = queue.poll_expired(30).into_iter().map(|(_, e)| e).collect();
        assert_eq!(fired, vec!['a', 'b', 'c']);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(5);
        clock.advance(10);
        assert_eq!(clock.now_ms(), 15);
        clock.set(100);
        assert_eq!(clock.now_ms(), 100);
    }
}
