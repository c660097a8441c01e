//! Tracker activity metrics.
//!
//! Three metric kinds following Prometheus conventions:
//! - **Counter**: monotonically increasing (e.g. transactions timed out)
//! - **Gauge**: current level (e.g. transactions still pending)
//! - **Histogram**: distribution of observations (e.g. confirmation latency)
//!
//! The service thread records into a shared [`TrackerMetrics`]; exporters
//! take a [`MetricsSnapshot`] and encode it with
//! [`prometheus::encode`](crate::prometheus::encode).

use {
    crate::{registry::ActionOutcome, types::CommitmentTier},
    parking_lot::Mutex,
    std::sync::atomic::{AtomicI64, AtomicU64, Ordering},
};

// ---------------------------------------------------------------------------
// Metric primitives
// ---------------------------------------------------------------------------

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, v: u64) {
        self.value.fetch_add(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A value that can go up or down.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub const fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
        }
    }

    pub fn set(&self, v: i64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Observations grouped into cumulative buckets.
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<f64>,
    counts: Vec<AtomicU64>,
    sum: Mutex<f64>,
    count: AtomicU64,
}

impl Histogram {
    /// Create a histogram with the given bucket upper bounds.
    pub fn new(bounds: Vec<f64>) -> Self {
        let counts = bounds.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds,
            counts,
            sum: Mutex::new(0.0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, v: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        *self.sum.lock() += v;
        for (bound, count) in self.bounds.iter().zip(&self.counts) {
            if v <= *bound {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum(&self) -> f64 {
        *self.sum.lock()
    }

    /// `(upper bound, cumulative count)` pairs.
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        self.bounds
            .iter()
            .zip(&self.counts)
            .map(|(bound, count)| (*bound, count.load(Ordering::Relaxed)))
            .collect()
    }

    fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            buckets: self.get_buckets(),
            sum: self.get_sum(),
            count: self.get_count(),
        }
    }
}

/// Bucket bounds for confirmation latency, in milliseconds.
pub fn confirmation_latency_buckets() -> Vec<f64> {
    vec![
        100.0, 250.0, 400.0, 800.0, 1_200.0, 2_000.0, 5_000.0, 10_000.0, 20_000.0, 45_000.0,
    ]
}

// ---------------------------------------------------------------------------
// Tracker metrics
// ---------------------------------------------------------------------------

/// Every metric recorded by the tracker service.
#[derive(Debug)]
pub struct TrackerMetrics {
    // -- Transactions --
    pub transactions_created: Counter,
    pub transactions_confirmed: Counter,
    pub transactions_timed_out: Counter,
    pub fork_reverts: Counter,
    pub root_settlements: Counter,
    pub create_failures: Counter,

    // -- Retries --
    pub retries_sent: Counter,
    pub resend_failures: Counter,

    // -- Slots --
    pub slots_evicted: Counter,
    pub tracked_slots: Gauge,
    pub target_slot: Gauge,

    // -- Latency --
    pub pending_transactions: Gauge,
    pub processed_latency_ms: Histogram,
    pub confirmed_latency_ms: Histogram,
}

impl TrackerMetrics {
    pub fn new() -> Self {
        Self {
            transactions_created: Counter::new(),
            transactions_confirmed: Counter::new(),
            transactions_timed_out: Counter::new(),
            fork_reverts: Counter::new(),
            root_settlements: Counter::new(),
            create_failures: Counter::new(),
            retries_sent: Counter::new(),
            resend_failures: Counter::new(),
            slots_evicted: Counter::new(),
            tracked_slots: Gauge::new(),
            target_slot: Gauge::new(),
            pending_transactions: Gauge::new(),
            processed_latency_ms: Histogram::new(confirmation_latency_buckets()),
            confirmed_latency_ms: Histogram::new(confirmation_latency_buckets()),
        }
    }

    pub fn latency(&self, tier: CommitmentTier) -> &Histogram {
        match tier {
            CommitmentTier::Processed => &self.processed_latency_ms,
            CommitmentTier::Confirmed => &self.confirmed_latency_ms,
        }
    }

    /// Record what a registry action changed.
    pub fn record_outcome(&self, outcome: &ActionOutcome) {
        if outcome.created.is_some() {
            self.transactions_created.inc();
        }
        self.transactions_confirmed.add(outcome.promoted as u64);
        self.fork_reverts.add(outcome.reverted as u64);
        self.transactions_timed_out.add(outcome.timed_out as u64);
        self.root_settlements.add(outcome.settled as u64);
        for (tier, ms) in &outcome.confirmations {
            self.latency(*tier).observe(*ms as f64);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transactions_created: self.transactions_created.get(),
            transactions_confirmed: self.transactions_confirmed.get(),
            transactions_timed_out: self.transactions_timed_out.get(),
            fork_reverts: self.fork_reverts.get(),
            root_settlements: self.root_settlements.get(),
            create_failures: self.create_failures.get(),
            retries_sent: self.retries_sent.get(),
            resend_failures: self.resend_failures.get(),
            slots_evicted: self.slots_evicted.get(),
            tracked_slots: self.tracked_slots.get(),
            target_slot: self.target_slot.get(),
            pending_transactions: self.pending_transactions.get(),
            processed_latency_ms: self.processed_latency_ms.snapshot(),
            confirmed_latency_ms: self.confirmed_latency_ms.snapshot(),
        }
    }
}

impl Default for TrackerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    pub buckets: Vec<(f64, u64)>,
    pub sum: f64,
    pub count: u64,
}

/// Point-in-time copy of [`TrackerMetrics`].
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub transactions_created: u64,
    pub transactions_confirmed: u64,
    pub transactions_timed_out: u64,
    pub fork_reverts: u64,
    pub root_settlements: u64,
    pub create_failures: u64,
    pub retries_sent: u64,
    pub resend_failures: u64,
    pub slots_evicted: u64,
    pub tracked_slots: i64,
    pub target_slot: i64,
    pub pending_transactions: i64,
    pub processed_latency_ms: HistogramSnapshot,
    pub confirmed_latency_ms: HistogramSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_cumulative_buckets() {
        let h = Histogram::new(vec![100.0, 500.0, 1_000.0]);
        h.observe(50.0);
        h.observe(400.0);
        h.observe(900.0);
        h.observe(3_000.0);

        assert_eq!(h.get_count(), 4);
        assert!((h.get_sum() - 4_350.0).abs() < 1e-6);
        assert_eq!(
            h.get_buckets(),
            vec![(100.0, 1), (500.0, 2), (1_000.0, 3)]
        );
    }

    #[test]
    fn test_record_outcome() {
        let metrics = TrackerMetrics::new();
        metrics.record_outcome(&ActionOutcome {
            created: Some(0),
            ..ActionOutcome::default()
        });
        metrics.record_outcome(&ActionOutcome {
            promoted: 2,
            reverted: 1,
            confirmations: vec![
                (CommitmentTier::Processed, 300),
                (CommitmentTier::Confirmed, 1_100),
            ],
            ..ActionOutcome::default()
        });

        let snap = metrics.snapshot();
        assert_eq!(snap.transactions_created, 1);
        assert_eq!(snap.transactions_confirmed, 2);
        assert_eq!(snap.fork_reverts, 1);
        assert_eq!(snap.processed_latency_ms.count, 1);
        assert_eq!(snap.confirmed_latency_ms.count, 1);
        assert!((snap.confirmed_latency_ms.sum - 1_100.0).abs() < 1e-6);
    }

    #[test]
    fn test_gauge() {
        let g = Gauge::new();
        g.set(42);
        assert_eq!(g.get(), 42);
        g.set(-1);
        assert_eq!(g.get(), -1);
    }
}
