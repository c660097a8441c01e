//! Prometheus text exposition of tracker metrics.
//!
//! Encodes a [`MetricsSnapshot`] into the
//! [Prometheus exposition format](https://prometheus.io/docs/instrumenting/exposition_formats/)
//! (text/plain; version=0.0.4).

use {
    crate::metrics::{HistogramSnapshot, MetricsSnapshot},
    std::fmt::Write,
};

/// Encode a metrics snapshot into Prometheus text exposition format.
pub fn encode(snap: &MetricsSnapshot) -> String {
    let mut out = String::with_capacity(2048);

    // Transactions
    write_counter(
        &mut out,
        "trv1_latency_transactions_created_total",
        "Transactions submitted and tracked",
        snap.transactions_created,
    );
    write_counter(
        &mut out,
        "trv1_latency_transactions_confirmed_total",
        "Transactions promoted from pending to success",
        snap.transactions_confirmed,
    );
    write_counter(
        &mut out,
        "trv1_latency_transactions_timed_out_total",
        "Transactions that expired without inclusion evidence",
        snap.transactions_timed_out,
    );
    write_counter(
        &mut out,
        "trv1_latency_fork_reverts_total",
        "Successful transactions reverted to pending by a fork",
        snap.fork_reverts,
    );
    write_counter(
        &mut out,
        "trv1_latency_root_settlements_total",
        "Transactions settled by a rooted landed slot",
        snap.root_settlements,
    );
    write_counter(
        &mut out,
        "trv1_latency_create_failures_total",
        "Transaction creations refused or failed",
        snap.create_failures,
    );
    write_gauge(
        &mut out,
        "trv1_latency_pending_transactions",
        "Transactions currently pending",
        snap.pending_transactions,
    );

    // Retries
    write_counter(
        &mut out,
        "trv1_latency_retries_sent_total",
        "Resends of pending transactions",
        snap.retries_sent,
    );
    write_counter(
        &mut out,
        "trv1_latency_resend_failures_total",
        "Resends that failed",
        snap.resend_failures,
    );

    // Slots
    write_counter(
        &mut out,
        "trv1_latency_slots_evicted_total",
        "Slot records dropped by the retention limit",
        snap.slots_evicted,
    );
    write_gauge(
        &mut out,
        "trv1_latency_tracked_slots",
        "Slot records currently held",
        snap.tracked_slots,
    );
    write_gauge(
        &mut out,
        "trv1_latency_target_slot",
        "Highest slot observed",
        snap.target_slot,
    );

    // Latency
    write_histogram(
        &mut out,
        "trv1_latency_processed_ms",
        "Time from send to processed commitment in milliseconds",
        &snap.processed_latency_ms,
    );
    write_histogram(
        &mut out,
        "trv1_latency_confirmed_ms",
        "Time from send to confirmed commitment in milliseconds",
        &snap.confirmed_latency_ms,
    );

    out
}

// ---------------------------------------------------------------------------
// Helper writers
// ---------------------------------------------------------------------------

fn write_header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

fn write_counter(out: &mut String, name: &str, help: &str, value: u64) {
    write_header(out, name, help, "counter");
    let _ = writeln!(out, "{name} {value}\n");
}

fn write_gauge(out: &mut String, name: &str, help: &str, value: i64) {
    write_header(out, name, help, "gauge");
    let _ = writeln!(out, "{name} {value}\n");
}

fn write_histogram(out: &mut String, name: &str, help: &str, histogram: &HistogramSnapshot) {
    write_header(out, name, help, "histogram");
    for (bound, cumulative) in &histogram.buckets {
        if bound.is_infinite() {
            continue;
        }
        let _ = writeln!(out, "{name}_bucket{{le=\"{bound}\"}} {cumulative}");
    }
    let count = histogram.count;
    let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {count}");
    let _ = writeln!(out, "{name}_sum {}", histogram.sum);
    let _ = writeln!(out, "{name}_count {count}\n");
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{metrics::TrackerMetrics, types::CommitmentTier},
    };

    #[test]
    fn test_encode_counters_and_gauges() {
        let metrics = TrackerMetrics::new();
        metrics.transactions_created.add(12);
        metrics.fork_reverts.inc();
        metrics.target_slot.set(4_096);

        let text = encode(&metrics.snapshot());
        assert!(text.contains("# TYPE trv1_latency_transactions_created_total counter"));
        assert!(text.contains("trv1_latency_transactions_created_total 12"));
        assert!(text.contains("trv1_latency_fork_reverts_total 1"));
        assert!(text.contains("# TYPE trv1_latency_target_slot gauge"));
        assert!(text.contains("trv1_latency_target_slot 4096"));
    }

    #[test]
    fn test_encode_histogram() {
        let metrics = TrackerMetrics::new();
        let latency = metrics.latency(CommitmentTier::Confirmed);
        latency.observe(300.0);
        latency.observe(1_000.0);
        latency.observe(60_000.0);

        let text = encode(&metrics.snapshot());
        assert!(text.contains("# TYPE trv1_latency_confirmed_ms histogram"));
        assert!(text.contains("trv1_latency_confirmed_ms_bucket{le=\"400\"} 1"));
        assert!(text.contains("trv1_latency_confirmed_ms_bucket{le=\"1200\"} 2"));
        assert!(text.contains("trv1_latency_confirmed_ms_bucket{le=\"+Inf\"} 3"));
        assert!(text.contains("trv1_latency_confirmed_ms_sum 61300"));
        assert!(text.contains("trv1_latency_confirmed_ms_count 3"));
        assert!(text.contains("trv1_latency_processed_ms_count 0"));
    }

    #[test]
    fn test_every_family_has_help() {
        let text = encode(&TrackerMetrics::new().snapshot());
        let families = text
            .lines()
            .filter(|line| line.starts_with("# HELP "))
            .count();
        let types = text
            .lines()
            .filter(|line| line.starts_with("# TYPE "))
            .count();
        assert_eq!(families, 14);
        assert_eq!(families, types);
    }
}
