//! Aggregate views over a set of tracked transactions.

use crate::types::{CommitmentTier, TrackedTransaction, TransactionStatus};

/// Counts and average confirmation time, computed from one snapshot of the
/// registry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransactionStats {
    pub created_count: usize,
    /// Transactions in `Success`.
    pub confirmed_count: usize,
    /// Transactions that timed out.
    pub dropped_count: usize,
    pub pending_count: usize,
    processed_sum_secs: f64,
    processed_samples: usize,
    confirmed_sum_secs: f64,
    confirmed_samples: usize,
}

impl TransactionStats {
    pub fn from_transactions(transactions: &[TrackedTransaction]) -> Self {
        let mut stats = Self {
            created_count: transactions.len(),
            ..Self::default()
        };
        for tx in transactions {
            let count = match tx.status() {
                TransactionStatus::Pending => &mut stats.pending_count,
                TransactionStatus::TimedOut => &mut stats.dropped_count,
                TransactionStatus::Success => &mut stats.confirmed_count,
            };
            *count = count.saturating_add(1);
            let Some(timing) = tx.timing() else {
                continue;
            };
            if let Some(processed) = timing.processed {
                stats.processed_sum_secs += processed.as_secs_f64();
                stats.processed_samples = stats.processed_samples.saturating_add(1);
            }
            if let Some(confirmed) = timing.confirmed {
                stats.confirmed_sum_secs += confirmed.as_secs_f64();
                stats.confirmed_samples = stats.confirmed_samples.saturating_add(1);
            }
        }
        stats
    }

    /// Mean time to reach `tier` in seconds over successful transactions that
    /// reached it, or `0.0` if none did.
    pub fn average_confirmation_time(&self, tier: CommitmentTier) -> f64 {
        let (sum, samples) = match tier {
            CommitmentTier::Processed => (self.processed_sum_secs, self.processed_samples),
            CommitmentTier::Confirmed => (self.confirmed_sum_secs, self.confirmed_samples),
        };
        if samples == 0 {
            return 0.0;
        }
        sum / samples as f64
    }

    /// Number of transactions that carry a duration for `tier`.
    pub fn samples(&self, tier: CommitmentTier) -> usize {
        match tier {
            CommitmentTier::Processed => self.processed_samples,
            CommitmentTier::Confirmed => self.confirmed_samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::types::{
            PendingTransaction, SlotInfo, Timing, TransactionDetails, TransactionState,
        },
        solana_pubkey::Pubkey,
        solana_signature::Signature,
        std::time::Duration,
    };

    fn tx(state: TransactionState) -> TrackedTransaction {
        TrackedTransaction {
            details: TransactionDetails {
                id: 0,
                fee_account: Pubkey::new_from_array([3; 32]),
                program_account: Pubkey::new_from_array([4; 32]),
                signature: Signature::default(),
            },
            state,
        }
    }

    fn success(processed: Option<u64>, confirmed: Option<u64>) -> TrackedTransaction {
        tx(TransactionState::Success {
            received: Vec::new(),
            slot: SlotInfo {
                target: 1,
                landed: 2,
            },
            timing: Timing {
                sent_at: 0,
                processed: processed.map(Duration::from_millis),
                confirmed: confirmed.map(Duration::from_millis),
            },
            pending: None,
        })
    }

    #[test]
    fn test_empty() {
        let stats = TransactionStats::from_transactions(&[]);
        assert_eq!(stats.created_count, 0);
        assert_eq!(stats.average_confirmation_time(CommitmentTier::Confirmed), 0.0);
    }

    #[test]
    fn test_counts_and_averages() {
        let transactions = vec![
            success(Some(400), Some(1_000)),
            success(Some(600), None),
            success(None, Some(2_000)),
            tx(TransactionState::Pending {
                received: Vec::new(),
                pending: PendingTransaction::new(0, 1),
            }),
            tx(TransactionState::TimedOut),
        ];
        let stats = TransactionStats::from_transactions(&transactions);
        assert_eq!(stats.created_count, 5);
        assert_eq!(stats.confirmed_count, 3);
        assert_eq!(stats.pending_count, 1);
        assert_eq!(stats.dropped_count, 1);
        assert_eq!(stats.samples(CommitmentTier::Processed), 2);

        let processed = stats.average_confirmation_time(CommitmentTier::Processed);
        assert!((processed - 0.5).abs() < 1e-9);
        let confirmed = stats.average_confirmation_time(CommitmentTier::Confirmed);
        assert!((confirmed - 1.5).abs() < 1e-9);
    }
}
