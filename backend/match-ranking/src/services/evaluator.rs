// ============================================
// Ranking Evaluator (排序評估)
// ============================================
//
// Per bank with ground truth:
// - precision@100: 1 if the true target is in the first 100 candidates
// - reciprocal rank: 1 / (1-based position within the first 100), else 0
//
// Aggregates are means over evaluated banks; R1 is their harmonic mean.

use crate::models::{GroundTruth, MatchTarget, RankedList};
use serde::{Deserialize, Serialize};

/// Candidates considered by the metrics
pub const METRIC_CUTOFF: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RankingMetrics {
    pub precision: f64,
    pub mrr: f64,
    pub r1: f64,
    /// Banks that had both a ranked list and ground truth
    pub evaluated: usize,
}

pub fn precision_at_k(candidates: &[MatchTarget], truth: MatchTarget, k: usize) -> f64 {
    if candidates.iter().take(k).any(|c| *c == truth) {
        1.0
    } else {
        0.0
    }
}

pub fn reciprocal_rank(candidates: &[MatchTarget], truth: MatchTarget, k: usize) -> f64 {
    candidates
        .iter()
        .take(k)
        .position(|c| *c == truth)
        .map_or(0.0, |rank| 1.0 / (rank + 1) as f64)
}

/// Harmonic mean of precision and MRR, 0 when both are 0
pub fn harmonic_mean(precision: f64, mrr: f64) -> f64 {
    let total = precision + mrr;
    if total == 0.0 {
        0.0
    } else {
        2.0 * precision * mrr / total
    }
}

/// Running sums for cumulative metrics over batches
#[derive(Debug, Clone, Default)]
pub struct MetricsAccumulator {
    precision_sum: f64,
    rr_sum: f64,
    evaluated: usize,
}

impl MetricsAccumulator {
    /// Add one ranked list; banks without ground truth are skipped.
    pub fn observe(&mut self, list: &RankedList, truth: &GroundTruth) {
        if let Some(target) = truth.get(&list.bank) {
            self.precision_sum += precision_at_k(&list.candidates, *target, METRIC_CUTOFF);
            self.rr_sum += reciprocal_rank(&list.candidates, *target, METRIC_CUTOFF);
            self.evaluated += 1;
        }
    }

    pub fn metrics(&self) -> RankingMetrics {
        if self.evaluated == 0 {
            return RankingMetrics::default();
        }
        let precision = self.precision_sum / self.evaluated as f64;
        let mrr = self.rr_sum / self.evaluated as f64;
        RankingMetrics {
            precision,
            mrr,
            r1: harmonic_mean(precision, mrr),
            evaluated: self.evaluated,
        }
    }
}

pub fn evaluate(predictions: &[RankedList], truth: &GroundTruth) -> RankingMetrics {
    let mut acc = MetricsAccumulator::default();
    for list in predictions {
        acc.observe(list, truth);
    }
    acc.metrics()
}
