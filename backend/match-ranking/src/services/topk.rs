// ============================================
// Batched Top-K Engine (批量 Top-K 排序)
// ============================================
//
// Ranks every rtk candidate for each bank without materializing the
// full bank × rtk product:
// 1. Take the next `batch_size` banks
// 2. Cross them with the whole rtk universe and score (bank-major rows)
// 3. Stable sort each bank's candidates by descending score (NaN last)
// 4. Keep the first `top_k`, then place the "no match" sentinel
//
// When `NO_MATCH_KEY` is part of the universe the sentinel is scored like
// any rtk (its rtk side is all NaN) and no placement rule applies.
//
// With ground truth, cumulative metrics are logged after every batch.

use crate::error::{MatchingError, Result};
use crate::models::{GroundTruth, MatchTarget, NoMatchPlacement, RankedList, NO_MATCH_KEY};
use crate::services::evaluator::MetricsAccumulator;
use crate::services::learner::Scorer;
use match_features::{FeatureTable, IdentityId};
use ndarray::Array2;
use std::cmp::Ordering;
use tracing::{debug, info, warn};

/// Scores a bank batch against a candidate list
pub trait BatchScorer {
    /// One score per (bank, rtk), bank-major: `scores[b * rtks.len() + r]`
    fn score_batch(&self, banks: &[IdentityId], rtks: &[IdentityId]) -> Result<Vec<f64>>;
}

/// Pair rows for every (bank, rtk) in bank-major order.
///
/// Bank features come first. A side without a feature row is all NaN.
pub fn pair_rows(
    banks: &[IdentityId],
    rtks: &[IdentityId],
    bank_features: &FeatureTable,
    rtk_features: &FeatureTable,
) -> Array2<f32> {
    let bank_width = bank_features.n_cols();
    let mut rows = Array2::<f32>::from_elem(
        (banks.len() * rtks.len(), bank_width + rtk_features.n_cols()),
        f32::NAN,
    );

    for (b, bank) in banks.iter().enumerate() {
        let bank_row = bank_features.row(*bank);
        for (r, rtk) in rtks.iter().enumerate() {
            let mut dst = rows.row_mut(b * rtks.len() + r);
            if let Some(src) = &bank_row {
                dst.slice_mut(ndarray::s![..bank_width]).assign(src);
            }
            if let Some(src) = rtk_features.row(*rtk) {
                dst.slice_mut(ndarray::s![bank_width..]).assign(&src);
            }
        }
    }
    rows
}

/// One model over one pair of feature tables
pub struct ModelScorer<'a, S: Scorer> {
    model: &'a S,
    bank_features: &'a FeatureTable,
    rtk_features: &'a FeatureTable,
}

impl<'a, S: Scorer> ModelScorer<'a, S> {
    pub fn new(model: &'a S, bank_features: &'a FeatureTable, rtk_features: &'a FeatureTable) -> Self {
        Self {
            model,
            bank_features,
            rtk_features,
        }
    }
}

impl<S: Scorer> BatchScorer for ModelScorer<'_, S> {
    fn score_batch(&self, banks: &[IdentityId], rtks: &[IdentityId]) -> Result<Vec<f64>> {
        let width = self.bank_features.n_cols() + self.rtk_features.n_cols();
        if width != self.model.n_features() {
            return Err(MatchingError::Inference(format!(
                "Model expects {} features, feature tables provide {}",
                self.model.n_features(),
                width
            )));
        }

        let rows = pair_rows(banks, rtks, self.bank_features, self.rtk_features);
        Ok(self.model.relevance(rows.view())?.to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopKEngine {
    pub batch_size: usize,
    pub top_k: usize,
    pub no_match: NoMatchPlacement,
}

impl Default for TopKEngine {
    fn default() -> Self {
        Self {
            batch_size: 20,
            top_k: 100,
            no_match: NoMatchPlacement::Omit,
        }
    }
}

/// Descending by score; NaN sorts after every number
fn by_score_desc(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

impl TopKEngine {
    pub fn new(batch_size: usize, top_k: usize, no_match: NoMatchPlacement) -> Self {
        Self {
            batch_size,
            top_k,
            no_match,
        }
    }

    /// Rank `rtks` for every bank in `banks`, in bank order.
    pub fn rank<S: BatchScorer>(
        &self,
        banks: &[IdentityId],
        rtks: &[IdentityId],
        scorer: &S,
        truth: Option<&GroundTruth>,
    ) -> Result<Vec<RankedList>> {
        if self.batch_size == 0 || self.top_k == 0 {
            return Err(MatchingError::Configuration(
                "batch_size and top_k must be positive".to_string(),
            ));
        }
        if rtks.is_empty() {
            warn!(banks = banks.len(), "No rtk candidates to rank");
        }

        let scored_sentinel = rtks.contains(&NO_MATCH_KEY);
        let mut results = Vec::with_capacity(banks.len());
        let mut running = MetricsAccumulator::default();
        let n_batches = banks.len().div_ceil(self.batch_size);

        for (batch, chunk) in banks.chunks(self.batch_size).enumerate() {
            let scores = if rtks.is_empty() {
                Vec::new()
            } else {
                scorer.score_batch(chunk, rtks)?
            };
            if scores.len() != chunk.len() * rtks.len() {
                return Err(MatchingError::Inference(format!(
                    "Scorer returned {} scores for {} rows",
                    scores.len(),
                    chunk.len() * rtks.len()
                )));
            }

            for (b, bank) in chunk.iter().enumerate() {
                let bank_scores = &scores[b * rtks.len()..(b + 1) * rtks.len()];
                let list = RankedList {
                    bank: *bank,
                    candidates: self.select(rtks, bank_scores, scored_sentinel),
                };
                if let Some(truth) = truth {
                    running.observe(&list, truth);
                }
                results.push(list);
            }

            if truth.is_some() {
                let metrics = running.metrics();
                info!(
                    batch = batch + 1,
                    n_batches,
                    r1 = metrics.r1,
                    mrr = metrics.mrr,
                    precision = metrics.precision,
                    "Ranked batch"
                );
            } else {
                debug!(batch = batch + 1, n_batches, banks = chunk.len(), "Ranked batch");
            }
        }

        Ok(results)
    }

    fn select(&self, rtks: &[IdentityId], scores: &[f64], scored_sentinel: bool) -> Vec<MatchTarget> {
        let mut order: Vec<usize> = (0..rtks.len()).collect();
        // sort_by is stable: equal scores keep candidate order
        order.sort_by(|a, b| by_score_desc(scores[*a], scores[*b]));

        let mut candidates: Vec<MatchTarget> = order
            .into_iter()
            .take(self.top_k)
            .map(|i| MatchTarget::from_key(rtks[i]))
            .collect();

        // A scored sentinel keeps the rank its score gave it
        if scored_sentinel {
            return candidates;
        }

        match self.no_match {
            NoMatchPlacement::Fallback => {
                if candidates.len() < self.top_k {
                    candidates.push(MatchTarget::NoMatch);
                }
            }
            NoMatchPlacement::Leading => {
                candidates.insert(0, MatchTarget::NoMatch);
                candidates.truncate(self.top_k);
            }
            NoMatchPlacement::Omit => {}
        }
        candidates
    }
}
