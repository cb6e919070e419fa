// ============================================
// Candidate Sampler (負樣本採樣)
// ============================================
//
// Expands verified bank → rtk pairs into a labelled training set:
// 1. Repeat bank ids `sample_size` times and shuffle (seed)
// 2. Repeat non-sentinel rtk ids proportionally and shuffle (seed + 1)
// 3. Pair both columns positionally as label-0 negatives
// 4. Merge with the positives, keeping the max label per (bank, rtk)
// 5. Shuffle the result (seed)

use crate::error::{MatchingError, Result};
use crate::models::{CandidatePair, MatchPair};
use match_features::IdentityId;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct CandidateSampler {
    /// Negatives drawn per positive pair
    pub sample_size: usize,
}

impl Default for CandidateSampler {
    fn default() -> Self {
        Self { sample_size: 10 }
    }
}

impl CandidateSampler {
    pub fn new(sample_size: usize) -> Self {
        Self { sample_size }
    }

    pub fn sample(&self, positives: &[MatchPair], seed: u64) -> Result<Vec<CandidatePair>> {
        let rtk_pool: Vec<IdentityId> = positives.iter().filter_map(|p| p.target.rtk()).collect();
        if rtk_pool.is_empty() {
            return Err(MatchingError::Configuration(
                "Negative sampling needs at least one pair with a real rtk identity".to_string(),
            ));
        }

        let mut banks: Vec<IdentityId> = positives
            .iter()
            .map(|p| p.bank)
            .cycle()
            .take(positives.len() * self.sample_size)
            .collect();
        banks.shuffle(&mut StdRng::seed_from_u64(seed));

        let ratio = positives.len() as f64 / rtk_pool.len() as f64;
        let repeats = (self.sample_size as f64 * ratio).ceil() as usize;
        let mut rtks: Vec<IdentityId> = rtk_pool
            .iter()
            .copied()
            .cycle()
            .take(rtk_pool.len() * repeats)
            .collect();
        rtks.shuffle(&mut StdRng::seed_from_u64(seed.wrapping_add(1)));

        let mut labels: BTreeMap<(IdentityId, IdentityId), u8> = BTreeMap::new();
        for pair in positives {
            if let Some(rtk) = pair.target.rtk() {
                labels.insert((pair.bank, rtk), 1);
            }
        }
        for (bank, rtk) in banks.iter().zip(&rtks) {
            labels.entry((*bank, *rtk)).or_insert(0);
        }

        let mut pairs: Vec<CandidatePair> = labels
            .into_iter()
            .map(|((bank, rtk), label)| CandidatePair { bank, rtk, label })
            .collect();
        pairs.shuffle(&mut StdRng::seed_from_u64(seed));

        debug!(
            positives = positives.len(),
            candidates = pairs.len(),
            seed,
            "Sampled negative candidates"
        );

        Ok(pairs)
    }
}

/// Split pairs into (train, holdout) with a seeded shuffle.
///
/// The holdout receives `ceil(len * fraction)` pairs.
pub fn holdout_split(pairs: &[MatchPair], fraction: f64, seed: u64) -> (Vec<MatchPair>, Vec<MatchPair>) {
    let mut shuffled = pairs.to_vec();
    shuffled.shuffle(&mut StdRng::seed_from_u64(seed));

    let holdout_len = ((pairs.len() as f64) * fraction.clamp(0.0, 1.0)).ceil() as usize;
    let train = shuffled.split_off(holdout_len.min(shuffled.len()));
    (train, shuffled)
}
