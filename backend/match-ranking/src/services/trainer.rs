// ============================================
// Resampling Trainer (重採樣訓練循環)
// ============================================
//
// INIT → TRAIN_SEED → {RESAMPLE → TRAIN_CONTINUE}* → DONE
//
// - INIT: optionally split off a validation slice before any sampling;
//   its negatives are drawn once and reused by every round
// - TRAIN_SEED: sample negatives with the base seed, join features,
//   group by bank, train `resample_freq` rounds
// - RESAMPLE i: sample again with seed `base + i`, continue training
//   from the previous `TrainingState`
// - DONE: return the model (and holdout predictions/metrics if asked)
//
// Total rounds: ceil(iterations / resample_freq) * resample_freq

use crate::error::{MatchingError, Result};
use crate::models::{ground_truth, MatchPair, RankedList, NO_MATCH_KEY};
use crate::services::dataset::QueryDataset;
use crate::services::evaluator::{evaluate, RankingMetrics};
use crate::services::learner::{RankLearner, TrainingState};
use crate::services::sampler::{holdout_split, CandidateSampler};
use crate::services::topk::{ModelScorer, TopKEngine};
use match_features::{FeatureTable, IdentityId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::info;
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TrainingConfig {
    /// Requested total boosting rounds (rounded up to a multiple of `resample_freq`)
    #[validate(range(min = 1))]
    pub iterations: usize,
    #[validate(range(min = 1))]
    pub resample_freq: usize,
    /// Negatives drawn per positive pair
    pub sample_size: usize,
    pub validation: bool,
    #[validate(range(min = 0.0, max = 1.0))]
    pub validation_fraction: f64,
    pub validation_seed: u64,
    pub random_state: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            iterations: 3000,
            resample_freq: 1000,
            sample_size: 10,
            validation: false,
            validation_fraction: 0.1,
            validation_seed: 42,
            random_state: 42,
        }
    }
}

impl TrainingConfig {
    /// Number of sampling rounds: one seed round plus the resample rounds
    pub fn round_count(&self) -> usize {
        self.iterations.div_ceil(self.resample_freq.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingPhase {
    Init,
    TrainSeed,
    Resample { round: usize },
    Done,
}

impl fmt::Display for TrainingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingPhase::Init => f.write_str("INIT"),
            TrainingPhase::TrainSeed => f.write_str("TRAIN_SEED"),
            TrainingPhase::Resample { round } => write!(f, "RESAMPLE {}", round),
            TrainingPhase::Done => f.write_str("DONE"),
        }
    }
}

/// Model trained on one split and scored on a holdout
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub state: TrainingState,
    pub metrics: RankingMetrics,
    pub best_iteration: Option<usize>,
    pub predictions: Vec<RankedList>,
}

pub struct ResamplingTrainer<L: RankLearner> {
    learner: L,
    config: TrainingConfig,
    sampler: CandidateSampler,
    phase: TrainingPhase,
}

impl<L: RankLearner> ResamplingTrainer<L> {
    pub fn new(learner: L, config: TrainingConfig) -> Self {
        let sampler = CandidateSampler::new(config.sample_size);
        Self {
            learner,
            config,
            sampler,
            phase: TrainingPhase::Init,
        }
    }

    pub fn phase(&self) -> TrainingPhase {
        self.phase
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    fn enter(&mut self, phase: TrainingPhase) {
        self.phase = phase;
        info!(phase = %phase, "Training phase");
    }

    /// Train on every pair in `positives`
    pub fn train(
        &mut self,
        positives: &[MatchPair],
        bank_features: &FeatureTable,
        rtk_features: &FeatureTable,
    ) -> Result<TrainingState> {
        if self.config.resample_freq == 0 || self.config.iterations == 0 {
            return Err(MatchingError::Configuration(
                "iterations and resample_freq must be positive".to_string(),
            ));
        }

        self.enter(TrainingPhase::Init);
        let (train, validation) = if self.config.validation {
            let (train, holdout) = holdout_split(
                positives,
                self.config.validation_fraction,
                self.config.validation_seed,
            );
            let pairs = self.sampler.sample(&holdout, self.config.random_state)?;
            let dataset = QueryDataset::build(&pairs, bank_features, rtk_features);
            (train, vec![dataset])
        } else {
            (positives.to_vec(), Vec::new())
        };

        let mut state: Option<TrainingState> = None;
        for round in 0..self.config.round_count() {
            self.enter(if round == 0 {
                TrainingPhase::TrainSeed
            } else {
                TrainingPhase::Resample { round }
            });

            let seed = self.config.random_state.wrapping_add(round as u64);
            let pairs = self.sampler.sample(&train, seed)?;
            let dataset = QueryDataset::build(&pairs, bank_features, rtk_features);
            if dataset.is_empty() {
                return Err(MatchingError::InvalidInput(format!(
                    "No candidate pair of round {} has both bank and rtk features",
                    round
                )));
            }

            info!(
                round,
                seed,
                train_rows = dataset.n_rows(),
                train_features = dataset.n_features(),
                validation_rows = validation.first().map(|v| v.n_rows()),
                "Training round"
            );

            state = Some(self.learner.fit(
                &dataset,
                &validation,
                self.config.resample_freq,
                state.take(),
            )?);
        }

        self.enter(TrainingPhase::Done);
        state.ok_or_else(|| MatchingError::Training("No training round was run".to_string()))
    }

    /// Train on `train`, then rank and score every bank of `test`.
    ///
    /// Candidates are the distinct real rtk identities of `test`, plus the
    /// "no match" sentinel as a scored candidate when `test` labels any bank
    /// with it.
    pub fn train_and_evaluate(
        &mut self,
        train: &[MatchPair],
        test: &[MatchPair],
        bank_features: &FeatureTable,
        rtk_features: &FeatureTable,
        engine: &TopKEngine,
    ) -> Result<TrainingReport> {
        let state = self.train(train, bank_features, rtk_features)?;

        let banks = distinct(test.iter().map(|p| p.bank));
        let mut rtks = distinct(test.iter().filter_map(|p| p.target.rtk()));
        if test.iter().any(|p| p.target.is_no_match()) {
            rtks.push(NO_MATCH_KEY);
        }
        let truth = ground_truth(test);

        let scorer = ModelScorer::new(&state, bank_features, rtk_features);
        let predictions = engine.rank(&banks, &rtks, &scorer, Some(&truth))?;
        let metrics = evaluate(&predictions, &truth);

        info!(
            precision = metrics.precision,
            mrr = metrics.mrr,
            r1 = metrics.r1,
            best_iteration = state.best_iteration,
            "Holdout evaluation"
        );

        Ok(TrainingReport {
            best_iteration: state.best_iteration,
            state,
            metrics,
            predictions,
        })
    }
}

/// Unique ids in first-seen order
fn distinct(ids: impl Iterator<Item = IdentityId>) -> Vec<IdentityId> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(*id)).collect()
}
