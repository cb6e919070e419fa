// Integration tests for the ranking pipeline: sampler → dataset → learner → top-k → evaluator

use match_features::{FeatureTable, IdentityId};
use match_ranking::models::ground_truth;
use match_ranking::services::evaluator::evaluate;
use match_ranking::services::topk::{BatchScorer, ModelScorer};
use match_ranking::services::{
    BoostingParams, CandidateSampler, ObliviousBoosting, QueryDataset, RankLearner,
    ResamplingTrainer, Scorer, TopKEngine, TrainingConfig, TrainingState,
};
use match_ranking::{MatchPair, MatchTarget, NoMatchPlacement, Result};
use std::collections::HashSet;

const BANKS: i64 = 12;

fn rtk_of(bank: IdentityId) -> IdentityId {
    1000 + bank
}

fn positives() -> Vec<MatchPair> {
    (0..BANKS)
        .map(|b| MatchPair::new(b, MatchTarget::Rtk(rtk_of(b))))
        .collect()
}

/// One-hot group features shared by a bank and its rtk
fn tables() -> (FeatureTable, FeatureTable) {
    let bank = FeatureTable::from_sparse(
        (0..BANKS).flat_map(|b| vec![(b, b % 3, 1.0), (b, 3, b as f64)]),
        |k| format!("count-mcc{}", k),
    );
    let rtk = FeatureTable::from_sparse(
        (0..BANKS).flat_map(|b| vec![(rtk_of(b), b % 3, 1.0), (rtk_of(b), 3, 2.0)]),
        |k| format!("cat_id-{}", k),
    );
    (bank, rtk)
}

fn small_params() -> BoostingParams {
    BoostingParams {
        depth: 3,
        border_count: 8,
        ..BoostingParams::default()
    }
}

/// Scores 1 for the labelled pair, 0 otherwise
struct OracleScorer;

impl BatchScorer for OracleScorer {
    fn score_batch(&self, banks: &[IdentityId], rtks: &[IdentityId]) -> Result<Vec<f64>> {
        Ok(banks
            .iter()
            .flat_map(|b| rtks.iter().map(move |r| if *r == rtk_of(*b) { 1.0 } else { 0.0 }))
            .collect())
    }
}

#[test]
fn test_oracle_scorer_gets_perfect_metrics() {
    let pairs = positives();
    let truth = ground_truth(&pairs);
    let banks: Vec<IdentityId> = pairs.iter().map(|p| p.bank).collect();
    let rtks: Vec<IdentityId> = pairs.iter().filter_map(|p| p.target.rtk()).collect();

    let engine = TopKEngine::new(5, 100, NoMatchPlacement::Omit);
    let predictions = engine.rank(&banks, &rtks, &OracleScorer, Some(&truth)).unwrap();
    let metrics = evaluate(&predictions, &truth);

    assert_eq!(predictions.len(), BANKS as usize);
    assert_eq!(metrics.precision, 1.0);
    assert_eq!(metrics.mrr, 1.0);
    assert_eq!(metrics.r1, 1.0);
}

#[test]
fn test_sampled_dataset_trains_a_scorer() {
    let (bank, rtk) = tables();
    let pairs = CandidateSampler::new(4).sample(&positives(), 7).unwrap();
    let dataset = QueryDataset::build(&pairs, &bank, &rtk);

    assert_eq!(dataset.groups().len(), BANKS as usize);
    assert_eq!(dataset.n_features(), bank.n_cols() + rtk.n_cols());
    assert_eq!(
        dataset.labels().iter().filter(|l| **l > 0.5).count(),
        BANKS as usize
    );

    let state = ObliviousBoosting::new(small_params())
        .fit(&dataset, &[], 10, None)
        .unwrap();
    assert_eq!(state.rounds(), 10);

    let scores = state.predict(dataset.features()).unwrap();
    assert_eq!(scores.len(), dataset.n_rows());
    assert!(scores.iter().all(|s| s.is_finite()));
}

#[test]
fn test_resampling_trainer_then_rank_every_bank() {
    let (bank, rtk) = tables();
    let config = TrainingConfig {
        iterations: 25,
        resample_freq: 10,
        sample_size: 4,
        ..TrainingConfig::default()
    };
    let mut trainer = ResamplingTrainer::new(ObliviousBoosting::new(small_params()), config);
    let state = trainer.train(&positives(), &bank, &rtk).unwrap();

    // ceil(25 / 10) rounds of 10 trees each
    assert_eq!(state.rounds(), 30);

    let banks: Vec<IdentityId> = (0..BANKS).collect();
    let rtks: Vec<IdentityId> = (0..BANKS).map(rtk_of).collect();
    let engine = TopKEngine::new(5, 4, NoMatchPlacement::Fallback);
    let predictions = engine
        .rank(&banks, &rtks, &ModelScorer::new(&state, &bank, &rtk), None)
        .unwrap();

    assert_eq!(predictions.len(), banks.len());
    for list in &predictions {
        assert_eq!(list.candidates.len(), 4);
        let unique: HashSet<_> = list.candidates.iter().collect();
        assert_eq!(unique.len(), 4);
        assert!(!list.candidates.contains(&MatchTarget::NoMatch));
    }
}

#[test]
fn test_saved_model_scores_identically() {
    let (bank, rtk) = tables();
    let pairs = CandidateSampler::new(3).sample(&positives(), 1).unwrap();
    let dataset = QueryDataset::build(&pairs, &bank, &rtk);
    let state = ObliviousBoosting::new(small_params())
        .fit(&dataset, &[], 5, None)
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model_1.json");
    state.save(&path).unwrap();
    let loaded = TrainingState::load(&path).unwrap();

    let banks = [0, 1, 2];
    let rtks = [rtk_of(0), rtk_of(1), 5000];
    let before = ModelScorer::new(&state, &bank, &rtk).score_batch(&banks, &rtks).unwrap();
    let after = ModelScorer::new(&loaded, &bank, &rtk).score_batch(&banks, &rtks).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_holdout_evaluation_reports_metrics() {
    let (bank, rtk) = tables();
    let pairs = positives();
    let (train, holdout) = match_ranking::services::sampler::holdout_split(&pairs, 0.25, 3);
    let config = TrainingConfig {
        iterations: 10,
        resample_freq: 5,
        sample_size: 3,
        ..TrainingConfig::default()
    };
    let mut trainer = ResamplingTrainer::new(ObliviousBoosting::new(small_params()), config);
    let report = trainer
        .train_and_evaluate(&train, &holdout, &bank, &rtk, &TopKEngine::default())
        .unwrap();

    assert_eq!(report.predictions.len(), holdout.len());
    assert_eq!(report.metrics.evaluated, holdout.len());
    // Every holdout rtk fits within the first 100 candidates
    assert_eq!(report.metrics.precision, 1.0);
    assert!(report.metrics.mrr > 0.0 && report.metrics.mrr <= 1.0);
}

#[test]
fn test_sample_ensemble_config_loads() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/matching.toml");
    let config = match_ranking::Config::load(Some(&path)).unwrap();

    assert!(config.validate_for_inference().is_ok());
    let names: Vec<&str> = config.inference.members.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["grouped_negative", "daily_both", "weekly_levels", "weekly_90min", "weekly_shares"]
    );
    assert!(config.inference.members.iter().all(|m| m.weight.is_none()));
    assert_eq!(
        config.inference.members[2].features.clickstream.levels().len(),
        3
    );
}
