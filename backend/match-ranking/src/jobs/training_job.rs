// ============================================
// Training Jobs (模型訓練任務)
// ============================================
//
// train:    all labelled pairs → model_{run}.json + features_{run}.json
// evaluate: labelled pairs split into train / holdout; the holdout banks are
//           ranked against the holdout rtks and scored with precision@100,
//           MRR@100 and R1
//
// Usage:
//   match-ranking train config/matching.toml
//   match-ranking evaluate config/matching.toml

use crate::config::Config;
use crate::jobs::loaders::{
    load_event_data, load_matching, submission_entries, write_json, EventData, SubmissionEntry,
};
use crate::models::MatchPair;
use crate::services::sampler::holdout_split;
use crate::services::{ObliviousBoosting, RankingMetrics, ResamplingTrainer, TopKEngine};
use anyhow::{Context, Result};
use match_features::{aggregate_clickstream, aggregate_transactions, FeatureSet, FeatureSetConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

/// Files written by a training run
#[derive(Debug, Clone)]
pub struct TrainingArtifacts {
    pub model_path: PathBuf,
    pub columns_path: PathBuf,
    pub trees: usize,
    pub best_iteration: Option<usize>,
}

/// Holdout evaluation written to `evaluation_{run}.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub run_number: u32,
    pub train_pairs: usize,
    pub holdout_pairs: usize,
    pub metrics: RankingMetrics,
    pub best_iteration: Option<usize>,
    pub predictions: Vec<SubmissionEntry>,
}

/// Aggregate the event logs and build one feature set
pub fn build_features(data: &EventData, config: &FeatureSetConfig) -> Result<FeatureSet> {
    let transactions = aggregate_transactions(&data.transactions);
    let clicks = aggregate_clickstream(&data.clicks);
    let features = FeatureSet::build(&transactions, &clicks, &data.categories, config)
        .context("Failed to build features")?;
    Ok(features)
}

fn load_labelled(config: &Config) -> Result<(EventData, Vec<MatchPair>)> {
    let mut data = load_event_data(&config.data).context("Failed to load event data")?;
    let pairs = load_matching(&config.data.matching_path(), &mut data.banks, &mut data.rtks)
        .context("Failed to load matching")?;
    Ok((data, pairs))
}

fn trainer(config: &Config) -> ResamplingTrainer<ObliviousBoosting> {
    ResamplingTrainer::new(
        ObliviousBoosting::new(config.boosting.clone()),
        config.training.clone(),
    )
}

/// Train on every labelled pair and persist the model with its feature columns
pub fn run_training_job(config: &Config) -> Result<TrainingArtifacts> {
    let started = Instant::now();
    info!(run = config.run_number, "Starting training job");

    let (data, pairs) = load_labelled(config)?;
    let features = build_features(&data, &config.features)?;

    let state = trainer(config)
        .train(&pairs, &features.transactions, &features.clickstream)
        .context("Training failed")?;

    fs::create_dir_all(&config.data.output_dir).with_context(|| {
        format!("Failed to create {}", config.data.output_dir.display())
    })?;

    let model_path = config.data.model_path(config.run_number);
    let columns_path = config.data.columns_path(config.run_number);
    state
        .save(&model_path)
        .with_context(|| format!("Failed to save model to {}", model_path.display()))?;
    write_json(&columns_path, &features.columns())
        .with_context(|| format!("Failed to save columns to {}", columns_path.display()))?;

    let artifacts = TrainingArtifacts {
        model_path,
        columns_path,
        trees: state.rounds(),
        best_iteration: state.best_iteration,
    };

    info!(
        model = %artifacts.model_path.display(),
        columns = %artifacts.columns_path.display(),
        trees = artifacts.trees,
        duration_ms = started.elapsed().as_millis() as u64,
        "Training job completed"
    );

    Ok(artifacts)
}

/// Train on part of the labelled pairs and score the ranking of the rest
pub fn run_evaluation_job(config: &Config) -> Result<EvaluationSummary> {
    let started = Instant::now();
    info!(run = config.run_number, "Starting evaluation job");

    let (data, pairs) = load_labelled(config)?;
    let features = build_features(&data, &config.features)?;

    let (train, holdout) = holdout_split(
        &pairs,
        config.evaluation.holdout_fraction,
        config.evaluation.holdout_seed,
    );
    info!(train = train.len(), holdout = holdout.len(), "Split labelled pairs");

    let engine = TopKEngine::new(
        config.evaluation.batch_size,
        config.evaluation.top_k,
        config.inference.no_match,
    );
    let report = trainer(config)
        .train_and_evaluate(
            &train,
            &holdout,
            &features.transactions,
            &features.clickstream,
            &engine,
        )
        .context("Evaluation failed")?;

    let summary = EvaluationSummary {
        run_number: config.run_number,
        train_pairs: train.len(),
        holdout_pairs: holdout.len(),
        metrics: report.metrics,
        best_iteration: report.best_iteration,
        predictions: submission_entries(&report.predictions, &data.banks, &data.rtks)?,
    };

    let path = config
        .data
        .output_dir
        .join(format!("evaluation_{}.json", config.run_number));
    write_json(&path, &summary)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!(
        precision = summary.metrics.precision,
        mrr = summary.metrics.mrr,
        r1 = summary.metrics.r1,
        evaluated = summary.metrics.evaluated,
        path = %path.display(),
        duration_ms = started.elapsed().as_millis() as u64,
        "Evaluation job completed"
    );

    Ok(summary)
}
