// ============================================
// Inference Job (批量推論任務)
// ============================================
//
// Workflow:
// 1. Load the unlabelled event logs and aggregate them once
// 2. For each ensemble member, build its feature set, restrict it to the
//    columns the member was trained on and load its model
// 3. Rank every bank of the first member against every rtk of the first
//    member, in batches
// 4. Write the submission JSON
//
// Usage:
//   match-ranking infer config/matching.toml

use crate::config::{Config, EnsembleMemberConfig};
use crate::jobs::loaders::{load_event_data, read_json, submission_entries, write_json};
use crate::models::RankedList;
use crate::services::{EnsembleMember, EnsembleScorer, Scorer, TopKEngine, TrainingState};
use anyhow::{bail, Context, Result};
use match_features::{
    aggregate_clickstream, aggregate_transactions, CategoryHierarchy, ClickAggregates, FeatureSet,
    FeatureSetColumns, TransactionAggregates,
};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone)]
pub struct InferenceOutput {
    pub submission_path: PathBuf,
    pub banks: usize,
    pub rtks: usize,
    pub predictions: Vec<RankedList>,
}

fn load_member(
    member: &EnsembleMemberConfig,
    transactions: &TransactionAggregates,
    clicks: &ClickAggregates,
    categories: &CategoryHierarchy,
) -> Result<EnsembleMember<TrainingState>> {
    let columns: FeatureSetColumns = read_json(&member.columns_path).with_context(|| {
        format!("Failed to load columns {}", member.columns_path.display())
    })?;
    let features = FeatureSet::build(transactions, clicks, categories, &member.features)
        .with_context(|| format!("Failed to build features for member {}", member.name))?
        .reindexed(&columns);

    let model = TrainingState::load(&member.model_path)
        .with_context(|| format!("Failed to load model {}", member.model_path.display()))?;
    if model.kind() != member.kind {
        bail!(
            "Member {} is configured as {:?} but its model is a {:?}",
            member.name,
            member.kind,
            model.kind()
        );
    }

    info!(
        member = %member.name,
        kind = ?member.kind,
        bank_columns = features.transactions.n_cols(),
        rtk_columns = features.clickstream.n_cols(),
        trees = model.rounds(),
        "Loaded ensemble member"
    );

    Ok(EnsembleMember {
        name: member.name.clone(),
        model,
        features,
        weight: member.weight,
    })
}

pub fn run_inference_job(config: &Config) -> Result<InferenceOutput> {
    let started = Instant::now();
    config.validate_for_inference()?;
    info!(members = config.inference.members.len(), "Starting inference job");

    let data = load_event_data(&config.data).context("Failed to load event data")?;
    let transactions = aggregate_transactions(&data.transactions);
    let clicks = aggregate_clickstream(&data.clicks);

    let members = config
        .inference
        .members
        .iter()
        .map(|member| load_member(member, &transactions, &clicks, &data.categories))
        .collect::<Result<Vec<_>>>()?;

    let Some(first) = members.first() else {
        bail!("Inference needs at least one ensemble member");
    };
    let banks = first.features.transactions.ids().to_vec();
    let rtks = first.features.clickstream.ids().to_vec();
    let scorer = EnsembleScorer::new(members)?;

    let engine = TopKEngine::new(
        config.inference.batch_size,
        config.inference.top_k,
        config.inference.no_match,
    );
    let predictions = engine.rank(&banks, &rtks, &scorer, None)?;

    let submission_path = config.data.submission_path();
    let entries = submission_entries(&predictions, &data.banks, &data.rtks)?;
    write_json(&submission_path, &entries)
        .with_context(|| format!("Failed to write {}", submission_path.display()))?;

    info!(
        banks = banks.len(),
        rtks = rtks.len(),
        path = %submission_path.display(),
        duration_ms = started.elapsed().as_millis() as u64,
        "Inference job completed"
    );

    Ok(InferenceOutput {
        submission_path,
        banks: banks.len(),
        rtks: rtks.len(),
        predictions,
    })
}
