// ============================================
// Trainable Scorer (可訓練打分模型)
// ============================================
//
// Seams between the training loop and the model:
// - `Scorer`:      feature rows → relevance scores
// - `RankLearner`: one warm-startable training increment
// - `TrainingState`: the model plus its evaluation history, passed
//   explicitly from one resampling round to the next

pub mod boosting;

pub use boosting::{BoostedModel, BoostingParams, ObliviousBoosting};

use crate::error::{MatchingError, Result};
use crate::services::dataset::QueryDataset;
use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Objective the model was trained with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Pairwise ranking loss within bank groups; outputs raw rank scores
    #[default]
    Ranker,
    /// Binary log-loss; outputs log-odds of a match
    Classifier,
}

pub trait Scorer {
    fn kind(&self) -> ModelKind;

    /// Expected width of a feature row
    fn n_features(&self) -> usize;

    /// Raw model output, one score per row
    fn predict(&self, features: ArrayView2<'_, f32>) -> Result<Array1<f64>>;

    /// Scores comparable across model kinds: rank scores for rankers,
    /// positive-class probabilities for classifiers.
    fn relevance(&self, features: ArrayView2<'_, f32>) -> Result<Array1<f64>> {
        let raw = self.predict(features)?;
        Ok(match self.kind() {
            ModelKind::Ranker => raw,
            ModelKind::Classifier => raw.mapv(sigmoid),
        })
    }
}

pub trait RankLearner {
    /// Run `rounds` boosting rounds on `train`, continuing from `init` when given.
    ///
    /// The first of `eval_sets` drives the evaluation history.
    fn fit(
        &self,
        train: &QueryDataset,
        eval_sets: &[QueryDataset],
        rounds: usize,
        init: Option<TrainingState>,
    ) -> Result<TrainingState>;
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Trained model with the bookkeeping needed to continue training it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    pub model: BoostedModel,
    /// Validation loss after every round, across warm starts
    pub eval_history: Vec<f64>,
    pub best_iteration: Option<usize>,
}

impl TrainingState {
    pub fn new(model: BoostedModel) -> Self {
        Self {
            model,
            eval_history: Vec::new(),
            best_iteration: None,
        }
    }

    /// Boosting rounds accumulated so far
    pub fn rounds(&self) -> usize {
        self.model.n_trees()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        info!(path = %path.display(), rounds = self.rounds(), "Saved model");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            MatchingError::Io(format!("Failed to open model {}: {}", path.display(), e))
        })?;
        let state: Self = serde_json::from_reader(BufReader::new(file))?;
        state.model.check_structure()?;
        info!(path = %path.display(), rounds = state.rounds(), "Loaded model");
        Ok(state)
    }
}

impl Scorer for TrainingState {
    fn kind(&self) -> ModelKind {
        self.model.kind()
    }

    fn n_features(&self) -> usize {
        self.model.n_features()
    }

    fn predict(&self, features: ArrayView2<'_, f32>) -> Result<Array1<f64>> {
        self.model.predict(features)
    }
}
