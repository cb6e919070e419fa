//! Gradient-boosted oblivious trees
//!
//! Every tree applies the same (feature, border) test at each depth level, so
//! a row's leaf is the bit pattern of its test outcomes. Features are
//! quantized into at most `border_count` borders on the first fit; warm starts
//! reuse those borders and append trees.
//!
//! Missing values (NaN) always take the "not greater than border" branch.

use super::{sigmoid, ModelKind, RankLearner, Scorer, TrainingState};
use crate::error::{MatchingError, Result};
use crate::services::dataset::QueryDataset;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::debug;
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BoostingParams {
    pub kind: ModelKind,
    #[validate(range(min = 0.0, max = 1.0))]
    pub learning_rate: f64,
    #[validate(range(min = 1, max = 12))]
    pub depth: usize,
    #[validate(range(min = 0.0))]
    pub l2_leaf_reg: f64,
    #[validate(range(min = 1, max = 255))]
    pub border_count: usize,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            kind: ModelKind::Ranker,
            learning_rate: 0.1,
            depth: 6,
            l2_leaf_reg: 3.0,
            border_count: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub feature: usize,
    /// Index into the feature's borders
    pub bin: usize,
    pub border: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObliviousTree {
    pub splits: Vec<Split>,
    /// `2^splits.len()` values; bit `l` of the index is the outcome at level `l`
    pub leaf_values: Vec<f64>,
}

impl ObliviousTree {
    fn leaf_of_row(&self, row: ArrayView1<'_, f32>) -> usize {
        self.splits
            .iter()
            .enumerate()
            .fold(0, |leaf, (level, split)| {
                if goes_right(row[split.feature], split.border) {
                    leaf | (1 << level)
                } else {
                    leaf
                }
            })
    }

    fn leaf_of_bins(&self, bins: ArrayView1<'_, u8>) -> usize {
        self.splits
            .iter()
            .enumerate()
            .fold(0, |leaf, (level, split)| {
                if bins[split.feature] as usize > split.bin {
                    leaf | (1 << level)
                } else {
                    leaf
                }
            })
    }
}

fn goes_right(value: f32, border: f32) -> bool {
    !value.is_nan() && value > border
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedModel {
    kind: ModelKind,
    n_features: usize,
    /// Sorted split candidates per feature
    borders: Vec<Vec<f32>>,
    bias: f64,
    trees: Vec<ObliviousTree>,
}

impl BoostedModel {
    /// Model without trees that scores every row as `bias`
    pub fn constant(kind: ModelKind, n_features: usize, bias: f64) -> Self {
        Self {
            kind,
            n_features,
            borders: vec![Vec::new(); n_features],
            bias,
            trees: Vec::new(),
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn trees(&self) -> &[ObliviousTree] {
        &self.trees
    }

    /// Check that every split and leaf index a row can reach exists
    pub fn check_structure(&self) -> Result<()> {
        if self.borders.len() != self.n_features {
            return Err(MatchingError::Inference(format!(
                "Model has borders for {} features, expects {}",
                self.borders.len(),
                self.n_features
            )));
        }

        for (t, tree) in self.trees.iter().enumerate() {
            for split in &tree.splits {
                let Some(borders) = self.borders.get(split.feature) else {
                    return Err(MatchingError::Inference(format!(
                        "Tree {} splits on feature {} of {}",
                        t, split.feature, self.n_features
                    )));
                };
                if split.bin >= borders.len() {
                    return Err(MatchingError::Inference(format!(
                        "Tree {} splits feature {} at bin {} of {}",
                        t,
                        split.feature,
                        split.bin,
                        borders.len()
                    )));
                }
            }

            let leaves = u32::try_from(tree.splits.len())
                .ok()
                .and_then(|depth| 1usize.checked_shl(depth));
            if leaves != Some(tree.leaf_values.len()) {
                return Err(MatchingError::Inference(format!(
                    "Tree {} has {} splits and {} leaf values",
                    t,
                    tree.splits.len(),
                    tree.leaf_values.len()
                )));
            }
        }
        Ok(())
    }

    fn binarize(&self, features: ArrayView2<'_, f32>) -> Array2<u8> {
        let mut bins = Array2::<u8>::zeros(features.raw_dim());
        for (f, borders) in self.borders.iter().enumerate() {
            for (dst, value) in bins.column_mut(f).iter_mut().zip(features.column(f)) {
                // Count of borders strictly below the value; NaN lands in bin 0
                *dst = borders.partition_point(|b| *b < *value) as u8;
            }
        }
        bins
    }

    fn check_width(&self, features: &ArrayView2<'_, f32>) -> Result<()> {
        if features.ncols() != self.n_features {
            return Err(MatchingError::Inference(format!(
                "Expected {} features, got {}",
                self.n_features,
                features.ncols()
            )));
        }
        Ok(())
    }
}

impl Scorer for BoostedModel {
    fn kind(&self) -> ModelKind {
        self.kind
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict(&self, features: ArrayView2<'_, f32>) -> Result<Array1<f64>> {
        self.check_width(&features)?;
        let scores = features
            .axis_iter(Axis(0))
            .map(|row| {
                self.bias
                    + self
                        .trees
                        .iter()
                        .map(|tree| tree.leaf_values[tree.leaf_of_row(row)])
                        .sum::<f64>()
            })
            .collect();
        Ok(scores)
    }
}

/// Oblivious-tree gradient boosting learner
#[derive(Debug, Clone, Default)]
pub struct ObliviousBoosting {
    params: BoostingParams,
}

impl ObliviousBoosting {
    pub fn new(params: BoostingParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &BoostingParams {
        &self.params
    }

    fn initial_model(&self, train: &QueryDataset, labels: &[f64]) -> BoostedModel {
        let bias = match self.params.kind {
            ModelKind::Ranker => 0.0,
            ModelKind::Classifier => {
                let mean = labels.iter().sum::<f64>() / labels.len().max(1) as f64;
                let mean = mean.clamp(1e-6, 1.0 - 1e-6);
                (mean / (1.0 - mean)).ln()
            }
        };

        BoostedModel {
            kind: self.params.kind,
            n_features: train.n_features(),
            borders: quantize(train.features(), self.params.border_count),
            bias,
            trees: Vec::new(),
        }
    }

    fn grow_tree(&self, bins: &Array2<u8>, borders: &[Vec<f32>], grad: &[f64], hess: &[f64]) -> ObliviousTree {
        let l2 = self.params.l2_leaf_reg;
        let n_rows = bins.nrows();
        let mut leaf_of = vec![0usize; n_rows];
        let mut splits: Vec<Split> = Vec::new();

        for level in 0..self.params.depth {
            let n_leaves = 1usize << level;

            let mut totals = vec![(0.0, 0.0); n_leaves];
            for row in 0..n_rows {
                totals[leaf_of[row]].0 += grad[row];
                totals[leaf_of[row]].1 += hess[row];
            }
            let current: f64 = totals.iter().map(|(g, h)| gain(*g, *h, l2)).sum();

            let mut best: Option<(f64, usize, usize)> = None;
            for (feature, feature_borders) in borders.iter().enumerate() {
                if feature_borders.is_empty() {
                    continue;
                }
                let n_bins = feature_borders.len() + 1;

                let mut hist = vec![(0.0, 0.0); n_leaves * n_bins];
                for row in 0..n_rows {
                    let cell = &mut hist[leaf_of[row] * n_bins + bins[[row, feature]] as usize];
                    cell.0 += grad[row];
                    cell.1 += hess[row];
                }

                // Left side of split `bin` holds bins 0..=bin
                let mut left = vec![(0.0, 0.0); n_leaves];
                for bin in 0..feature_borders.len() {
                    let mut score = 0.0;
                    for leaf in 0..n_leaves {
                        let cell = hist[leaf * n_bins + bin];
                        left[leaf].0 += cell.0;
                        left[leaf].1 += cell.1;
                        let right = (totals[leaf].0 - left[leaf].0, totals[leaf].1 - left[leaf].1);
                        score += gain(left[leaf].0, left[leaf].1, l2) + gain(right.0, right.1, l2);
                    }
                    if best.map_or(true, |(s, _, _)| score > s) {
                        best = Some((score, feature, bin));
                    }
                }
            }

            match best {
                Some((score, feature, bin)) if score > current + 1e-12 => {
                    for row in 0..n_rows {
                        if bins[[row, feature]] as usize > bin {
                            leaf_of[row] |= 1 << level;
                        }
                    }
                    splits.push(Split {
                        feature,
                        bin,
                        border: borders[feature][bin],
                    });
                }
                _ => break,
            }
        }

        let n_leaves = 1usize << splits.len();
        let mut sums = vec![(0.0, 0.0); n_leaves];
        for row in 0..n_rows {
            sums[leaf_of[row]].0 += grad[row];
            sums[leaf_of[row]].1 += hess[row];
        }
        let leaf_values = sums
            .iter()
            .map(|(g, h)| {
                let denom = h + l2;
                if denom > 0.0 {
                    -g / denom * self.params.learning_rate
                } else {
                    0.0
                }
            })
            .collect();

        ObliviousTree { splits, leaf_values }
    }
}

impl RankLearner for ObliviousBoosting {
    fn fit(
        &self,
        train: &QueryDataset,
        eval_sets: &[QueryDataset],
        rounds: usize,
        init: Option<TrainingState>,
    ) -> Result<TrainingState> {
        if train.is_empty() {
            return Err(MatchingError::Training("Training set is empty".to_string()));
        }
        let labels = train.labels();

        let (mut model, mut history) = match init {
            Some(state) => {
                if state.model.kind != self.params.kind {
                    return Err(MatchingError::Training(format!(
                        "Cannot continue a {:?} model as {:?}",
                        state.model.kind, self.params.kind
                    )));
                }
                if state.model.n_features != train.n_features() {
                    return Err(MatchingError::Training(format!(
                        "Warm start expects {} features, training set has {}",
                        state.model.n_features,
                        train.n_features()
                    )));
                }
                (state.model, state.eval_history)
            }
            None => (self.initial_model(train, &labels), Vec::new()),
        };

        if let Some(eval) = eval_sets.iter().find(|e| e.n_features() != model.n_features) {
            return Err(MatchingError::Training(format!(
                "Evaluation set has {} features, model expects {}",
                eval.n_features(),
                model.n_features
            )));
        }

        let bins = model.binarize(train.features());
        let mut scores = model.predict(train.features())?;

        let eval = eval_sets.first();
        let eval_bins = eval.map(|e| model.binarize(e.features()));
        let eval_labels = eval.map(|e| e.labels()).unwrap_or_default();
        let mut eval_scores = match eval {
            Some(e) => Some(model.predict(e.features())?),
            None => None,
        };

        for _ in 0..rounds {
            let (grad, hess) = gradients(model.kind, &scores, &labels, train.groups());
            let tree = self.grow_tree(&bins, &model.borders, &grad, &hess);

            for (score, row) in scores.iter_mut().zip(bins.axis_iter(Axis(0))) {
                *score += tree.leaf_values[tree.leaf_of_bins(row)];
            }

            if let (Some(eval), Some(eval_bins), Some(eval_scores)) =
                (eval, eval_bins.as_ref(), eval_scores.as_mut())
            {
                for (score, row) in eval_scores.iter_mut().zip(eval_bins.axis_iter(Axis(0))) {
                    *score += tree.leaf_values[tree.leaf_of_bins(row)];
                }
                history.push(loss(model.kind, eval_scores, &eval_labels, eval.groups()));
            }

            model.trees.push(tree);
        }

        let best_iteration = history
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);

        debug!(
            rows = train.n_rows(),
            groups = train.groups().len(),
            trees = model.n_trees(),
            eval_loss = history.last().copied(),
            "Finished boosting rounds"
        );

        Ok(TrainingState {
            model,
            eval_history: history,
            best_iteration,
        })
    }
}

fn gain(g: f64, h: f64, l2: f64) -> f64 {
    let denom = h + l2;
    if denom > 0.0 {
        g * g / denom
    } else {
        0.0
    }
}

/// Quantile borders per feature, ignoring non-finite values
fn quantize(features: ArrayView2<'_, f32>, border_count: usize) -> Vec<Vec<f32>> {
    features
        .axis_iter(Axis(1))
        .map(|column| {
            let mut values: Vec<f32> = column.iter().copied().filter(|v| v.is_finite()).collect();
            values.sort_by(|a, b| a.total_cmp(b));
            let mut unique = values.clone();
            unique.dedup();

            if unique.len() < 2 {
                return Vec::new();
            }
            if unique.len() - 1 <= border_count {
                return unique.windows(2).map(|w| w[0] + (w[1] - w[0]) / 2.0).collect();
            }

            let max = unique[unique.len() - 1];
            let mut borders: Vec<f32> = (1..=border_count)
                .map(|i| values[i * values.len() / (border_count + 1)])
                .filter(|b| *b < max)
                .collect();
            borders.dedup();
            borders
        })
        .collect()
}

fn softplus(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

/// Pairs (i, j) within a group where row i should rank above row j
fn ordered_pairs<'a>(
    labels: &'a [f64],
    groups: &'a [Range<usize>],
) -> impl Iterator<Item = (usize, usize)> + 'a {
    groups.iter().flat_map(move |group| {
        let group = group.clone();
        group.clone().flat_map(move |i| {
            group
                .clone()
                .filter(move |j| labels[i] > labels[*j])
                .map(move |j| (i, j))
        })
    })
}

fn gradients(
    kind: ModelKind,
    scores: &Array1<f64>,
    labels: &[f64],
    groups: &[Range<usize>],
) -> (Vec<f64>, Vec<f64>) {
    let n = labels.len();
    match kind {
        ModelKind::Classifier => {
            let mut grad = Vec::with_capacity(n);
            let mut hess = Vec::with_capacity(n);
            for (score, label) in scores.iter().zip(labels) {
                let p = sigmoid(*score);
                grad.push(p - label);
                hess.push((p * (1.0 - p)).max(1e-16));
            }
            (grad, hess)
        }
        ModelKind::Ranker => {
            let mut grad = vec![0.0; n];
            let mut hess = vec![0.0; n];
            for (i, j) in ordered_pairs(labels, groups) {
                let p = sigmoid(scores[i] - scores[j]);
                grad[i] -= 1.0 - p;
                grad[j] += 1.0 - p;
                hess[i] += p * (1.0 - p);
                hess[j] += p * (1.0 - p);
            }
            (grad, hess)
        }
    }
}

/// Mean pairwise logistic loss (rankers) or log-loss (classifiers)
fn loss(kind: ModelKind, scores: &Array1<f64>, labels: &[f64], groups: &[Range<usize>]) -> f64 {
    let (total, count) = match kind {
        ModelKind::Classifier => scores
            .iter()
            .zip(labels)
            .fold((0.0, 0usize), |(total, count), (s, y)| {
                (total + softplus(*s) - y * s, count + 1)
            }),
        ModelKind::Ranker => ordered_pairs(labels, groups).fold((0.0, 0usize), |(total, count), (i, j)| {
            (total + softplus(scores[j] - scores[i]), count + 1)
        }),
    };

    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}
