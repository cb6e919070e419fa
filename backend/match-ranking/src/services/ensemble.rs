// ============================================
// Model Ensemble (多模型融合)
// ============================================
//
// Each member pairs a trained model with the feature set it was trained
// on. Members score the same (bank, rtk) rows independently; relevance
// scores (classifier output already mapped to probabilities) are then
// averaged, or summed with fixed per-member weights.

use crate::error::{MatchingError, Result};
use crate::services::learner::Scorer;
use crate::services::topk::{BatchScorer, ModelScorer};
use match_features::{FeatureSet, IdentityId};
use tracing::debug;

pub struct EnsembleMember<S: Scorer> {
    pub name: String,
    pub model: S,
    /// Features already reindexed to the model's training columns
    pub features: FeatureSet,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
enum Combination {
    Mean,
    Weighted(Vec<f64>),
}

pub struct EnsembleScorer<S: Scorer> {
    members: Vec<EnsembleMember<S>>,
    combination: Combination,
}

impl<S: Scorer> EnsembleScorer<S> {
    /// Weights must be given for every member or for none.
    pub fn new(members: Vec<EnsembleMember<S>>) -> Result<Self> {
        if members.is_empty() {
            return Err(MatchingError::Configuration(
                "Ensemble needs at least one member".to_string(),
            ));
        }

        let weights: Vec<f64> = members.iter().filter_map(|m| m.weight).collect();
        let combination = if weights.is_empty() {
            Combination::Mean
        } else if weights.len() == members.len() {
            Combination::Weighted(weights)
        } else {
            return Err(MatchingError::Configuration(format!(
                "Weights given for {} of {} ensemble members",
                weights.len(),
                members.len()
            )));
        };

        Ok(Self {
            members,
            combination,
        })
    }

    pub fn members(&self) -> &[EnsembleMember<S>] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl<S: Scorer> BatchScorer for EnsembleScorer<S> {
    fn score_batch(&self, banks: &[IdentityId], rtks: &[IdentityId]) -> Result<Vec<f64>> {
        let mut combined = vec![0.0; banks.len() * rtks.len()];

        for (i, member) in self.members.iter().enumerate() {
            let scores = ModelScorer::new(
                &member.model,
                &member.features.transactions,
                &member.features.clickstream,
            )
            .score_batch(banks, rtks)
            .map_err(|e| MatchingError::Inference(format!("Member {}: {}", member.name, e)))?;

            let weight = match &self.combination {
                Combination::Mean => 1.0 / self.members.len() as f64,
                Combination::Weighted(weights) => weights[i],
            };
            for (acc, score) in combined.iter_mut().zip(&scores) {
                *acc += weight * score;
            }
            debug!(member = %member.name, rows = scores.len(), "Scored ensemble member");
        }

        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::learner::{BoostedModel, ModelKind};
    use match_features::FeatureTable;

    fn features() -> FeatureSet {
        FeatureSet {
            transactions: FeatureTable::from_sparse(vec![(1, 0, 1.0)], |k| format!("count-mcc{}", k)),
            clickstream: FeatureTable::from_sparse(vec![(10, 0, 1.0), (11, 0, 2.0)], |k| format!("cat_id-{}", k)),
        }
    }

    fn member(kind: ModelKind, bias: f64, weight: Option<f64>) -> EnsembleMember<BoostedModel> {
        EnsembleMember {
            name: format!("{:?}-{}", kind, bias),
            model: BoostedModel::constant(kind, 2, bias),
            features: features(),
            weight,
        }
    }

    #[test]
    fn test_mean_of_relevance_scores() {
        // Classifier log-odds 0 becomes probability 0.5
        let ensemble = EnsembleScorer::new(vec![
            member(ModelKind::Ranker, 2.0, None),
            member(ModelKind::Classifier, 0.0, None),
        ])
        .unwrap();

        let scores = ensemble.score_batch(&[1], &[10, 11]).unwrap();
        assert_eq!(scores, vec![1.25, 1.25]);
    }

    #[test]
    fn test_weighted_sum() {
        let ensemble = EnsembleScorer::new(vec![
            member(ModelKind::Ranker, 2.0, Some(0.75)),
            member(ModelKind::Ranker, 4.0, Some(0.5)),
        ])
        .unwrap();

        let scores = ensemble.score_batch(&[1], &[10]).unwrap();
        assert_eq!(scores, vec![3.5]);
    }

    #[test]
    fn test_partial_weights_rejected() {
        let result = EnsembleScorer::new(vec![
            member(ModelKind::Ranker, 1.0, Some(1.0)),
            member(ModelKind::Ranker, 1.0, None),
        ]);
        assert!(matches!(result, Err(MatchingError::Configuration(_))));

        let empty: Result<EnsembleScorer<BoostedModel>> = EnsembleScorer::new(Vec::new());
        assert!(empty.is_err());
    }

    #[test]
    fn test_member_width_mismatch_names_member() {
        let mut bad = member(ModelKind::Ranker, 1.0, None);
        bad.model = BoostedModel::constant(ModelKind::Ranker, 5, 0.0);
        bad.name = "wide".to_string();
        let ensemble = EnsembleScorer::new(vec![bad]).unwrap();

        match ensemble.score_batch(&[1], &[10]) {
            Err(MatchingError::Inference(msg)) => assert!(msg.contains("wide")),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
