pub mod dataset;
pub mod ensemble;
pub mod evaluator;
pub mod learner;
pub mod sampler;
pub mod topk;
pub mod trainer;

pub use dataset::QueryDataset;
pub use ensemble::{EnsembleMember, EnsembleScorer};
pub use evaluator::{evaluate, RankingMetrics};
pub use learner::{BoostedModel, BoostingParams, ModelKind, ObliviousBoosting, RankLearner, Scorer, TrainingState};
pub use sampler::CandidateSampler;
pub use topk::{BatchScorer, ModelScorer, TopKEngine};
pub use trainer::{ResamplingTrainer, TrainingConfig, TrainingPhase, TrainingReport};
