// ============================================
// Batch Jobs Module (批次任務模組)
// ============================================
//
// Contains the job runners behind the binary's modes:
// 1. train    - fit one model on all labelled pairs
// 2. evaluate - fit on a split and score the holdout ranking
// 3. infer    - rank with an ensemble of trained models
//
// These jobs are triggered via the command line:
//   match-ranking <train|evaluate|infer> [config.toml]

pub mod inference_job;
pub mod loaders;
pub mod training_job;

pub use inference_job::{run_inference_job, InferenceOutput};
pub use loaders::{IdentityRegistry, SubmissionEntry};
pub use training_job::{run_evaluation_job, run_training_job, EvaluationSummary, TrainingArtifacts};
